//! # Reservation Ledger
//!
//! Creates reservations against registered nodes and drives them through
//! the state machine defined by [`ReservationState`].
//!
//! ## Capacity Accounting
//!
//! ```text
//! free_space(node) = available_space(node) - Σ amount(r)   for active r on node
//! ```
//!
//! - `reserve` checks and commits under the owner node's mutex, so two
//!   concurrent reserves against one node can never both pass a check that
//!   only one of them fits.
//! - A transition out of the active set (reject, complete, expire) releases
//!   the amount inside the reservation's own critical section, so it happens
//!   exactly once.
//!
//! ## Locking
//!
//! - Every reservation has its own mutex; a transition holds it from state
//!   check to state write.
//! - Lock order is reservation → node. The reservation table lock is only
//!   held to clone handles and is never held while another lock is awaited.
//!
//! ## Transfers
//!
//! An Approved reservation carries a `transfer_in_flight` flag while its file
//! is being pushed. Only one push may hold it, and the expiry sweep leaves
//! flagged reservations alone until the push finishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use peerstash_common::{ReservationState, ReservationView};

use crate::error::{CoordinatorError, Result};
use crate::registry::CapacityRegistry;

// ════════════════════════════════════════════════════════════════════════════
// EXPIRY POLICY
// ════════════════════════════════════════════════════════════════════════════

/// How long a reservation may sit in an active state. `None` disables the
/// timeout for that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub pending_ttl: Option<Duration>,
    pub approved_ttl: Option<Duration>,
}

impl ExpiryPolicy {
    pub const fn disabled() -> Self {
        Self {
            pending_ttl: None,
            approved_ttl: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pending_ttl.is_some() || self.approved_ttl.is_some()
    }

    fn is_due(&self, r: &Reservation, now: Instant) -> bool {
        match r.state {
            ReservationState::Pending => self
                .pending_ttl
                .is_some_and(|ttl| now.saturating_duration_since(r.created_at) >= ttl),
            ReservationState::Approved if r.transfer_in_flight => false,
            ReservationState::Approved => match (self.approved_ttl, r.approved_at) {
                (Some(ttl), Some(at)) => now.saturating_duration_since(at) >= ttl,
                _ => false,
            },
            _ => false,
        }
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            pending_ttl: Some(Duration::from_secs(15 * 60)),
            approved_ttl: Some(Duration::from_secs(60 * 60)),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// RESERVATION
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: String,
    /// Owner node holding the capacity.
    pub from_id: String,
    /// Requester that will push the file.
    pub to_id: String,
    pub amount: u64,
    pub state: ReservationState,
    /// Transfer port recorded by the owner on approval.
    pub port: Option<u16>,
    /// Creation order across the whole ledger.
    pub seq: u64,
    pub created_at: Instant,
    pub created_at_ms: u64,
    pub approved_at: Option<Instant>,
    /// Set while a file push for this reservation is running.
    pub transfer_in_flight: bool,
}

impl Reservation {
    pub fn view(&self) -> ReservationView {
        ReservationView {
            reservation_id: self.id.clone(),
            from_id: self.from_id.clone(),
            to_id: self.to_id.clone(),
            amount: self.amount,
            state: self.state,
            port: self.port,
            created_at_ms: self.created_at_ms,
        }
    }
}

type ReservationHandle = Arc<Mutex<Reservation>>;

/// A requested state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Approve { port: u16 },
    Reject,
    Complete,
    Expire,
}

impl Action {
    pub const fn target(&self) -> ReservationState {
        match self {
            Action::Approve { .. } => ReservationState::Approved,
            Action::Reject => ReservationState::Rejected,
            Action::Complete => ReservationState::Completed,
            Action::Expire => ReservationState::Expired,
        }
    }

    pub const fn verb(&self) -> &'static str {
        match self {
            Action::Approve { .. } => "approve",
            Action::Reject => "reject",
            Action::Complete => "complete",
            Action::Expire => "expire",
        }
    }

    /// Owner decisions may be repeated; lifecycle events may not.
    const fn is_repeatable(&self) -> bool {
        matches!(self, Action::Approve { .. } | Action::Reject)
    }
}

/// Result of [`ReservationLedger::transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The state changed.
    Applied(Reservation),
    /// The reservation was already in the target state; nothing changed.
    Unchanged(Reservation),
}

impl Transition {
    pub fn reservation(&self) -> &Reservation {
        match self {
            Transition::Applied(r) | Transition::Unchanged(r) => r,
        }
    }

    pub fn into_reservation(self) -> Reservation {
        match self {
            Transition::Applied(r) | Transition::Unchanged(r) => r,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LEDGER
// ════════════════════════════════════════════════════════════════════════════

pub struct ReservationLedger {
    registry: Arc<CapacityRegistry>,
    reservations: RwLock<HashMap<String, ReservationHandle>>,
    next_seq: AtomicU64,
    policy: ExpiryPolicy,
}

impl ReservationLedger {
    pub fn new(registry: Arc<CapacityRegistry>, policy: ExpiryPolicy) -> Self {
        Self {
            registry,
            reservations: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            policy,
        }
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    /// Reserve `amount` MB on `from_id` for `to_id`. Returns the new id.
    pub fn reserve(&self, from_id: &str, to_id: &str, amount: i64) -> Result<String> {
        if amount <= 0 {
            return Err(CoordinatorError::InvalidArgument(format!(
                "amount must be > 0, got {amount}"
            )));
        }
        if to_id.trim().is_empty() {
            return Err(CoordinatorError::InvalidArgument("to_id must not be empty".into()));
        }
        let amount = amount as u64;

        let node = self
            .registry
            .handle(from_id)
            .ok_or_else(|| CoordinatorError::NotFound(format!("node {from_id}")))?;

        let seq = {
            let mut account = node.lock();
            let free = account.free_space();
            if amount > free {
                return Err(CoordinatorError::InsufficientCapacity {
                    node_id: from_id.to_string(),
                    requested: amount,
                    free,
                });
            }
            account.committed += amount;
            self.next_seq.fetch_add(1, Ordering::Relaxed)
        };

        let id = Uuid::new_v4().simple().to_string();
        let reservation = Reservation {
            id: id.clone(),
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            amount,
            state: ReservationState::Pending,
            port: None,
            seq,
            created_at: Instant::now(),
            created_at_ms: unix_millis(),
            approved_at: None,
            transfer_in_flight: false,
        };
        self.reservations
            .write()
            .insert(id.clone(), Arc::new(Mutex::new(reservation)));

        info!(reservation_id = %id, from_id, to_id, amount, "reservation created");
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<Reservation> {
        Ok(self.handle(id)?.lock().clone())
    }

    pub fn state(&self, id: &str) -> Result<ReservationState> {
        Ok(self.handle(id)?.lock().state)
    }

    /// Pending reservations owned by `owner_id`, oldest first.
    pub fn pending_for(&self, owner_id: &str) -> Vec<Reservation> {
        let mut out: Vec<Reservation> = self
            .handles()
            .into_iter()
            .filter_map(|h| {
                let r = h.lock();
                (r.from_id == owner_id && r.state == ReservationState::Pending).then(|| r.clone())
            })
            .collect();
        out.sort_by_key(|r| r.seq);
        out
    }

    /// Apply `action` atomically.
    ///
    /// Approve and reject are repeatable: asking for the state the
    /// reservation already has returns [`Transition::Unchanged`] without side
    /// effects. Every other illegal move fails with `InvalidStateTransition`.
    pub fn transition(&self, id: &str, action: Action) -> Result<Transition> {
        let handle = self.handle(id)?;
        let mut r = handle.lock();
        self.apply_locked(&mut r, action, Instant::now())
    }

    pub fn mark_approved(&self, id: &str, port: u16) -> Result<Reservation> {
        self.strict(id, Action::Approve { port })
    }

    pub fn mark_rejected(&self, id: &str) -> Result<Reservation> {
        self.strict(id, Action::Reject)
    }

    pub fn mark_completed(&self, id: &str) -> Result<Reservation> {
        self.strict(id, Action::Complete)
    }

    pub fn mark_expired(&self, id: &str) -> Result<Reservation> {
        self.strict(id, Action::Expire)
    }

    /// Claim an Approved reservation for a file push. Fails with
    /// `TransferInProgress` while another push holds the claim.
    pub fn begin_transfer(&self, id: &str) -> Result<Reservation> {
        let handle = self.handle(id)?;
        let mut r = handle.lock();
        if r.state != ReservationState::Approved {
            return Err(CoordinatorError::InvalidStateTransition {
                reservation_id: r.id.clone(),
                from: r.state,
                action: "transfer",
            });
        }
        if r.transfer_in_flight {
            return Err(CoordinatorError::TransferInProgress(r.id.clone()));
        }
        r.transfer_in_flight = true;
        debug!(reservation_id = %r.id, "transfer claimed");
        Ok(r.clone())
    }

    /// Drop the push claim after a failed transfer so the requester can retry.
    pub fn end_transfer(&self, id: &str) {
        if let Ok(handle) = self.handle(id) {
            handle.lock().transfer_in_flight = false;
        }
    }

    /// Expire every reservation whose TTL has elapsed at `now`. Returns the
    /// expired ids.
    pub fn sweep_expired(&self, now: Instant) -> Vec<String> {
        if !self.policy.is_enabled() {
            return Vec::new();
        }
        let mut expired = Vec::new();
        for handle in self.handles() {
            let mut r = handle.lock();
            if !self.policy.is_due(&r, now) {
                continue;
            }
            if let Ok(Transition::Applied(done)) = self.apply_locked(&mut r, Action::Expire, now) {
                expired.push(done.id);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.reservations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.read().is_empty()
    }

    /// Number of Pending + Approved reservations.
    pub fn active_count(&self) -> usize {
        self.handles()
            .into_iter()
            .filter(|h| h.lock().state.is_active())
            .count()
    }

    fn strict(&self, id: &str, action: Action) -> Result<Reservation> {
        match self.transition(id, action)? {
            Transition::Applied(r) => Ok(r),
            Transition::Unchanged(r) => Err(CoordinatorError::InvalidStateTransition {
                reservation_id: r.id,
                from: r.state,
                action: action.verb(),
            }),
        }
    }

    fn apply_locked(&self, r: &mut Reservation, action: Action, now: Instant) -> Result<Transition> {
        let target = action.target();
        if r.state == target && action.is_repeatable() {
            debug!(reservation_id = %r.id, state = %r.state, "repeated {}", action.verb());
            return Ok(Transition::Unchanged(r.clone()));
        }
        if !r.state.can_transition_to(target) {
            return Err(CoordinatorError::InvalidStateTransition {
                reservation_id: r.id.clone(),
                from: r.state,
                action: action.verb(),
            });
        }

        let from = r.state;
        r.state = target;
        r.transfer_in_flight = false;
        if let Action::Approve { port } = action {
            r.port = Some(port);
            r.approved_at = Some(now);
        }
        if from.is_active() && !target.is_active() {
            self.registry.release(&r.from_id, r.amount);
        }

        info!(reservation_id = %r.id, %from, to = %target, "reservation transition");
        Ok(Transition::Applied(r.clone()))
    }

    fn handle(&self, id: &str) -> Result<ReservationHandle> {
        self.reservations
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound(format!("reservation {id}")))
    }

    fn handles(&self) -> Vec<ReservationHandle> {
        self.reservations.read().values().cloned().collect()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
