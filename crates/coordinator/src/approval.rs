//! Approval gateway: owner-facing listing and decisions, requester-facing
//! polling.

use std::sync::Arc;

use tracing::info;

use peerstash_common::{ApprovalInfo, PendingRequest, ReservationState};

use crate::error::{CoordinatorError, Result};
use crate::ledger::{Action, ReservationLedger};
use crate::registry::CapacityRegistry;

/// Outcome of an owner decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The reservation changed state.
    Recorded,
    /// The same decision had already been recorded.
    AlreadyRecorded,
}

#[derive(Clone)]
pub struct ApprovalGateway {
    registry: Arc<CapacityRegistry>,
    ledger: Arc<ReservationLedger>,
}

impl ApprovalGateway {
    pub fn new(registry: Arc<CapacityRegistry>, ledger: Arc<ReservationLedger>) -> Self {
        Self { registry, ledger }
    }

    /// Pending requests against `for_id`, oldest first. Only the node itself
    /// may look.
    pub fn list_pending(&self, caller_id: &str, for_id: &str) -> Result<Vec<PendingRequest>> {
        if caller_id != for_id {
            return Err(CoordinatorError::Unauthorized(format!(
                "{caller_id} may not list requests for {for_id}"
            )));
        }
        if self.registry.get(for_id).is_err() {
            return Err(CoordinatorError::Unauthorized(format!(
                "{for_id} is not a registered node"
            )));
        }
        Ok(self
            .ledger
            .pending_for(for_id)
            .into_iter()
            .map(|r| PendingRequest {
                reservation_id: r.id,
                from_id: r.from_id,
                to_id: r.to_id,
                amount: r.amount,
            })
            .collect())
    }

    /// Requester poll. `NotApproved` while the owner has not decided, `Gone`
    /// once the reservation was rejected or expired.
    pub fn check_approved(&self, reservation_id: &str, requester_id: &str) -> Result<ApprovalInfo> {
        let r = self.ledger.get(reservation_id)?;
        if r.to_id != requester_id {
            return Err(CoordinatorError::Unauthorized(format!(
                "{requester_id} did not request reservation {reservation_id}"
            )));
        }
        match r.state {
            ReservationState::Pending => Err(CoordinatorError::NotApproved(r.id)),
            ReservationState::Rejected | ReservationState::Expired => Err(CoordinatorError::Gone {
                reservation_id: r.id,
                state: r.state,
            }),
            ReservationState::Approved | ReservationState::Completed => {
                let endpoint = self.registry.get(&r.from_id)?.endpoint;
                Ok(ApprovalInfo {
                    port: r.port.unwrap_or_default(),
                    reservation_id: r.id,
                    state: r.state,
                    endpoint,
                })
            }
        }
    }

    /// Owner approval. Repeating it is a no-op that keeps the first port.
    pub fn approve(&self, reservation_id: &str, port: i64, approver_id: &str) -> Result<Decision> {
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                CoordinatorError::InvalidArgument(format!("port must be in 1..=65535, got {port}"))
            })?;
        self.authorize_owner(reservation_id, approver_id)?;

        let outcome = self.ledger.transition(reservation_id, Action::Approve { port })?;
        let decision = decision_of(outcome.was_applied());
        if decision == Decision::Recorded {
            info!(reservation_id, port, "reservation approved by owner");
        }
        Ok(decision)
    }

    /// Owner rejection. Frees the committed capacity immediately.
    pub fn reject(&self, reservation_id: &str, approver_id: &str) -> Result<Decision> {
        self.authorize_owner(reservation_id, approver_id)?;
        let outcome = self.ledger.transition(reservation_id, Action::Reject)?;
        let decision = decision_of(outcome.was_applied());
        if decision == Decision::Recorded {
            info!(reservation_id, "reservation rejected by owner");
        }
        Ok(decision)
    }

    fn authorize_owner(&self, reservation_id: &str, approver_id: &str) -> Result<()> {
        let r = self.ledger.get(reservation_id)?;
        if approver_id != r.from_id {
            return Err(CoordinatorError::Unauthorized(format!(
                "{approver_id:?} does not own reservation {reservation_id}"
            )));
        }
        Ok(())
    }
}

fn decision_of(applied: bool) -> Decision {
    if applied {
        Decision::Recorded
    } else {
        Decision::AlreadyRecorded
    }
}
