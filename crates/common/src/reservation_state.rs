//! # Reservation State & Transitions
//!
//! Lifecycle states of a storage reservation and the closed set of
//! transitions between them.
//!
//! ## Transition Rules (Closed Set)
//!
//! ```text
//! From          → To             Trigger
//! ─────────────── ────────────── ──────────────────────────────
//! Pending       → Approved       Owner approves the request
//! Pending       → Rejected       Owner rejects the request
//! Pending       → Expired        Pending TTL elapsed
//! Approved      → Completed      File transfer succeeded
//! Approved      → Expired        Approved TTL elapsed
//! ```
//!
//! `Rejected`, `Completed` and `Expired` are terminal. Only `Pending` and
//! `Approved` reservations hold committed capacity on the owner node.

use serde::{Deserialize, Serialize};
use std::fmt;

// ════════════════════════════════════════════════════════════════════════════════
// RESERVATION STATE
// ════════════════════════════════════════════════════════════════════════════════

/// Lifecycle state of a reservation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    /// Created, waiting for the owner's decision.
    Pending,
    /// Owner approved; the requester may push the file.
    Approved,
    /// Owner declined the request.
    Rejected,
    /// The file was transferred.
    Completed,
    /// Timed out before it was approved or consumed.
    Expired,
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationState::Pending => write!(f, "pending"),
            ReservationState::Approved => write!(f, "approved"),
            ReservationState::Rejected => write!(f, "rejected"),
            ReservationState::Completed => write!(f, "completed"),
            ReservationState::Expired => write!(f, "expired"),
        }
    }
}

impl ReservationState {
    /// Returns whether a transition from `self` to `target` is allowed.
    ///
    /// Self-transitions are not transitions; callers that want idempotent
    /// behaviour compare states before asking.
    #[must_use]
    #[inline]
    pub const fn can_transition_to(&self, target: ReservationState) -> bool {
        matches!(
            (self, &target),
            (ReservationState::Pending, ReservationState::Approved)
                | (ReservationState::Pending, ReservationState::Rejected)
                | (ReservationState::Pending, ReservationState::Expired)
                | (ReservationState::Approved, ReservationState::Completed)
                | (ReservationState::Approved, ReservationState::Expired)
        )
    }

    /// Whether the reservation still holds committed capacity.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, ReservationState::Pending | ReservationState::Approved)
    }

    /// Whether no transition leaves this state.
    #[must_use]
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ReservationState; 5] = [
        ReservationState::Pending,
        ReservationState::Approved,
        ReservationState::Rejected,
        ReservationState::Completed,
        ReservationState::Expired,
    ];

    #[test]
    fn test_allowed_transitions() {
        assert!(ReservationState::Pending.can_transition_to(ReservationState::Approved));
        assert!(ReservationState::Pending.can_transition_to(ReservationState::Rejected));
        assert!(ReservationState::Pending.can_transition_to(ReservationState::Expired));
        assert!(ReservationState::Approved.can_transition_to(ReservationState::Completed));
        assert!(ReservationState::Approved.can_transition_to(ReservationState::Expired));
    }

    #[test]
    fn test_forbidden_skips() {
        assert!(!ReservationState::Pending.can_transition_to(ReservationState::Completed));
        assert!(!ReservationState::Approved.can_transition_to(ReservationState::Rejected));
        assert!(!ReservationState::Approved.can_transition_to(ReservationState::Pending));
    }

    #[test]
    fn test_no_self_transitions() {
        for state in ALL {
            assert!(!state.can_transition_to(state), "{state} -> {state}");
        }
    }

    #[test]
    fn test_terminal_states_have_no_exit() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_active_states() {
        assert!(ReservationState::Pending.is_active());
        assert!(ReservationState::Approved.is_active());
        assert!(ReservationState::Rejected.is_terminal());
        assert!(ReservationState::Completed.is_terminal());
        assert!(ReservationState::Expired.is_terminal());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&ReservationState::Approved).unwrap();
        assert_eq!(json, "\"approved\"");
        let back: ReservationState = serde_json::from_str("\"expired\"").unwrap();
        assert_eq!(back, ReservationState::Expired);
    }

    #[test]
    fn test_display_matches_serde() {
        for state in ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json.trim_matches('"'), state.to_string());
        }
    }
}
