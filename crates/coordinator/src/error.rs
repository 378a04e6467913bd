//! Coordinator error taxonomy and its HTTP mapping.
//!
//! | Kind | HTTP | Retryable |
//! |------|------|-----------|
//! | `InvalidArgument` | 400 | no |
//! | `NotFound` | 404 | no |
//! | `NotApproved` | 404 | yes |
//! | `Unauthorized` | 403 | no |
//! | `InsufficientCapacity` | 409 | yes |
//! | `InvalidStateTransition` | 409 | no |
//! | `TransferInProgress` | 409 | yes |
//! | `Gone` | 410 | no |
//! | `TransferFailed` | 502 | yes |
//! | `Persistence` | 500 | yes |

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use peerstash_common::{ErrorBody, ReservationState};

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Errors reported by every coordinator operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Malformed or out-of-range input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown node or reservation.
    #[error("{0} not found")]
    NotFound(String),

    /// Caller identity does not match the resource owner.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The node cannot hold the requested amount right now.
    #[error("insufficient capacity on node {node_id}: requested {requested} MB, free {free} MB")]
    InsufficientCapacity {
        node_id: String,
        requested: u64,
        free: u64,
    },

    /// The reservation is not in a state that allows the action.
    #[error("cannot {action} reservation {reservation_id} in state {from}")]
    InvalidStateTransition {
        reservation_id: String,
        from: ReservationState,
        action: &'static str,
    },

    /// Another push for the same reservation has not finished yet.
    #[error("a transfer for reservation {0} is already running")]
    TransferInProgress(String),

    /// Polling outcome: the owner has not decided yet.
    #[error("reservation {0} is not approved yet")]
    NotApproved(String),

    /// Polling outcome: the reservation was rejected or expired.
    #[error("reservation {reservation_id} is {state}")]
    Gone {
        reservation_id: String,
        state: ReservationState,
    },

    /// The file-transfer collaborator failed; the reservation stays approved.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// The node snapshot could not be written or read.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl CoordinatorError {
    /// Stable machine-readable kind used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::InvalidArgument(_) => "invalid_argument",
            CoordinatorError::NotFound(_) => "not_found",
            CoordinatorError::Unauthorized(_) => "unauthorized",
            CoordinatorError::InsufficientCapacity { .. } => "insufficient_capacity",
            CoordinatorError::InvalidStateTransition { .. } => "invalid_state_transition",
            CoordinatorError::TransferInProgress(_) => "transfer_in_progress",
            CoordinatorError::NotApproved(_) => "not_approved",
            CoordinatorError::Gone { .. } => "gone",
            CoordinatorError::TransferFailed(_) => "transfer_failed",
            CoordinatorError::Persistence(_) => "persistence",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CoordinatorError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::NotFound(_) | CoordinatorError::NotApproved(_) => {
                StatusCode::NOT_FOUND
            }
            CoordinatorError::Unauthorized(_) => StatusCode::FORBIDDEN,
            CoordinatorError::InsufficientCapacity { .. }
            | CoordinatorError::InvalidStateTransition { .. }
            | CoordinatorError::TransferInProgress(_) => StatusCode::CONFLICT,
            CoordinatorError::Gone { .. } => StatusCode::GONE,
            CoordinatorError::TransferFailed(_) => StatusCode::BAD_GATEWAY,
            CoordinatorError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// `true` when the caller may repeat the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::InsufficientCapacity { .. }
                | CoordinatorError::NotApproved(_)
                | CoordinatorError::TransferInProgress(_)
                | CoordinatorError::TransferFailed(_)
                | CoordinatorError::Persistence(_)
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_body())).into_response()
    }
}

impl From<JsonRejection> for CoordinatorError {
    fn from(rejection: JsonRejection) -> Self {
        CoordinatorError::InvalidArgument(rejection.body_text())
    }
}

impl From<QueryRejection> for CoordinatorError {
    fn from(rejection: QueryRejection) -> Self {
        CoordinatorError::InvalidArgument(rejection.body_text())
    }
}
