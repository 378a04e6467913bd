//! HTTP request/response bodies shared by the coordinator and the agent.
//!
//! Numeric inputs are signed on the request side so that a negative value
//! reaches validation and is reported as `invalid_argument` instead of being
//! lost in a deserialization failure.

use serde::{Deserialize, Serialize};

use crate::ReservationState;

/// Header carrying the caller's node identity.
pub const NODE_ID_HEADER: &str = "x-node-id";

// ════════════════════════════════════════════════════════════════════════════════
// NODES & OFFERS
// ════════════════════════════════════════════════════════════════════════════════

/// A registered storage node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub endpoint: String,
    /// Advertised capacity in MB.
    pub available_space: u64,
}

/// Body of `POST /register`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    pub endpoint: String,
    pub available_space: i64,
}

/// A node's uncommitted capacity as seen by discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub endpoint: String,
    pub free_space: u64,
}

// ════════════════════════════════════════════════════════════════════════════════
// RESERVATIONS
// ════════════════════════════════════════════════════════════════════════════════

/// Body of `POST /reserve`. `from_id` is the owner node, `to_id` the requester.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub from_id: String,
    pub to_id: String,
    pub amount: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveResponse {
    pub reservation_id: String,
}

/// Full reservation record as exposed by `GET /reservations/{id}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationView {
    pub reservation_id: String,
    pub from_id: String,
    pub to_id: String,
    pub amount: u64,
    pub state: ReservationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Unix milliseconds.
    pub created_at_ms: u64,
}

/// Entry of `GET /requests?for=ID`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub reservation_id: String,
    pub from_id: String,
    pub to_id: String,
    pub amount: u64,
}

/// Successful poll of `GET /requests/{id}?requester=ID`: where to connect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalInfo {
    pub reservation_id: String,
    pub state: ReservationState,
    /// Owner node endpoint as registered.
    pub endpoint: String,
    /// Port the owner listens on for the transfer.
    pub port: u16,
}

// ════════════════════════════════════════════════════════════════════════════════
// DECISIONS & TRANSFER
// ════════════════════════════════════════════════════════════════════════════════

/// Body of `POST /approve`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub reservation_id: String,
    pub port: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

/// Body of `POST /reject`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RejectRequest {
    pub reservation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

/// Body of `POST /send_file`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendFileRequest {
    pub reservation_id: String,
    pub client_id: String,
    /// Local source port hint; 0 lets the OS choose.
    pub port: i64,
    pub file_path: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// GENERIC RESPONSES
// ════════════════════════════════════════════════════════════════════════════════

/// Plain acknowledgement, e.g. `{"status": "approved"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn new(status: impl Into<String>) -> Self {
        Self { status: status.into() }
    }
}

/// Error body returned for every non-2xx response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable kind, e.g. `insufficient_capacity`.
    pub error: String,
    pub message: String,
    /// `true` when the same call may succeed later without changes.
    pub retryable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub nodes: usize,
    pub reservations: usize,
    pub active_reservations: usize,
}
