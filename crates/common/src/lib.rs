//! # PeerStash Common Crate
//!
//! Types shared by the coordinator service and the agent CLI.
//!
//! ## Modules
//! - `reservation_state`: reservation lifecycle and its closed transition set
//! - `api`: HTTP request/response bodies
//! - `config`: TOML config file loader
//!
//! ## Reservation Lifecycle
//! ```text
//!            approve            complete
//! Pending ───────────▶ Approved ─────────▶ Completed
//!    │                    │
//!    │ reject             │ timeout
//!    ▼                    ▼
//! Rejected             Expired ◀── timeout ── Pending
//! ```

pub mod api;
pub mod config;
pub mod reservation_state;

pub use api::{
    ApprovalInfo, ApproveRequest, ErrorBody, HealthResponse, NodeInfo, Offer, PendingRequest,
    RegisterRequest, RejectRequest, ReservationView, ReserveRequest, ReserveResponse,
    SendFileRequest, StatusResponse, NODE_ID_HEADER,
};
pub use config::FileConfig;
pub use reservation_state::ReservationState;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
