//! HTTP handlers for the PeerStash coordinator.
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/register` | POST | Register or update a node |
//! | `/nodes/{id}` | GET | Single node info |
//! | `/offers?min_space=N` | GET | Nodes with at least N MB free |
//! | `/reserve` | POST | Create a pending reservation |
//! | `/reservations/{id}` | GET | Reservation snapshot |
//! | `/requests/{id}?requester=ID` | GET | Requester poll |
//! | `/requests?for=ID` | GET | Owner's pending requests |
//! | `/approve` | POST | Owner approval |
//! | `/requests/{id}/approve` | POST | Owner approval, id in path |
//! | `/reject` | POST | Owner rejection |
//! | `/send_file` | POST | Start the file push |
//! | `/health` | GET | Liveness and counters |
//!
//! Owner routes (`/requests?for=`, approve, reject) need a caller identity:
//! `X-Node-Id` for listing, `owner_id` or `X-Node-Id` for decisions. A
//! request without one is refused with 403.
//!
//! Every failure is a [`CoordinatorError`] rendered as
//! `{error, message, retryable}`.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::{error, warn};

use peerstash_common::{
    ApprovalInfo, ApproveRequest, HealthResponse, NodeInfo, Offer, PendingRequest,
    RegisterRequest, RejectRequest, ReservationView, ReserveRequest, ReserveResponse,
    SendFileRequest, StatusResponse, NODE_ID_HEADER,
};

use crate::error::{CoordinatorError, Result};
use crate::Coordinator;

pub struct AppState {
    pub coordinator: Coordinator,
}

impl AppState {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// QUERY / PATH BODIES
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct OffersQuery {
    #[serde(default)]
    pub min_space: i64,
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub requester: String,
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    #[serde(rename = "for")]
    pub for_id: String,
}

/// Body of `POST /requests/{id}/approve`.
#[derive(Debug, Deserialize)]
pub struct ApproveByPathReq {
    pub port: i64,
    #[serde(default)]
    pub owner_id: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════
// HANDLERS
// ════════════════════════════════════════════════════════════════════════════

pub async fn register_node(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>> {
    let Json(req) = logged("register", payload.map_err(CoordinatorError::from))?;
    logged(
        "register",
        state
            .coordinator
            .register_node(&req.id, &req.endpoint, req.available_space),
    )?;
    Ok(Json(StatusResponse::new("registered")))
}

pub async fn get_node(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<NodeInfo>> {
    logged("get_node", state.coordinator.get_node(&id)).map(Json)
}

pub async fn list_offers(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<OffersQuery>, QueryRejection>,
) -> Result<Json<Vec<Offer>>> {
    let Query(q) = logged("offers", query.map_err(CoordinatorError::from))?;
    logged("offers", state.coordinator.list_offers(q.min_space)).map(Json)
}

pub async fn reserve(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ReserveRequest>, JsonRejection>,
) -> Result<Json<ReserveResponse>> {
    let Json(req) = logged("reserve", payload.map_err(CoordinatorError::from))?;
    let reservation_id = logged(
        "reserve",
        state
            .coordinator
            .reserve(&req.from_id, &req.to_id, req.amount),
    )?;
    Ok(Json(ReserveResponse { reservation_id }))
}

pub async fn get_reservation(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReservationView>> {
    logged("get_reservation", state.coordinator.reservation(&id)).map(|r| Json(r.view()))
}

pub async fn poll_request(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<PollQuery>, QueryRejection>,
) -> Result<Json<ApprovalInfo>> {
    let Query(q) = logged("poll", query.map_err(CoordinatorError::from))?;
    logged("poll", state.coordinator.check_approved(&id, &q.requester)).map(Json)
}

pub async fn list_pending(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: std::result::Result<Query<PendingQuery>, QueryRejection>,
) -> Result<Json<Vec<PendingRequest>>> {
    let Query(q) = logged("list_pending", query.map_err(CoordinatorError::from))?;
    let caller = logged("list_pending", required_identity(None, &headers))?;
    logged("list_pending", state.coordinator.list_pending(&caller, &q.for_id)).map(Json)
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<ApproveRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>> {
    let Json(req) = logged("approve", payload.map_err(CoordinatorError::from))?;
    let owner = logged("approve", required_identity(req.owner_id, &headers))?;
    logged(
        "approve",
        state.coordinator.approve(&req.reservation_id, req.port, &owner),
    )?;
    Ok(Json(StatusResponse::new("approved")))
}

pub async fn approve_by_path(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<ApproveByPathReq>, JsonRejection>,
) -> Result<Json<StatusResponse>> {
    let Json(req) = logged("approve", payload.map_err(CoordinatorError::from))?;
    let owner = logged("approve", required_identity(req.owner_id, &headers))?;
    logged("approve", state.coordinator.approve(&id, req.port, &owner))?;
    Ok(Json(StatusResponse::new("approved")))
}

pub async fn reject(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<RejectRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>> {
    let Json(req) = logged("reject", payload.map_err(CoordinatorError::from))?;
    let owner = logged("reject", required_identity(req.owner_id, &headers))?;
    logged("reject", state.coordinator.reject(&req.reservation_id, &owner))?;
    Ok(Json(StatusResponse::new("rejected")))
}

/// Validates synchronously, then pushes the file on a background task.
pub async fn send_file(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<SendFileRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>> {
    let Json(req) = logged("send_file", payload.map_err(CoordinatorError::from))?;
    // detached; the dispatcher logs the outcome
    let _task = logged(
        "send_file",
        state.coordinator.start_transfer(
            &req.reservation_id,
            &req.client_id,
            req.port,
            &req.file_path,
        ),
    )?;
    Ok(Json(StatusResponse::new("transfer_started")))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let c = &state.coordinator;
    Json(HealthResponse {
        status: "ok".to_string(),
        nodes: c.registry().len(),
        reservations: c.ledger().len(),
        active_reservations: c.ledger().active_count(),
    })
}

// ════════════════════════════════════════════════════════════════════════════
// ROUTER
// ════════════════════════════════════════════════════════════════════════════

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/register", post(register_node))
        .route("/nodes/{id}", get(get_node))
        .route("/offers", get(list_offers))
        .route("/reserve", post(reserve))
        .route("/reservations/{id}", get(get_reservation))
        .route("/requests", get(list_pending))
        .route("/requests/{id}", get(poll_request))
        .route("/requests/{id}/approve", post(approve_by_path))
        .route("/approve", post(approve))
        .route("/reject", post(reject))
        .route("/send_file", post(send_file))
        .route("/health", get(health_check))
        .with_state(state)
}

fn caller_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(NODE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Body-supplied identity first, then `X-Node-Id`. Neither is a 403.
fn required_identity(body: Option<String>, headers: &HeaderMap) -> Result<String> {
    body.map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .or_else(|| caller_id(headers))
        .ok_or_else(|| {
            CoordinatorError::Unauthorized(format!(
                "caller identity required (owner_id or {NODE_ID_HEADER} header)"
            ))
        })
}

fn logged<T>(op: &'static str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        match e {
            CoordinatorError::TransferFailed(_) | CoordinatorError::Persistence(_) => {
                error!(op, kind = e.kind(), error = %e, "request failed")
            }
            _ => warn!(op, kind = e.kind(), error = %e, "request rejected"),
        }
    }
    result
}
