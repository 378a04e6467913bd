//! # PeerStash Coordinator Crate
//!
//! The coordinator is the rendezvous point of PeerStash. Nodes advertise
//! spare disk space, requesters reserve part of it, owners approve or reject,
//! and approved requesters push their file straight to the owner.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           COORDINATOR                                   │
//! │                                                                         │
//! │  ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐     │
//! │  │  OfferCatalog   │───▶│CapacityRegistry │◀───│ReservationLedger│     │
//! │  │ (Discovery)     │    │ (Nodes + Commit)│    │ (State Machine) │     │
//! │  └─────────────────┘    └────────▲────────┘    └───▲─────────▲───┘     │
//! │                                  │                 │         │         │
//! │                         endpoint │     approve     │         │ complete│
//! │                                  │     reject      │         │         │
//! │                         ┌────────┴────────┐        │  ┌──────┴──────┐  │
//! │                         │ ApprovalGateway │────────┘  │  Transfer   │  │
//! │                         │ (Owner/Poll)    │           │ Dispatcher  │  │
//! │                         └─────────────────┘           └──────┬──────┘  │
//! │                                                              │         │
//! │  ┌─────────────────┐                                         ▼         │
//! │  │  ExpirySweeper  │── expire ──▶ ledger          FileTransfer (TCP)   │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`registry`] | node table, committed capacity, optional JSON snapshot |
//! | [`offers`] | space-filtered discovery |
//! | [`ledger`] | reservations and their lifecycle |
//! | [`approval`] | owner decisions, requester polling |
//! | [`transfer`] | send-file validation and TCP push |
//! | [`expiry`] | background TTL sweeps |
//! | [`handlers`] | axum routes over [`Coordinator`] |
//! | [`config`] | layered configuration |

pub mod approval;
pub mod config;
pub mod error;
pub mod expiry;
pub mod handlers;
pub mod ledger;
pub mod offers;
pub mod registry;
pub mod transfer;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

pub use approval::{ApprovalGateway, Decision};
pub use config::{ConfigError, CoordinatorConfig};
pub use error::{CoordinatorError, Result};
pub use expiry::ExpirySweeper;
pub use handlers::{build_router, AppState};
pub use ledger::{Action, ExpiryPolicy, Reservation, ReservationLedger, Transition};
pub use offers::OfferCatalog;
pub use registry::CapacityRegistry;
pub use transfer::{FileTransfer, TcpFileTransfer, TransferDispatcher, TransferError, TransferRequest};

pub use peerstash_common::{ApprovalInfo, NodeInfo, Offer, PendingRequest, ReservationState};

// ════════════════════════════════════════════════════════════════════════════
// COORDINATOR STORE
// ════════════════════════════════════════════════════════════════════════════

/// Every registry the service owns, shared by all request handlers.
pub struct Coordinator {
    registry: Arc<CapacityRegistry>,
    ledger: Arc<ReservationLedger>,
    offers: OfferCatalog,
    approvals: ApprovalGateway,
    transfers: TransferDispatcher,
}

impl Coordinator {
    /// In-memory coordinator with default expiry, a TCP transport and the
    /// default transfer root.
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(CapacityRegistry::new()),
            ExpiryPolicy::default(),
            Arc::new(TcpFileTransfer::default()),
            CoordinatorConfig::default().transfer_root,
        )
    }

    /// `transfer_root` bounds which coordinator files `/send_file` may push.
    pub fn with_parts(
        registry: Arc<CapacityRegistry>,
        policy: ExpiryPolicy,
        transport: Arc<dyn FileTransfer>,
        transfer_root: impl Into<PathBuf>,
    ) -> Self {
        let ledger = Arc::new(ReservationLedger::new(Arc::clone(&registry), policy));
        Self {
            offers: OfferCatalog::new(Arc::clone(&registry)),
            approvals: ApprovalGateway::new(Arc::clone(&registry), Arc::clone(&ledger)),
            transfers: TransferDispatcher::new(
                Arc::clone(&registry),
                Arc::clone(&ledger),
                transport,
                transfer_root,
            ),
            registry,
            ledger,
        }
    }

    /// Build from configuration. Loads the node snapshot when one is set and
    /// creates the transfer root if it is missing.
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self> {
        let registry = match &config.nodes_snapshot_path {
            Some(path) => CapacityRegistry::with_snapshot(path)?,
            None => CapacityRegistry::new(),
        };
        std::fs::create_dir_all(&config.transfer_root).map_err(|e| {
            CoordinatorError::Persistence(format!(
                "create transfer root {}: {e}",
                config.transfer_root.display()
            ))
        })?;
        info!(root = %config.transfer_root.display(), "transfer root ready");
        Ok(Self::with_parts(
            Arc::new(registry),
            config.expiry_policy(),
            Arc::new(TcpFileTransfer::new(config.transfer_timeout)),
            config.transfer_root.clone(),
        ))
    }

    // ── registry ────────────────────────────────────────────────────────────

    pub fn register_node(&self, id: &str, endpoint: &str, available_space: i64) -> Result<NodeInfo> {
        self.registry.register(id, endpoint, available_space)
    }

    pub fn get_node(&self, id: &str) -> Result<NodeInfo> {
        self.registry.get(id)
    }

    pub fn list_nodes(&self) -> Vec<NodeInfo> {
        self.registry.list()
    }

    // ── offers ──────────────────────────────────────────────────────────────

    pub fn list_offers(&self, min_space: i64) -> Result<Vec<Offer>> {
        self.offers.list_offers(min_space)
    }

    // ── reservations ────────────────────────────────────────────────────────

    pub fn reserve(&self, from_id: &str, to_id: &str, amount: i64) -> Result<String> {
        self.ledger.reserve(from_id, to_id, amount)
    }

    pub fn reservation(&self, id: &str) -> Result<Reservation> {
        self.ledger.get(id)
    }

    // ── approval ────────────────────────────────────────────────────────────

    pub fn list_pending(&self, caller_id: &str, for_id: &str) -> Result<Vec<PendingRequest>> {
        self.approvals.list_pending(caller_id, for_id)
    }

    pub fn check_approved(&self, reservation_id: &str, requester_id: &str) -> Result<ApprovalInfo> {
        self.approvals.check_approved(reservation_id, requester_id)
    }

    pub fn approve(&self, reservation_id: &str, port: i64, owner_id: &str) -> Result<Decision> {
        self.approvals.approve(reservation_id, port, owner_id)
    }

    pub fn reject(&self, reservation_id: &str, owner_id: &str) -> Result<Decision> {
        self.approvals.reject(reservation_id, owner_id)
    }

    // ── transfer ────────────────────────────────────────────────────────────

    pub async fn initiate_transfer(
        &self,
        reservation_id: &str,
        client_id: &str,
        port: i64,
        file_path: &str,
    ) -> Result<u64> {
        self.transfers
            .initiate_transfer(reservation_id, client_id, port, file_path)
            .await
    }

    pub fn start_transfer(
        &self,
        reservation_id: &str,
        client_id: &str,
        port: i64,
        file_path: &str,
    ) -> Result<JoinHandle<Result<u64>>> {
        self.transfers
            .start_transfer(reservation_id, client_id, port, file_path)
    }

    // ── accessors ───────────────────────────────────────────────────────────

    pub fn registry(&self) -> &Arc<CapacityRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<ReservationLedger> {
        &self.ledger
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}
