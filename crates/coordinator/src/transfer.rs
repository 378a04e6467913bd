//! # Transfer Dispatcher
//!
//! Validates a requester's send request against its reservation and hands
//! the byte stream to a [`FileTransfer`] collaborator.
//!
//! ```text
//! send_file(rid, client_id, port, file_path)
//!     │
//!     ├─ reservation exists?            ─ no ─► NotFound
//!     ├─ client_id == to_id?            ─ no ─► Unauthorized
//!     ├─ state == Approved?             ─ no ─► InvalidStateTransition
//!     ├─ path safe, file present, fits? ─ no ─► InvalidArgument / NotFound
//!     ├─ path inside transfer root?     ─ no ─► Unauthorized
//!     ├─ no other push running?         ─ no ─► TransferInProgress
//!     │
//!     ▼
//! FileTransfer::transfer(owner host : approved port)
//!     ├─ Ok  ─► mark_completed
//!     └─ Err ─► claim dropped, stays Approved, TransferFailed
//! ```
//!
//! `file_path` names a file on the coordinator host, relative to the
//! configured transfer root. Absolute paths are accepted only when they
//! already point inside the root, and symlinks are resolved before the check.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpSocket;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use peerstash_common::ReservationState;

use crate::error::{CoordinatorError, Result};
use crate::ledger::ReservationLedger;
use crate::registry::CapacityRegistry;

const BYTES_PER_MB: u64 = 1024 * 1024;

// ════════════════════════════════════════════════════════════════════════════
// TRANSPORT
// ════════════════════════════════════════════════════════════════════════════

/// A validated transfer, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub reservation_id: String,
    pub source: PathBuf,
    /// `host:port` of the owner's receiver.
    pub target: String,
    /// Local source port; 0 lets the OS choose.
    pub local_port: u16,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("transfer timed out after {0:?}")]
    Timeout(Duration),
}

/// Moves file bytes to the owner node. Returns the number of bytes sent.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn transfer(&self, request: &TransferRequest) -> std::result::Result<u64, TransferError>;
}

/// Plain TCP push: connect, stream the file, shut down the write half.
#[derive(Debug, Clone)]
pub struct TcpFileTransfer {
    timeout: Duration,
}

impl TcpFileTransfer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn push(request: &TransferRequest) -> std::result::Result<u64, TransferError> {
        let addr = tokio::net::lookup_host(request.target.as_str())
            .await?
            .next()
            .ok_or_else(|| TransferError::Resolve(request.target.clone()))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if request.local_port != 0 {
            let local = if addr.is_ipv4() {
                SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), request.local_port)
            } else {
                SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), request.local_port)
            };
            socket.set_reuseaddr(true)?;
            socket.bind(local)?;
        }

        let mut stream = socket.connect(addr).await?;
        let mut file = tokio::fs::File::open(&request.source).await?;
        let sent = tokio::io::copy(&mut file, &mut stream).await?;
        stream.shutdown().await?;
        Ok(sent)
    }
}

impl Default for TcpFileTransfer {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl FileTransfer for TcpFileTransfer {
    async fn transfer(&self, request: &TransferRequest) -> std::result::Result<u64, TransferError> {
        tokio::time::timeout(self.timeout, Self::push(request))
            .await
            .map_err(|_| TransferError::Timeout(self.timeout))?
    }
}

/// Host part of a `host:port` endpoint. Bracketed IPv6 keeps its brackets.
pub fn endpoint_host(endpoint: &str) -> &str {
    let endpoint = endpoint.trim();
    if endpoint.starts_with('[') {
        return match endpoint.find(']') {
            Some(end) => &endpoint[..=end],
            None => endpoint,
        };
    }
    match endpoint.rsplit_once(':') {
        // a bare IPv6 address has more than one colon and no port
        Some((host, _)) if !host.contains(':') => host,
        _ => endpoint,
    }
}

// ════════════════════════════════════════════════════════════════════════════
// DISPATCHER
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct TransferDispatcher {
    registry: Arc<CapacityRegistry>,
    ledger: Arc<ReservationLedger>,
    transport: Arc<dyn FileTransfer>,
    root: PathBuf,
}

impl TransferDispatcher {
    pub fn new(
        registry: Arc<CapacityRegistry>,
        ledger: Arc<ReservationLedger>,
        transport: Arc<dyn FileTransfer>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            ledger,
            transport,
            root: root.into(),
        }
    }

    /// Check every precondition, claim the reservation and build the
    /// transport request. The claim must be released by [`Self::run`].
    fn prepare(
        &self,
        reservation_id: &str,
        client_id: &str,
        port: i64,
        file_path: &str,
    ) -> Result<TransferRequest> {
        let r = self.ledger.get(reservation_id)?;
        if r.to_id != client_id {
            return Err(CoordinatorError::Unauthorized(format!(
                "{client_id} did not request reservation {reservation_id}"
            )));
        }
        let approved_port = match (r.state, r.port) {
            (ReservationState::Approved, Some(p)) => p,
            _ => {
                return Err(CoordinatorError::InvalidStateTransition {
                    reservation_id: r.id,
                    from: r.state,
                    action: "transfer",
                })
            }
        };
        let local_port = u16::try_from(port).map_err(|_| {
            CoordinatorError::InvalidArgument(format!("port must be in 0..=65535, got {port}"))
        })?;

        let source = resolve_source(&self.root, file_path)?;
        let size = std::fs::metadata(&source)
            .map_err(|_| CoordinatorError::NotFound(format!("file {file_path}")))?
            .len();
        if size > r.amount.saturating_mul(BYTES_PER_MB) {
            return Err(CoordinatorError::InvalidArgument(format!(
                "file is {size} bytes, reservation holds {} MB",
                r.amount
            )));
        }

        let owner = self.registry.get(&r.from_id)?;
        let target = format!("{}:{approved_port}", endpoint_host(&owner.endpoint));
        self.ledger.begin_transfer(&r.id)?;
        Ok(TransferRequest {
            reservation_id: r.id,
            source,
            target,
            local_port,
        })
    }

    /// Validate, transfer, and complete the reservation. On transport failure
    /// the reservation stays Approved so the caller can retry.
    pub async fn initiate_transfer(
        &self,
        reservation_id: &str,
        client_id: &str,
        port: i64,
        file_path: &str,
    ) -> Result<u64> {
        let request = self.prepare(reservation_id, client_id, port, file_path)?;
        self.run(request).await
    }

    /// Validate now, transfer on a background task.
    pub fn start_transfer(
        &self,
        reservation_id: &str,
        client_id: &str,
        port: i64,
        file_path: &str,
    ) -> Result<JoinHandle<Result<u64>>> {
        let request = self.prepare(reservation_id, client_id, port, file_path)?;
        let dispatcher = self.clone();
        Ok(tokio::spawn(async move { dispatcher.run(request).await }))
    }

    async fn run(&self, request: TransferRequest) -> Result<u64> {
        info!(
            reservation_id = %request.reservation_id,
            target = %request.target,
            source = %request.source.display(),
            "transfer started"
        );
        match self.transport.transfer(&request).await {
            Ok(sent) => match self.ledger.mark_completed(&request.reservation_id) {
                Ok(_) => {
                    info!(reservation_id = %request.reservation_id, bytes = sent, "transfer completed");
                    Ok(sent)
                }
                Err(e) => {
                    // bytes are already at the owner
                    error!(
                        reservation_id = %request.reservation_id,
                        bytes = sent,
                        error = %e,
                        "transfer delivered but reservation was no longer approved"
                    );
                    Err(e)
                }
            },
            Err(e) => {
                self.ledger.end_transfer(&request.reservation_id);
                error!(reservation_id = %request.reservation_id, error = %e, "transfer failed");
                Err(CoordinatorError::TransferFailed(e.to_string()))
            }
        }
    }
}

/// Resolve `file_path` inside `root`, following symlinks.
fn resolve_source(root: &Path, file_path: &str) -> Result<PathBuf> {
    if file_path.trim().is_empty() {
        return Err(CoordinatorError::InvalidArgument("file_path must not be empty".into()));
    }
    let path = Path::new(file_path);
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(CoordinatorError::InvalidArgument(format!(
            "file_path must not contain '..': {file_path}"
        )));
    }

    let canonical_root = root.canonicalize().map_err(|e| {
        CoordinatorError::Persistence(format!("transfer root {}: {e}", root.display()))
    })?;
    if path.is_absolute() && !path.starts_with(root) && !path.starts_with(&canonical_root) {
        warn!(file_path, root = %canonical_root.display(), "send request outside transfer root");
        return Err(outside_root(file_path));
    }

    let source = canonical_root
        .join(path)
        .canonicalize()
        .map_err(|_| CoordinatorError::NotFound(format!("file {file_path}")))?;
    if !source.starts_with(&canonical_root) {
        warn!(file_path, resolved = %source.display(), "send request resolves outside transfer root");
        return Err(outside_root(file_path));
    }
    if !source.is_file() {
        return Err(CoordinatorError::NotFound(format!("file {file_path}")));
    }
    Ok(source)
}

fn outside_root(file_path: &str) -> CoordinatorError {
    CoordinatorError::Unauthorized(format!("{file_path} is outside the transfer root"))
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ExpiryPolicy;
    use parking_lot::Mutex;
    use tokio::io::AsyncReadExt;
    use tokio::sync::Notify;

    /// Records requests; fails while `fail` is set.
    #[derive(Default)]
    struct MockTransfer {
        fail: Mutex<bool>,
        seen: Mutex<Vec<TransferRequest>>,
    }

    #[async_trait]
    impl FileTransfer for MockTransfer {
        async fn transfer(
            &self,
            request: &TransferRequest,
        ) -> std::result::Result<u64, TransferError> {
            self.seen.lock().push(request.clone());
            if *self.fail.lock() {
                return Err(TransferError::Resolve(request.target.clone()));
            }
            Ok(std::fs::metadata(&request.source)?.len())
        }
    }

    /// Holds every push open until `release` is notified.
    #[derive(Default)]
    struct GatedTransfer {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl FileTransfer for GatedTransfer {
        async fn transfer(
            &self,
            request: &TransferRequest,
        ) -> std::result::Result<u64, TransferError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(std::fs::metadata(&request.source)?.len())
        }
    }

    struct Fixture<T> {
        ledger: Arc<ReservationLedger>,
        registry: Arc<CapacityRegistry>,
        transport: Arc<T>,
        dispatcher: TransferDispatcher,
        dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture<MockTransfer> {
        fixture_with(MockTransfer::default(), ExpiryPolicy::disabled())
    }

    fn fixture_with<T: FileTransfer + 'static>(transport: T, policy: ExpiryPolicy) -> Fixture<T> {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(CapacityRegistry::new());
        registry.register("A", "10.0.0.1:9002", 1000).unwrap();
        let ledger = Arc::new(ReservationLedger::new(Arc::clone(&registry), policy));
        let transport = Arc::new(transport);
        let dispatcher = TransferDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            Arc::clone(&transport) as Arc<dyn FileTransfer>,
            dir.path(),
        );
        Fixture {
            ledger,
            registry,
            transport,
            dispatcher,
            dir,
        }
    }

    impl<T> Fixture<T> {
        fn approved(&self, amount: i64) -> String {
            let id = self.ledger.reserve("A", "B", amount).unwrap();
            self.ledger.mark_approved(&id, 9000).unwrap();
            id
        }

        /// Writes `name` under the transfer root and returns its absolute path.
        fn file(&self, name: &str, bytes: &[u8]) -> String {
            let path = self.dir.path().join(name);
            std::fs::write(&path, bytes).unwrap();
            path.to_string_lossy().into_owned()
        }
    }

    #[test]
    fn test_endpoint_host() {
        assert_eq!(endpoint_host("10.0.0.1:9002"), "10.0.0.1");
        assert_eq!(endpoint_host("node.local:80"), "node.local");
        assert_eq!(endpoint_host("node.local"), "node.local");
        assert_eq!(endpoint_host("[::1]:9002"), "[::1]");
        assert_eq!(endpoint_host("::1"), "::1");
    }

    #[tokio::test]
    async fn test_success_completes_and_releases() {
        let f = fixture();
        let id = f.approved(400);
        let path = f.file("a.txt", b"hello");

        let sent = f.dispatcher.initiate_transfer(&id, "B", 0, &path).await.unwrap();
        assert_eq!(sent, 5);
        assert_eq!(f.ledger.state(&id).unwrap(), ReservationState::Completed);
        assert_eq!(f.registry.committed("A").unwrap(), 0);

        let seen = f.transport.seen.lock();
        assert_eq!(seen[0].target, "10.0.0.1:9000");
        assert_eq!(seen[0].local_port, 0);
    }

    #[tokio::test]
    async fn test_failure_keeps_approved_and_allows_retry() {
        let f = fixture();
        let id = f.approved(10);
        let path = f.file("a.txt", b"data");
        *f.transport.fail.lock() = true;

        let err = f.dispatcher.initiate_transfer(&id, "B", 0, &path).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::TransferFailed(_)));
        assert!(err.is_retryable());
        assert_eq!(f.ledger.state(&id).unwrap(), ReservationState::Approved);
        assert_eq!(f.registry.committed("A").unwrap(), 10);

        *f.transport.fail.lock() = false;
        f.dispatcher.initiate_transfer(&id, "B", 0, &path).await.unwrap();
        assert_eq!(f.ledger.state(&id).unwrap(), ReservationState::Completed);
    }

    #[tokio::test]
    async fn test_preconditions() {
        let f = fixture();
        let path = f.file("a.txt", b"data");

        assert!(matches!(
            f.dispatcher.initiate_transfer("nope", "B", 0, &path).await,
            Err(CoordinatorError::NotFound(_))
        ));

        let pending = f.ledger.reserve("A", "B", 10).unwrap();
        assert!(matches!(
            f.dispatcher.initiate_transfer(&pending, "B", 0, &path).await,
            Err(CoordinatorError::InvalidStateTransition { .. })
        ));

        let id = f.approved(10);
        assert!(matches!(
            f.dispatcher.initiate_transfer(&id, "C", 0, &path).await,
            Err(CoordinatorError::Unauthorized(_))
        ));
        assert!(matches!(
            f.dispatcher.initiate_transfer(&id, "B", 70_000, &path).await,
            Err(CoordinatorError::InvalidArgument(_))
        ));
        assert!(f.transport.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_completed_cannot_transfer_again() {
        let f = fixture();
        let id = f.approved(10);
        let path = f.file("a.txt", b"data");
        f.dispatcher.initiate_transfer(&id, "B", 0, &path).await.unwrap();
        assert!(matches!(
            f.dispatcher.initiate_transfer(&id, "B", 0, &path).await,
            Err(CoordinatorError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_path_checks() {
        let f = fixture();
        let id = f.approved(10);
        assert!(matches!(
            f.dispatcher.prepare(&id, "B", 0, "../etc/passwd"),
            Err(CoordinatorError::InvalidArgument(_))
        ));
        let missing = f.dir.path().join("missing.bin");
        assert!(matches!(
            f.dispatcher.prepare(&id, "B", 0, &missing.to_string_lossy()),
            Err(CoordinatorError::NotFound(_))
        ));
        assert!(matches!(
            f.dispatcher.prepare(&id, "B", 0, ""),
            Err(CoordinatorError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_paths_resolve_inside_root_only() {
        let f = fixture();
        let id = f.approved(10);
        f.file("inside.txt", b"ok");

        let request = f.dispatcher.prepare(&id, "B", 0, "inside.txt").unwrap();
        assert_eq!(request.source, f.dir.path().canonicalize().unwrap().join("inside.txt"));
        f.ledger.end_transfer(&id);

        for outside in ["/etc/passwd", "/etc/hostname", "/"] {
            assert!(
                matches!(
                    f.dispatcher.prepare(&id, "B", 0, outside),
                    Err(CoordinatorError::Unauthorized(_))
                ),
                "{outside} should be refused"
            );
        }
        assert!(!f.ledger.get(&id).unwrap().transfer_in_flight);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_is_refused() {
        let f = fixture();
        let id = f.approved(10);
        let elsewhere = tempfile::tempdir().unwrap();
        let secret = elsewhere.path().join("secret.txt");
        std::fs::write(&secret, b"keep out").unwrap();
        std::os::unix::fs::symlink(&secret, f.dir.path().join("link.txt")).unwrap();

        assert!(matches!(
            f.dispatcher.prepare(&id, "B", 0, "link.txt"),
            Err(CoordinatorError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_missing_root_is_server_error() {
        let registry = Arc::new(CapacityRegistry::new());
        registry.register("A", "10.0.0.1:9002", 1000).unwrap();
        let ledger = Arc::new(ReservationLedger::new(
            Arc::clone(&registry),
            ExpiryPolicy::disabled(),
        ));
        let dispatcher = TransferDispatcher::new(
            registry,
            Arc::clone(&ledger),
            Arc::new(MockTransfer::default()),
            "/nonexistent/peerstash/outbox",
        );
        let id = ledger.reserve("A", "B", 10).unwrap();
        ledger.mark_approved(&id, 9000).unwrap();
        assert!(matches!(
            dispatcher.prepare(&id, "B", 0, "a.txt"),
            Err(CoordinatorError::Persistence(_))
        ));
    }

    #[test]
    fn test_file_larger_than_reservation_rejected() {
        let f = fixture();
        let id = f.approved(1);
        let path = f.file("big.bin", &vec![0u8; (BYTES_PER_MB + 1) as usize]);
        assert!(matches!(
            f.dispatcher.prepare(&id, "B", 0, &path),
            Err(CoordinatorError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_start_transfer_runs_in_background() {
        let f = fixture();
        let id = f.approved(10);
        let path = f.file("a.txt", b"data");
        let handle = f.dispatcher.start_transfer(&id, "B", 0, &path).unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), 4);
        assert_eq!(f.ledger.state(&id).unwrap(), ReservationState::Completed);
    }

    #[tokio::test]
    async fn test_start_transfer_validates_synchronously() {
        let f = fixture();
        let id = f.approved(10);
        assert!(matches!(
            f.dispatcher.start_transfer(&id, "B", 0, "../x"),
            Err(CoordinatorError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_second_push_refused_while_first_runs() {
        let f = fixture_with(GatedTransfer::default(), ExpiryPolicy::disabled());
        let id = f.approved(10);
        let path = f.file("a.txt", b"data");

        let first = f.dispatcher.start_transfer(&id, "B", 0, &path).unwrap();
        f.transport.started.notified().await;

        let err = f.dispatcher.start_transfer(&id, "B", 0, &path).unwrap_err();
        assert_eq!(err, CoordinatorError::TransferInProgress(id.clone()));
        assert!(err.is_retryable());

        f.transport.release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), 4);
        assert_eq!(f.ledger.state(&id).unwrap(), ReservationState::Completed);
        assert!(matches!(
            f.dispatcher.start_transfer(&id, "B", 0, &path),
            Err(CoordinatorError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_expiry_waits_for_running_push() {
        let policy = ExpiryPolicy {
            pending_ttl: None,
            approved_ttl: Some(Duration::from_secs(10)),
        };
        let f = fixture_with(GatedTransfer::default(), policy);
        let id = f.approved(10);
        let path = f.file("a.txt", b"data");

        let push = f.dispatcher.start_transfer(&id, "B", 0, &path).unwrap();
        f.transport.started.notified().await;
        let later = std::time::Instant::now() + Duration::from_secs(11);
        assert!(f.ledger.sweep_expired(later).is_empty());

        f.transport.release.notify_one();
        push.await.unwrap().unwrap();
        assert_eq!(f.ledger.state(&id).unwrap(), ReservationState::Completed);
        assert_eq!(f.registry.committed("A").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_forced_expiry_during_push_reports_state() {
        let f = fixture_with(GatedTransfer::default(), ExpiryPolicy::disabled());
        let id = f.approved(10);
        let path = f.file("a.txt", b"data");

        let push = f.dispatcher.start_transfer(&id, "B", 0, &path).unwrap();
        f.transport.started.notified().await;
        f.ledger.mark_expired(&id).unwrap();
        f.transport.release.notify_one();

        assert!(matches!(
            push.await.unwrap(),
            Err(CoordinatorError::InvalidStateTransition {
                from: ReservationState::Expired,
                ..
            })
        ));
        assert_eq!(f.ledger.state(&id).unwrap(), ReservationState::Expired);
        assert_eq!(f.registry.committed("A").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tcp_transfer_delivers_bytes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let receiver = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("payload.bin");
        std::fs::write(&source, b"peer to peer").unwrap();

        let transport = TcpFileTransfer::new(Duration::from_secs(5));
        let sent = transport
            .transfer(&TransferRequest {
                reservation_id: "r1".into(),
                source,
                target: addr.to_string(),
                local_port: 0,
            })
            .await
            .unwrap();
        assert_eq!(sent, 12);
        assert_eq!(receiver.await.unwrap(), b"peer to peer");
    }

    #[tokio::test]
    async fn test_tcp_transfer_refused_is_error() {
        // bind then drop to get a port with nothing listening
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("p.bin");
        std::fs::write(&source, b"x").unwrap();

        let transport = TcpFileTransfer::new(Duration::from_secs(5));
        let result = transport
            .transfer(&TransferRequest {
                reservation_id: "r1".into(),
                source,
                target: addr.to_string(),
                local_port: 0,
            })
            .await;
        assert!(result.is_err());
    }
}
