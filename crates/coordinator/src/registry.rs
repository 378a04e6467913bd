//! Capacity registry: registered nodes and their committed capacity.
//!
//! Each node lives behind its own mutex. The ledger takes that mutex to run
//! the capacity check and the commit as one step, so reservations against
//! one node serialize while different nodes never contend.
//!
//! Lock order: node table → node account. Nothing waits on the node table
//! while holding a node account.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use peerstash_common::NodeInfo;

use crate::error::{CoordinatorError, Result};

/// Node info plus the capacity currently held by active reservations.
#[derive(Debug)]
pub(crate) struct NodeAccount {
    pub(crate) info: NodeInfo,
    pub(crate) committed: u64,
}

impl NodeAccount {
    pub(crate) fn free_space(&self) -> u64 {
        self.info.available_space.saturating_sub(self.committed)
    }
}

pub(crate) type NodeHandle = Arc<Mutex<NodeAccount>>;

/// On-disk shape of the node table.
#[derive(Debug, Default, Serialize, Deserialize)]
struct NodeSnapshot {
    nodes: BTreeMap<String, NodeInfo>,
}

pub struct CapacityRegistry {
    nodes: RwLock<HashMap<String, NodeHandle>>,
    snapshot_path: Option<PathBuf>,
    // serializes snapshot writers
    persist_lock: Mutex<()>,
}

impl CapacityRegistry {
    /// In-memory registry.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            snapshot_path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Registry backed by a JSON snapshot. Existing nodes are loaded; a
    /// missing file starts empty.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let loaded = load_snapshot(&path)?;
        info!(path = %path.display(), nodes = loaded.len(), "loaded node snapshot");

        let nodes = loaded
            .into_iter()
            .map(|(id, info)| {
                let account = NodeAccount { info, committed: 0 };
                (id, Arc::new(Mutex::new(account)))
            })
            .collect();

        Ok(Self {
            nodes: RwLock::new(nodes),
            snapshot_path: Some(path),
            persist_lock: Mutex::new(()),
        })
    }

    /// Register or update a node (last write wins).
    ///
    /// Existing commitments survive re-registration; if the new capacity is
    /// below them the node simply shows no free space until they release.
    ///
    /// The in-memory update is applied before the snapshot is written. When
    /// the write fails the node stays registered and `Persistence` is
    /// returned; repeating the same registration is safe and rewrites the
    /// whole table.
    pub fn register(&self, id: &str, endpoint: &str, available_space: i64) -> Result<NodeInfo> {
        if id.trim().is_empty() {
            return Err(CoordinatorError::InvalidArgument("node id must not be empty".into()));
        }
        if endpoint.trim().is_empty() {
            return Err(CoordinatorError::InvalidArgument("endpoint must not be empty".into()));
        }
        let available_space = u64::try_from(available_space).map_err(|_| {
            CoordinatorError::InvalidArgument(format!(
                "available_space must be >= 0, got {available_space}"
            ))
        })?;

        let info = NodeInfo {
            id: id.to_string(),
            endpoint: endpoint.to_string(),
            available_space,
        };

        {
            let mut nodes = self.nodes.write();
            match nodes.entry(id.to_string()) {
                Entry::Occupied(slot) => {
                    let mut account = slot.get().lock();
                    if account.committed > available_space {
                        warn!(
                            node_id = id,
                            committed = account.committed,
                            available_space,
                            "re-registration below committed capacity"
                        );
                    }
                    account.info = info.clone();
                    info!(node_id = id, available_space, "node re-registered");
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Mutex::new(NodeAccount {
                        info: info.clone(),
                        committed: 0,
                    })));
                    info!(node_id = id, endpoint, available_space, "node registered");
                }
            }
        }

        if let Some(path) = &self.snapshot_path {
            if let Err(e) = self.save_snapshot(path) {
                warn!(node_id = id, error = %e, "node registered but snapshot not written");
                return Err(CoordinatorError::Persistence(format!(
                    "node {id} registered in memory, snapshot not written ({e}); retry is safe"
                )));
            }
        }
        Ok(info)
    }

    pub fn get(&self, id: &str) -> Result<NodeInfo> {
        self.handle(id)
            .map(|h| h.lock().info.clone())
            .ok_or_else(|| CoordinatorError::NotFound(format!("node {id}")))
    }

    /// Capacity held by active reservations against `id`.
    pub fn committed(&self, id: &str) -> Result<u64> {
        self.handle(id)
            .map(|h| h.lock().committed)
            .ok_or_else(|| CoordinatorError::NotFound(format!("node {id}")))
    }

    /// Advertised capacity minus active commitments.
    pub fn free_space(&self, id: &str) -> Result<u64> {
        self.handle(id)
            .map(|h| h.lock().free_space())
            .ok_or_else(|| CoordinatorError::NotFound(format!("node {id}")))
    }

    /// All nodes, sorted by id.
    pub fn list(&self) -> Vec<NodeInfo> {
        let mut out: Vec<NodeInfo> = self
            .handles()
            .into_iter()
            .map(|h| h.lock().info.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub(crate) fn handle(&self, id: &str) -> Option<NodeHandle> {
        self.nodes.read().get(id).cloned()
    }

    pub(crate) fn handles(&self) -> Vec<NodeHandle> {
        self.nodes.read().values().cloned().collect()
    }

    /// Give back capacity held by a reservation that left the active set.
    pub(crate) fn release(&self, id: &str, amount: u64) {
        match self.handle(id) {
            Some(handle) => {
                let mut account = handle.lock();
                account.committed = account.committed.saturating_sub(amount);
                debug!(node_id = id, amount, committed = account.committed, "capacity released");
            }
            None => warn!(node_id = id, amount, "release for unknown node"),
        }
    }

    /// Write the node table to `path` (write to a temp file, then rename).
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let _guard = self.persist_lock.lock();
        let snapshot = NodeSnapshot {
            nodes: self.list().into_iter().map(|n| (n.id.clone(), n)).collect(),
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| CoordinatorError::Persistence(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .and_then(|_| fs::rename(&tmp, path))
            .map_err(|e| {
                CoordinatorError::Persistence(format!("write {}: {e}", path.display()))
            })?;
        debug!(path = %path.display(), nodes = snapshot.nodes.len(), "node snapshot written");
        Ok(())
    }
}

impl Default for CapacityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn load_snapshot(path: &Path) -> Result<BTreeMap<String, NodeInfo>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| CoordinatorError::Persistence(format!("read {}: {e}", path.display())))?;
    let snapshot: NodeSnapshot = serde_json::from_str(&raw)
        .map_err(|e| CoordinatorError::Persistence(format!("parse {}: {e}", path.display())))?;
    Ok(snapshot.nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let r = CapacityRegistry::new();
        let info = r.register("A", "127.0.0.1:9002", 1000).unwrap();
        assert_eq!(info.available_space, 1000);
        assert_eq!(r.get("A").unwrap(), info);
        assert_eq!(r.free_space("A").unwrap(), 1000);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let r = CapacityRegistry::new();
        assert!(matches!(r.get("ghost"), Err(CoordinatorError::NotFound(_))));
    }

    #[test]
    fn test_negative_space_rejected() {
        let r = CapacityRegistry::new();
        let err = r.register("A", "h:1", -1).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidArgument(_)));
        assert!(r.is_empty());
    }

    #[test]
    fn test_empty_id_and_endpoint_rejected() {
        let r = CapacityRegistry::new();
        assert!(matches!(r.register("", "h:1", 1), Err(CoordinatorError::InvalidArgument(_))));
        assert!(matches!(r.register("A", " ", 1), Err(CoordinatorError::InvalidArgument(_))));
    }

    #[test]
    fn test_zero_space_is_valid() {
        let r = CapacityRegistry::new();
        assert!(r.register("A", "h:1", 0).is_ok());
        assert_eq!(r.free_space("A").unwrap(), 0);
    }

    #[test]
    fn test_reregister_last_write_wins_and_keeps_commitments() {
        let r = CapacityRegistry::new();
        r.register("A", "h:1", 1000).unwrap();
        r.handle("A").unwrap().lock().committed = 400;

        r.register("A", "h:2", 500).unwrap();
        let info = r.get("A").unwrap();
        assert_eq!(info.endpoint, "h:2");
        assert_eq!(info.available_space, 500);
        assert_eq!(r.committed("A").unwrap(), 400);
        assert_eq!(r.free_space("A").unwrap(), 100);

        // shrinking below commitments saturates to zero
        r.register("A", "h:2", 100).unwrap();
        assert_eq!(r.free_space("A").unwrap(), 0);
    }

    #[test]
    fn test_release_saturates() {
        let r = CapacityRegistry::new();
        r.register("A", "h:1", 10).unwrap();
        r.handle("A").unwrap().lock().committed = 5;
        r.release("A", 8);
        assert_eq!(r.committed("A").unwrap(), 0);
    }

    #[test]
    fn test_list_sorted_by_id() {
        let r = CapacityRegistry::new();
        r.register("c", "h:3", 1).unwrap();
        r.register("a", "h:1", 1).unwrap();
        r.register("b", "h:2", 1).unwrap();
        let ids: Vec<String> = r.list().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_snapshot_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");

        let r = CapacityRegistry::with_snapshot(&path).unwrap();
        assert!(r.is_empty());
        r.register("Alice", "127.0.0.1:9002", 50).unwrap();
        r.register("Bob", "127.0.0.1:9003", 100).unwrap();
        assert!(path.exists());

        let reloaded = CapacityRegistry::with_snapshot(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("Bob").unwrap().available_space, 100);
        assert_eq!(reloaded.committed("Bob").unwrap(), 0);
    }

    #[test]
    fn test_snapshot_failure_keeps_registration() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let r = CapacityRegistry::with_snapshot(blocker.join("nodes.json")).unwrap();

        let err = r.register("A", "h:1", 10).unwrap_err();
        assert!(matches!(err, CoordinatorError::Persistence(_)));
        assert!(err.is_retryable());
        assert_eq!(r.get("A").unwrap().available_space, 10);

        // a retry leaves exactly one entry behind
        assert!(r.register("A", "h:1", 10).is_err());
        assert_eq!(r.len(), 1);
        assert_eq!(r.committed("A").unwrap(), 0);
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            CapacityRegistry::with_snapshot(&path),
            Err(CoordinatorError::Persistence(_))
        ));
    }
}
