//! Config file loader using TOML and serde.
//!
//! Every field is optional; the coordinator layers environment variables on
//! top of whatever the file provides.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::Result;

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Bind host for the HTTP API (e.g. "127.0.0.1").
    pub host: Option<String>,

    /// Bind port for the HTTP API.
    pub port: Option<u16>,

    /// Seconds a reservation may stay pending. 0 disables expiry.
    pub pending_ttl_secs: Option<u64>,

    /// Seconds an approved reservation may wait for its transfer. 0 disables expiry.
    pub approved_ttl_secs: Option<u64>,

    /// Expiry sweep period in milliseconds.
    pub sweep_interval_ms: Option<u64>,

    /// Where the node table is persisted (JSON). Absent means in-memory only.
    pub nodes_snapshot_path: Option<String>,

    /// Upper bound for a single file transfer, in seconds.
    pub transfer_timeout_secs: Option<u64>,

    /// Directory the coordinator may send files from.
    pub transfer_root: Option<String>,
}

/// Load config from a TOML file path.
/// If file is missing or parse fails, an error is returned.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<FileConfig> {
    let s = fs::read_to_string(path.as_ref())?;
    let cfg: FileConfig = toml::from_str(&s)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_empty() {
        let def = FileConfig::default();
        assert!(def.host.is_none());
        assert!(def.nodes_snapshot_path.is_none());
    }

    #[test]
    fn test_load_from_file_partial() {
        use std::io::Write;
        let tmp = tempfile::NamedTempFile::new().expect("temp file");
        let toml = r#"
            host = "0.0.0.0"
            port = 8100
            pending_ttl_secs = 60
            nodes_snapshot_path = "./nodes.json"
        "#;
        let mut f = tmp.reopen().expect("reopen");
        write!(f, "{}", toml).expect("write");
        let cfg = load_from_file(tmp.path()).expect("load");
        assert_eq!(cfg.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cfg.port, Some(8100));
        assert_eq!(cfg.pending_ttl_secs, Some(60));
        assert_eq!(cfg.approved_ttl_secs, None);
        assert_eq!(cfg.nodes_snapshot_path.as_deref(), Some("./nodes.json"));
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_from_file(dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_unknown_type_fails() {
        use std::io::Write;
        let tmp = tempfile::NamedTempFile::new().expect("temp file");
        let mut f = tmp.reopen().expect("reopen");
        write!(f, "port = \"not-a-number\"").expect("write");
        assert!(load_from_file(tmp.path()).is_err());
    }
}
