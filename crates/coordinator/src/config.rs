//! Coordinator configuration.
//!
//! Layers, lowest to highest precedence:
//!
//! 1. built-in defaults
//! 2. TOML file named by `PEERSTASH_CONFIG`
//! 3. environment variables (a `.env` file is loaded first if present;
//!    `PEERSTASH_ENV_FILE` overrides its path)

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use peerstash_common::config::load_from_file;
use peerstash_common::FileConfig;

use crate::ledger::ExpiryPolicy;

pub const CONFIG_PATH_VAR: &str = "PEERSTASH_CONFIG";
pub const ENV_FILE_VAR: &str = "PEERSTASH_ENV_FILE";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_PENDING_TTL_SECS: u64 = 15 * 60;
const DEFAULT_APPROVED_TTL_SECS: u64 = 60 * 60;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;
const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TRANSFER_ROOT: &str = "outbox";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    File { path: String, reason: String },

    #[error("{key} has invalid value {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    /// `None` disables pending expiry.
    pub pending_ttl: Option<Duration>,
    /// `None` disables approved expiry.
    pub approved_ttl: Option<Duration>,
    pub sweep_interval: Duration,
    pub nodes_snapshot_path: Option<PathBuf>,
    pub transfer_timeout: Duration,
    /// `/send_file` paths resolve inside this directory and may not leave it.
    pub transfer_root: PathBuf,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            pending_ttl: ttl(DEFAULT_PENDING_TTL_SECS),
            approved_ttl: ttl(DEFAULT_APPROVED_TTL_SECS),
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            nodes_snapshot_path: None,
            transfer_timeout: Duration::from_secs(DEFAULT_TRANSFER_TIMEOUT_SECS),
            transfer_root: PathBuf::from(DEFAULT_TRANSFER_ROOT),
        }
    }
}

impl CoordinatorConfig {
    /// Load from the process environment (and the optional config file).
    pub fn load() -> Result<Self, ConfigError> {
        load_env_file();
        let file = match env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => {
                load_from_file(&path).map_err(|e| ConfigError::File {
                    path: path.clone(),
                    reason: e.to_string(),
                })?
            }
            _ => FileConfig::default(),
        };
        let config = Self::from_lookup(file, |key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `file` then every variable `lookup` knows on top of the defaults.
    pub fn from_lookup<F>(file: FileConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = get("COORDINATOR_HOST")
            .or(file.host)
            .unwrap_or(defaults.host);
        let port = parsed(&get, "COORDINATOR_PORT")?
            .or(file.port)
            .unwrap_or(defaults.port);
        let pending_ttl_secs = parsed(&get, "PENDING_TTL_SECS")?
            .or(file.pending_ttl_secs)
            .unwrap_or(DEFAULT_PENDING_TTL_SECS);
        let approved_ttl_secs = parsed(&get, "APPROVED_TTL_SECS")?
            .or(file.approved_ttl_secs)
            .unwrap_or(DEFAULT_APPROVED_TTL_SECS);
        let sweep_interval_ms = parsed(&get, "SWEEP_INTERVAL_MS")?
            .or(file.sweep_interval_ms)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_MS);
        let nodes_snapshot_path = get("NODES_SNAPSHOT_PATH")
            .or(file.nodes_snapshot_path)
            .map(PathBuf::from);
        let transfer_timeout_secs = parsed(&get, "TRANSFER_TIMEOUT_SECS")?
            .or(file.transfer_timeout_secs)
            .unwrap_or(DEFAULT_TRANSFER_TIMEOUT_SECS);
        let transfer_root = get("TRANSFER_ROOT")
            .or(file.transfer_root)
            .map(PathBuf::from)
            .unwrap_or(defaults.transfer_root);

        Ok(Self {
            host,
            port,
            pending_ttl: ttl(pending_ttl_secs),
            approved_ttl: ttl(approved_ttl_secs),
            sweep_interval: Duration::from_millis(sweep_interval_ms),
            nodes_snapshot_path,
            transfer_timeout: Duration::from_secs(transfer_timeout_secs),
            transfer_root,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation("host cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Validation("port cannot be 0".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Validation("sweep interval cannot be 0".into()));
        }
        if self.transfer_timeout.is_zero() {
            return Err(ConfigError::Validation("transfer timeout cannot be 0".into()));
        }
        if self.transfer_root.as_os_str().is_empty() {
            return Err(ConfigError::Validation("transfer root cannot be empty".into()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: "COORDINATOR_HOST",
            value: self.host.clone(),
        })
    }

    pub fn expiry_policy(&self) -> ExpiryPolicy {
        ExpiryPolicy {
            pending_ttl: self.pending_ttl,
            approved_ttl: self.approved_ttl,
        }
    }
}

/// Load a dotenv file into the process environment. A missing file is fine.
pub fn load_env_file() -> Option<PathBuf> {
    let env_file = env::var(ENV_FILE_VAR).unwrap_or_else(|_| ".env".to_string());
    match dotenvy::from_filename(&env_file) {
        Ok(path) => Some(path),
        Err(e) => {
            if !matches!(e, dotenvy::Error::Io(_)) {
                eprintln!("warning: failed to load {env_file}: {e}");
            }
            None
        }
    }
}

fn ttl(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn parsed<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
