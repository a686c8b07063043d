//! Configuration file for the `accord` binary
//!
//! Stored as JSON. Every field is optional in the file; missing fields take
//! the defaults below, all rooted at `~/.accord/`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AgreementResult;
use crate::service::DEFAULT_QUEUE_DEPTH;

/// Overrides [`Config::state_file`]
pub const STATE_ENV: &str = "ACCORD_STATE";
/// Overrides [`Config::identity_file`]
pub const IDENTITY_ENV: &str = "ACCORD_IDENTITY";

/// Runtime configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Processor state snapshot
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Local signing identity
    #[serde(default = "default_identity_file")]
    pub identity_file: PathBuf,
    /// `tracing` filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Bound on queued requests in the service
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

/// `~/.accord`, or `./.accord` when there is no home directory
pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".accord")
}

/// `~/.accord/config.json`
pub fn default_config_path() -> PathBuf {
    base_dir().join("config.json")
}

fn default_state_file() -> PathBuf {
    base_dir().join("state.json")
}

fn default_identity_file() -> PathBuf {
    base_dir().join("identity.key")
}

fn default_log_filter() -> String {
    "accord=info".to_string()
}

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            identity_file: default_identity_file(),
            log_filter: default_log_filter(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl Config {
    /// Read `path` (or the default location), then apply environment overrides.
    ///
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> AgreementResult<Self> {
        let path = path.map_or_else(default_config_path, Path::to_path_buf);
        let mut config = Self::from_file(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file without consulting the environment
    pub fn from_file(path: &Path) -> AgreementResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Replace paths with values from `lookup` where present and non-empty
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(state) = lookup(STATE_ENV) {
            self.state_file = PathBuf::from(state);
        }
        if let Some(identity) = lookup(IDENTITY_ENV) {
            self.identity_file = PathBuf::from(identity);
        }
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> AgreementResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}
