//! Store configuration
//!
//! Configuration is immutable once a store is opened. The bucket name is
//! captured here rather than held in a global so several stores can coexist
//! in one process.
//!
//! Example `policydb.json`:
//!
//! ```json
//! {
//!   "path": "/var/lib/policydb/policies.redb",
//!   "bucket": "policies",
//!   "batch": { "enabled": true, "max_calls": 1000 }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the bucket holding all policies.
pub const DEFAULT_BUCKET: &str = "policies";

/// Configuration errors. These only arise while loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Batching of concurrent write calls into shared transactions.
///
/// When disabled, every batched call runs in its own write transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_enabled")]
    pub enabled: bool,
    /// Maximum number of calls committed by one transaction.
    #[serde(default = "default_max_calls")]
    pub max_calls: usize,
}

fn default_batch_enabled() -> bool {
    true
}

fn default_max_calls() -> usize {
    1000
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: default_batch_enabled(),
            max_calls: default_max_calls(),
        }
    }
}

impl BatchConfig {
    /// Create config with batching enabled.
    pub fn enabled(max_calls: usize) -> Self {
        Self {
            enabled: true,
            max_calls,
        }
    }

    /// Create config with batching disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Configuration of a policy store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file. Created on open if missing.
    pub path: PathBuf,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default)]
    pub batch: BatchConfig,
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

impl StoreConfig {
    /// Config for a database file with default bucket and batching.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            bucket: default_bucket(),
            batch: BatchConfig::default(),
        }
    }

    /// Replace the batch settings.
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: StoreConfig = serde_json::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("path must not be empty".into()));
        }

        if self.bucket.is_empty() {
            return Err(ConfigError::Invalid("bucket must not be empty".into()));
        }

        if self.batch.max_calls == 0 {
            return Err(ConfigError::Invalid("batch.max_calls must be > 0".into()));
        }

        Ok(())
    }
}
