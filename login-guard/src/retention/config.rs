//! Audit retention configuration
//!
//! Loaded from the `[retention]` section of config.toml.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum age of an audit event before deletion
pub const DEFAULT_RETENTION_DAYS: u64 = 90;

const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 86_400;
const DEFAULT_LEASE_TTL_SECS: u64 = 300;
// Largest day count chrono can represent
const MAX_RETENTION_DAYS: i64 = i64::MAX / 86_400_000;

/// Audit retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Run the scheduled pruner (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Retention horizon in days
    #[serde(
        default = "default_retention_days",
        deserialize_with = "crate::config::lenient_u64"
    )]
    pub retention_days: u64,

    /// Seconds between scheduled pruning runs (default: daily)
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,

    /// How long one instance holds the pruning lease
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Write expired events to JSONL files here before deleting them
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
}

impl RetentionConfig {
    /// Retention horizon as a chrono duration
    pub fn horizon(&self) -> chrono::Duration {
        let days = i64::try_from(self.retention_days)
            .unwrap_or(i64::MAX)
            .min(MAX_RETENTION_DAYS);
        chrono::Duration::days(days)
    }

    /// Interval between scheduled runs
    pub fn prune_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.prune_interval_secs)
    }

    /// Pruning lease lifetime
    pub fn lease_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lease_ttl_secs)
    }

    /// Replace invalid values with their defaults
    ///
    /// Returns one message per replaced value.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.retention_days == 0 {
            warnings.push(format!(
                "retention.retention_days must be a positive integer, using default {}",
                DEFAULT_RETENTION_DAYS
            ));
            self.retention_days = DEFAULT_RETENTION_DAYS;
        }
        if self.prune_interval_secs == 0 {
            warnings.push(format!(
                "retention.prune_interval_secs must be greater than 0, using default {}",
                DEFAULT_PRUNE_INTERVAL_SECS
            ));
            self.prune_interval_secs = DEFAULT_PRUNE_INTERVAL_SECS;
        }
        if self.lease_ttl_secs == 0 {
            warnings.push(format!(
                "retention.lease_ttl_secs must be greater than 0, using default {}",
                DEFAULT_LEASE_TTL_SECS
            ));
            self.lease_ttl_secs = DEFAULT_LEASE_TTL_SECS;
        }

        warnings
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: default_retention_days(),
            prune_interval_secs: default_prune_interval_secs(),
            lease_ttl_secs: default_lease_ttl_secs(),
            archive_dir: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u64 {
    DEFAULT_RETENTION_DAYS
}

fn default_prune_interval_secs() -> u64 {
    DEFAULT_PRUNE_INTERVAL_SECS
}

fn default_lease_ttl_secs() -> u64 {
    DEFAULT_LEASE_TTL_SECS
}
