//! Login throttle configuration
//!
//! Configures the failure threshold, counting window and block logging policy.

use serde::{Deserialize, Serialize};

/// Failures inside the window that block an identity
pub const DEFAULT_THRESHOLD: u32 = 5;
/// Trailing window over which failures are counted
pub const DEFAULT_WINDOW_MINUTES: u64 = 15;

const DEFAULT_WARNING_THRESHOLD: u32 = 3;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;

/// Login throttle configuration
///
/// # Example (config.toml)
///
/// ```toml
/// [throttle]
/// enabled = true
/// threshold = 5
/// window_minutes = 15
/// warning_threshold = 3
/// log_every_rejection = false
/// store_timeout_ms = 2000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ThrottleConfig {
    /// Whether throttling is enforced
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Failed attempts inside the window that block further attempts
    #[serde(
        default = "default_threshold",
        deserialize_with = "crate::config::lenient_u32"
    )]
    pub threshold: u32,

    /// Window in minutes during which failed attempts are counted
    #[serde(
        default = "default_window_minutes",
        deserialize_with = "crate::config::lenient_u64"
    )]
    pub window_minutes: u64,

    /// Failure count that fires an `ApproachingThreshold` notification (0 = disabled)
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: u32,

    /// Append a `LOGIN_RATE_LIMITED` event for every rejected attempt
    /// instead of once per transition into the blocked state
    #[serde(default)]
    pub log_every_rejection: bool,

    /// Deadline for a single audit store call, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl ThrottleConfig {
    /// Create a configuration with the given threshold and window
    pub fn new(threshold: u32, window_minutes: u64) -> Self {
        Self {
            threshold,
            window_minutes,
            ..Self::default()
        }
    }

    /// Counting window as a chrono duration
    pub fn window(&self) -> chrono::Duration {
        let minutes = i64::try_from(self.window_minutes)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 60_000);
        chrono::Duration::minutes(minutes)
    }

    /// Store call deadline
    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_timeout_ms)
    }

    /// Validate the configuration, returning an error message if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.threshold == 0 {
            return Err("threshold must be greater than 0".to_string());
        }
        if self.window_minutes == 0 {
            return Err("window_minutes must be greater than 0".to_string());
        }
        if self.store_timeout_ms == 0 {
            return Err("store_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Replace invalid values with their defaults
    ///
    /// Returns one message per replaced value.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.threshold == 0 {
            warnings.push(format!(
                "throttle.threshold must be a positive integer, using default {}",
                DEFAULT_THRESHOLD
            ));
            self.threshold = DEFAULT_THRESHOLD;
        }
        if self.window_minutes == 0 {
            warnings.push(format!(
                "throttle.window_minutes must be a positive integer, using default {}",
                DEFAULT_WINDOW_MINUTES
            ));
            self.window_minutes = DEFAULT_WINDOW_MINUTES;
        }
        if self.store_timeout_ms == 0 {
            warnings.push(format!(
                "throttle.store_timeout_ms must be greater than 0, using default {}",
                DEFAULT_STORE_TIMEOUT_MS
            ));
            self.store_timeout_ms = DEFAULT_STORE_TIMEOUT_MS;
        }
        if self.warning_threshold >= self.threshold {
            warnings.push(format!(
                "throttle.warning_threshold ({}) must be below threshold ({}), disabling warnings",
                self.warning_threshold, self.threshold
            ));
            self.warning_threshold = 0;
        }

        warnings
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            window_minutes: default_window_minutes(),
            warning_threshold: default_warning_threshold(),
            log_every_rejection: false,
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

fn default_window_minutes() -> u64 {
    DEFAULT_WINDOW_MINUTES
}

fn default_warning_threshold() -> u32 {
    DEFAULT_WARNING_THRESHOLD
}

fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}
