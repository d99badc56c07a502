//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Deployment variables: `LOGIN_FAILURE_THRESHOLD`, `LOGIN_FAILURE_WINDOW_MINUTES`,
//!    `AUTH_LOG_RETENTION_DAYS`
//! 2. Environment variables (prefix: `LOGIN_GUARD_`, nesting separator `__`)
//! 3. Current working directory: ./config.toml
//! 4. XDG config directory: ~/.config/login-guard/config.toml
//! 5. System directory: /etc/login-guard/config.toml
//! 6. Default values
//!
//! Non-positive or non-numeric throttle and retention settings never abort
//! startup. They fall back to their defaults and the fallback is recorded in
//! [`Config::startup_warnings`], which the server logs once tracing is up.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize,
};
use std::fmt;
use std::path::PathBuf;

use crate::error::Result;
use crate::retention::RetentionConfig;
use crate::throttle::ThrottleConfig;

/// Failure threshold override (positive integer)
pub const ENV_FAILURE_THRESHOLD: &str = "LOGIN_FAILURE_THRESHOLD";
/// Failure window override in minutes (positive integer)
pub const ENV_FAILURE_WINDOW_MINUTES: &str = "LOGIN_FAILURE_WINDOW_MINUTES";
/// Audit retention override in days (positive integer)
pub const ENV_RETENTION_DAYS: &str = "AUTH_LOG_RETENTION_DAYS";

const APP_DIR: &str = "login-guard";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Login throttling configuration
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Audit retention configuration
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Audit store selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Database configuration (required by the `postgres` backend)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Redis configuration (required by the `redis` backend)
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// Fallbacks applied while loading, logged at startup
    #[serde(skip)]
    pub startup_warnings: Vec<String>,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Stable identifier of this instance, used as the pruning lease holder
    ///
    /// A random identifier is generated when unset.
    #[serde(default)]
    pub instance_id: Option<String>,
}

/// Which backend holds the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on restart
    Memory,
    /// Append-only JSON-lines file
    Jsonl,
    /// PostgreSQL table (requires the `database` feature)
    Postgres,
    /// Redis sorted sets (requires the `cache` feature)
    Redis,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Jsonl => write!(f, "jsonl"),
            Self::Postgres => write!(f, "postgres"),
            Self::Redis => write!(f, "redis"),
        }
    }
}

/// Audit store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend kind
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Log file for the `jsonl` backend
    #[serde(default = "default_log_path")]
    pub path: PathBuf,

    /// Key prefix for the `redis` backend
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_log_path(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum idle connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Maximum retry attempts for establishing database connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: usize,

    /// Maximum retry attempts for establishing Redis connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_backend() -> StorageBackend {
    StorageBackend::Jsonl
}

fn default_log_path() -> PathBuf {
    PathBuf::from("auth_log.jsonl")
}

fn default_key_prefix() -> String {
    "login-guard".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_redis_max_connections() -> usize {
    20
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2
}

/// Accepts integers and numeric strings. Anything else, including negative
/// numbers, becomes `0`, which `sanitize` replaces with the default.
struct LenientCountVisitor;

impl<'de> Visitor<'de> for LenientCountVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a positive integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<u64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<u64, E> {
        Ok(u64::try_from(v).unwrap_or(0))
    }

    fn visit_f64<E: de::Error>(self, _v: f64) -> std::result::Result<u64, E> {
        Ok(0)
    }

    fn visit_bool<E: de::Error>(self, _v: bool) -> std::result::Result<u64, E> {
        Ok(0)
    }

    fn visit_char<E: de::Error>(self, _v: char) -> std::result::Result<u64, E> {
        Ok(0)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<u64, E> {
        Ok(v.trim().parse::<u64>().unwrap_or(0))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<u64, E> {
        Ok(0)
    }
}

// Field-specific deserializers for `#[serde(deserialize_with = "...")]`.

pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientCountVisitor)
}

pub(crate) fn lenient_u32<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = deserializer.deserialize_any(LenientCountVisitor)?;
    Ok(u32::try_from(value).unwrap_or(u32::MAX))
}

/// Outcome of reading one of the deployment variables
#[derive(Debug, PartialEq, Eq)]
enum EnvSetting {
    Unset,
    Valid(u64),
    Invalid(String),
}

fn positive_env(name: &str) -> EnvSetting {
    match std::env::var(name) {
        Err(_) => EnvSetting::Unset,
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(value) if value > 0 => EnvSetting::Valid(value as u64),
            _ => EnvSetting::Invalid(raw),
        },
    }
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Searches for config files in this order (first found wins):
    /// 1. Current working directory: ./config.toml
    /// 2. XDG config directory: ~/.config/login-guard/config.toml
    /// 3. System directory: /etc/login-guard/config.toml
    pub fn load() -> Result<Self> {
        let config_paths = Self::find_config_paths();

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Lowest priority first so higher priority files override
        for path in config_paths.iter().rev() {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        Self::finish(figment)
    }

    /// Load configuration from a specific file
    ///
    /// Bypasses the XDG and system directories. Useful for tests and
    /// non-standard deployments.
    pub fn load_from(path: &str) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path));

        Self::finish(figment)
    }

    fn finish(figment: Figment) -> Result<Self> {
        let mut config: Config = figment
            .merge(Env::prefixed("LOGIN_GUARD_").split("__"))
            .extract()?;

        config.apply_deployment_env();

        let mut warnings = std::mem::take(&mut config.startup_warnings);
        warnings.extend(config.throttle.sanitize());
        warnings.extend(config.retention.sanitize());
        config.startup_warnings = warnings;

        Ok(config)
    }

    /// Apply the three deployment variables on top of the layered config
    fn apply_deployment_env(&mut self) {
        match positive_env(ENV_FAILURE_THRESHOLD) {
            EnvSetting::Valid(v) => {
                self.throttle.threshold = u32::try_from(v).unwrap_or(u32::MAX);
            }
            EnvSetting::Invalid(raw) => {
                self.throttle.threshold = crate::throttle::config::DEFAULT_THRESHOLD;
                self.startup_warnings.push(format!(
                    "{}={:?} is not a positive integer, using default {}",
                    ENV_FAILURE_THRESHOLD,
                    raw,
                    crate::throttle::config::DEFAULT_THRESHOLD
                ));
            }
            EnvSetting::Unset => {}
        }

        match positive_env(ENV_FAILURE_WINDOW_MINUTES) {
            EnvSetting::Valid(v) => self.throttle.window_minutes = v,
            EnvSetting::Invalid(raw) => {
                self.throttle.window_minutes = crate::throttle::config::DEFAULT_WINDOW_MINUTES;
                self.startup_warnings.push(format!(
                    "{}={:?} is not a positive integer, using default {}",
                    ENV_FAILURE_WINDOW_MINUTES,
                    raw,
                    crate::throttle::config::DEFAULT_WINDOW_MINUTES
                ));
            }
            EnvSetting::Unset => {}
        }

        match positive_env(ENV_RETENTION_DAYS) {
            EnvSetting::Valid(v) => self.retention.retention_days = v,
            EnvSetting::Invalid(raw) => {
                self.retention.retention_days = crate::retention::config::DEFAULT_RETENTION_DAYS;
                self.startup_warnings.push(format!(
                    "{}={:?} is not a positive integer, using default {}",
                    ENV_RETENTION_DAYS,
                    raw,
                    crate::retention::config::DEFAULT_RETENTION_DAYS
                ));
            }
            EnvSetting::Unset => {}
        }
    }

    /// Log fallbacks recorded during loading
    ///
    /// Call after tracing is initialized.
    pub fn log_startup_warnings(&self) {
        for warning in &self.startup_warnings {
            tracing::warn!("Invalid configuration: {}", warning);
        }
    }

    /// Find all possible config file paths
    ///
    /// Returns paths in priority order (highest first)
    fn find_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix(APP_DIR);
        if let Some(path) = xdg_dirs.find_config_file("config.toml") {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc").join(APP_DIR).join("config.toml"));

        paths
    }

    /// Identifier used as the pruning lease holder
    pub fn instance_id(&self) -> String {
        self.service
            .instance_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.service.name, uuid::Uuid::new_v4()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "login-guard".to_string(),
                port: default_port(),
                log_level: default_log_level(),
                timeout_secs: default_timeout(),
                environment: default_environment(),
                instance_id: None,
            },
            throttle: ThrottleConfig::default(),
            retention: RetentionConfig::default(),
            storage: StorageConfig::default(),
            database: None,
            redis: None,
            startup_warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.port, 8080);
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.throttle.threshold, 5);
        assert_eq!(config.throttle.window_minutes, 15);
        assert_eq!(config.retention.retention_days, 90);
        assert_eq!(config.storage.backend, StorageBackend::Jsonl);
    }

    #[test]
    fn test_deployment_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [service]
                name = "portal-auth"

                [throttle]
                threshold = 3
                window_minutes = 10
                "#,
            )?;
            jail.set_env(ENV_FAILURE_THRESHOLD, "7");
            jail.set_env(ENV_RETENTION_DAYS, "30");

            let config = Config::load_from("config.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.service.name, "portal-auth");
            assert_eq!(config.throttle.threshold, 7);
            assert_eq!(config.throttle.window_minutes, 10);
            assert_eq!(config.retention.retention_days, 30);
            assert!(config.startup_warnings.is_empty());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_deployment_env_falls_back_to_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[throttle]\nthreshold = 9\n")?;
            jail.set_env(ENV_FAILURE_THRESHOLD, "-2");
            jail.set_env(ENV_FAILURE_WINDOW_MINUTES, "soon");
            jail.set_env(ENV_RETENTION_DAYS, "0");

            let config = Config::load_from("config.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.throttle.threshold, 5);
            assert_eq!(config.throttle.window_minutes, 15);
            assert_eq!(config.retention.retention_days, 90);
            assert_eq!(config.startup_warnings.len(), 3);
            assert!(config.startup_warnings[0].contains(ENV_FAILURE_THRESHOLD));
            Ok(())
        });
    }

    #[test]
    fn test_zero_in_file_is_sanitized() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                "[throttle]\nthreshold = 0\nwindow_minutes = 0\n",
            )?;

            let config = Config::load_from("config.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.throttle.threshold, 5);
            assert_eq!(config.throttle.window_minutes, 15);
            assert_eq!(config.startup_warnings.len(), 2);
            Ok(())
        });
    }

    #[test]
    fn test_negative_threshold_in_file_falls_back_to_default() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                "[throttle]\nthreshold = -3\nwindow_minutes = 20\n",
            )?;

            let config = Config::load_from("config.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.throttle.threshold, 5);
            assert_eq!(config.throttle.window_minutes, 20);
            assert_eq!(config.startup_warnings.len(), 1);
            assert!(config.startup_warnings[0].contains("throttle.threshold"));
            Ok(())
        });
    }

    #[test]
    fn test_garbage_in_prefixed_env_falls_back_to_default() {
        Jail::expect_with(|jail| {
            jail.set_env("LOGIN_GUARD_THROTTLE__WINDOW_MINUTES", "soon");
            jail.set_env("LOGIN_GUARD_RETENTION__RETENTION_DAYS", "forever");
            jail.set_env("LOGIN_GUARD_THROTTLE__THRESHOLD", "8");

            let config = Config::load_from("missing.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.throttle.threshold, 8);
            assert_eq!(config.throttle.window_minutes, 15);
            assert_eq!(config.retention.retention_days, 90);
            assert_eq!(config.startup_warnings.len(), 2);
            Ok(())
        });
    }

    #[test]
    fn test_prefixed_env_selects_backend() {
        Jail::expect_with(|jail| {
            jail.set_env("LOGIN_GUARD_STORAGE__BACKEND", "memory");
            jail.set_env("LOGIN_GUARD_SERVICE__PORT", "9090");

            let config = Config::load_from("missing.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.storage.backend, StorageBackend::Memory);
            assert_eq!(config.service.port, 9090);
            Ok(())
        });
    }

    #[test]
    fn test_instance_id_prefers_configured_value() {
        let mut config = Config::default();
        config.service.instance_id = Some("node-a".to_string());
        assert_eq!(config.instance_id(), "node-a");

        config.service.instance_id = None;
        assert!(config.instance_id().starts_with("login-guard-"));
    }
}
