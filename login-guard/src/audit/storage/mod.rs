//! Audit log storage trait and backend implementations
//!
//! The `AuditLogStore` trait defines the interface for persisting
//! authentication events. Stores are append-only: nothing updates an event,
//! and only the retention pruner deletes events past the horizon.
//!
//! # Available Backends
//!
//! - **Memory**: per-identity index in a concurrent map
//! - **JSONL**: append-only JSON-lines file
//! - **PostgreSQL** (`database` feature): indexed table, `UPDATE` disabled by rule
//! - **Redis** (`cache` feature): per-identity sorted sets with native expiry

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::event::AuthEvent;
use crate::config::{Config, StorageBackend};
use crate::error::{Error, Result, StoreError};

pub mod jsonl;
pub mod memory;

#[cfg(feature = "database")]
pub mod pg;

#[cfg(feature = "cache")]
pub mod redis_impl;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use jsonl::JsonlAuditLog;
pub use memory::MemoryAuditLog;

#[cfg(feature = "database")]
pub use pg::PgAuditLog;

#[cfg(feature = "cache")]
pub use redis_impl::RedisAuditLog;

#[cfg(any(test, feature = "test-helpers"))]
pub use testing::FlakyAuditLog;

/// Trait for audit log persistence backends
///
/// `append` must be durable before it returns `Ok`: an acknowledged event is
/// visible to every later `query`, from any reader. Implementations must be
/// safe under concurrent writers.
#[async_trait]
pub trait AuditLogStore: Send + Sync {
    /// Short backend name for logs and readiness output
    fn backend(&self) -> &'static str;

    /// Append an event
    async fn append(&self, event: &AuthEvent) -> std::result::Result<(), StoreError>;

    /// Events for `identity` with `timestamp >= since`, oldest first
    ///
    /// Malformed stored records are skipped and added to
    /// [`skipped_records`](Self::skipped_records).
    async fn query(
        &self,
        identity: &str,
        since: DateTime<Utc>,
    ) -> std::result::Result<Vec<AuthEvent>, StoreError>;

    /// Events of every identity with `timestamp < cutoff`
    ///
    /// Used to archive what the next prune will delete.
    async fn expired(&self, cutoff: DateTime<Utc>)
        -> std::result::Result<Vec<AuthEvent>, StoreError>;

    /// Delete events with `timestamp < cutoff`, returning how many were removed
    async fn delete_older_than(&self, cutoff: DateTime<Utc>)
        -> std::result::Result<u64, StoreError>;

    /// Total malformed records skipped by queries since startup
    fn skipped_records(&self) -> u64;

    /// Check that the backend is reachable
    async fn ping(&self) -> std::result::Result<(), StoreError> {
        Ok(())
    }

    /// Try to become the only instance running the pruner
    ///
    /// Returns `Ok(true)` when `holder` owns the lease for `ttl`. Backends
    /// that cannot be shared between instances always grant it.
    async fn try_acquire_prune_lease(
        &self,
        _holder: &str,
        _ttl: Duration,
    ) -> std::result::Result<bool, StoreError> {
        Ok(true)
    }

    /// Give the lease back early
    async fn release_prune_lease(&self, _holder: &str) -> std::result::Result<(), StoreError> {
        Ok(())
    }
}

/// Build the configured audit store
pub async fn connect(config: &Config) -> Result<Arc<dyn AuditLogStore>> {
    let store: Arc<dyn AuditLogStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryAuditLog::new()),
        StorageBackend::Jsonl => Arc::new(JsonlAuditLog::open(&config.storage.path).await?),
        StorageBackend::Postgres => connect_postgres(config).await?,
        StorageBackend::Redis => connect_redis(config).await?,
    };

    tracing::info!(backend = store.backend(), "Audit store ready");
    Ok(store)
}

#[cfg(feature = "database")]
async fn connect_postgres(config: &Config) -> Result<Arc<dyn AuditLogStore>> {
    let db = config.database.as_ref().ok_or_else(|| {
        Error::Internal("storage backend `postgres` requires a [database] section".to_string())
    })?;
    let pool = crate::database::create_pool(db).await?;
    let store = PgAuditLog::new(pool);
    store.initialize().await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "database"))]
async fn connect_postgres(_config: &Config) -> Result<Arc<dyn AuditLogStore>> {
    Err(Error::Internal(
        "storage backend `postgres` requires the `database` feature".to_string(),
    ))
}

#[cfg(feature = "cache")]
async fn connect_redis(config: &Config) -> Result<Arc<dyn AuditLogStore>> {
    let redis = config.redis.as_ref().ok_or_else(|| {
        Error::Internal("storage backend `redis` requires a [redis] section".to_string())
    })?;
    let pool = crate::cache::create_pool(redis).await?;
    Ok(Arc::new(
        RedisAuditLog::new(pool, config.storage.key_prefix.clone())
            .with_key_ttl(config.retention.horizon()),
    ))
}

#[cfg(not(feature = "cache"))]
async fn connect_redis(_config: &Config) -> Result<Arc<dyn AuditLogStore>> {
    Err(Error::Internal(
        "storage backend `redis` requires the `cache` feature".to_string(),
    ))
}
