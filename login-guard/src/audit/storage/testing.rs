//! Fault-injecting store for tests
//!
//! Wraps a [`MemoryAuditLog`] and fails selected operations on demand.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AuditLogStore, MemoryAuditLog};
use crate::audit::event::AuthEvent;
use crate::error::StoreError;

/// Audit store whose operations can be switched to fail
#[derive(Debug, Default)]
pub struct FlakyAuditLog {
    inner: MemoryAuditLog,
    fail_append: AtomicBool,
    fail_query: AtomicBool,
    fail_delete: AtomicBool,
    stall_query: AtomicBool,
    lease_taken: AtomicBool,
    appends: AtomicU64,
    lease_releases: AtomicU64,
}

impl FlakyAuditLog {
    /// Store that succeeds until told otherwise
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `append` fail
    pub fn fail_appends(&self, fail: bool) {
        self.fail_append.store(fail, Ordering::SeqCst);
    }

    /// Make `query` and `expired` fail
    pub fn fail_queries(&self, fail: bool) {
        self.fail_query.store(fail, Ordering::SeqCst);
    }

    /// Make `delete_older_than` fail
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Make `query` hang until the caller gives up
    pub fn stall_queries(&self, stall: bool) {
        self.stall_query.store(stall, Ordering::SeqCst);
    }

    /// Pretend another instance holds the pruning lease
    pub fn lease_held_elsewhere(&self, held: bool) {
        self.lease_taken.store(held, Ordering::SeqCst);
    }

    /// Number of lease releases so far
    pub fn lease_release_count(&self) -> u64 {
        self.lease_releases.load(Ordering::SeqCst)
    }

    /// Successful appends so far
    pub fn append_count(&self) -> u64 {
        self.appends.load(Ordering::SeqCst)
    }

    /// The wrapped store
    pub fn inner(&self) -> &MemoryAuditLog {
        &self.inner
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable("injected failure".to_string())
    }
}

#[async_trait]
impl AuditLogStore for FlakyAuditLog {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    async fn append(&self, event: &AuthEvent) -> Result<(), StoreError> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.append(event).await?;
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query(
        &self,
        identity: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuthEvent>, StoreError> {
        if self.stall_query.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.query(identity, since).await
    }

    async fn expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<AuthEvent>, StoreError> {
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.expired(cutoff).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.delete_older_than(cutoff).await
    }

    fn skipped_records(&self) -> u64 {
        0
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(())
    }

    async fn try_acquire_prune_lease(
        &self,
        _holder: &str,
        _ttl: std::time::Duration,
    ) -> Result<bool, StoreError> {
        Ok(!self.lease_taken.load(Ordering::SeqCst))
    }

    async fn release_prune_lease(&self, _holder: &str) -> Result<(), StoreError> {
        self.lease_releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
