//! Scheduled deletion of expired audit events
//!
//! Events strictly older than `now - horizon` are deleted; an event exactly
//! at the cutoff survives until the next run. Pruning is idempotent, so a
//! failed run is simply retried on the next tick.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::RetentionConfig;
use crate::audit::{archive_events, AuditLogStore, StoreHealth, StoreOperation};
use crate::clock::Clock;
use crate::error::{Error, Result, StoreError};

/// Result of a completed pruning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// Events older than this were deleted
    pub cutoff: DateTime<Utc>,
    /// Number of events deleted
    pub deleted: u64,
    /// Archive written before deletion, if any
    pub archive: Option<PathBuf>,
}

/// What a pruning run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneOutcome {
    /// This instance held the lease and pruned
    Completed(PruneReport),
    /// Another instance holds the lease
    Skipped,
}

/// Deletes audit events past the retention horizon
#[derive(Clone)]
pub struct RetentionPruner {
    config: RetentionConfig,
    store: Arc<dyn AuditLogStore>,
    clock: Arc<dyn Clock>,
    health: Arc<StoreHealth>,
    holder: String,
}

impl RetentionPruner {
    /// Create a pruner identified as `holder` when taking the store lease
    pub fn new(
        config: RetentionConfig,
        store: Arc<dyn AuditLogStore>,
        clock: Arc<dyn Clock>,
        holder: impl Into<String>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            health: Arc::new(StoreHealth::default()),
            holder: holder.into(),
        }
    }

    /// Share a health tracker with other components
    pub fn with_health(mut self, health: Arc<StoreHealth>) -> Self {
        self.health = health;
        self
    }

    /// Cutoff for `horizon` measured from now
    fn cutoff_for(&self, horizon: Duration) -> DateTime<Utc> {
        self.clock
            .now()
            .checked_sub_signed(horizon)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Delete every event strictly older than `now - horizon`
    ///
    /// Returns the number of events deleted. Running it again with the same
    /// clock deletes nothing.
    pub async fn prune(&self, horizon: Duration) -> std::result::Result<u64, StoreError> {
        let cutoff = self.cutoff_for(horizon);
        let deleted = self.store.delete_older_than(cutoff).await?;
        debug!(cutoff = %cutoff, deleted = deleted, "Pruned audit events");
        Ok(deleted)
    }

    /// One scheduled run: take the lease, archive, prune, release
    pub async fn run_once(&self) -> Result<PruneOutcome> {
        let acquired = self
            .store
            .try_acquire_prune_lease(&self.holder, self.config.lease_ttl())
            .await
            .map_err(|e| self.failed(e))?;
        if !acquired {
            info!(holder = %self.holder, "Retention lease held by another instance, skipping run");
            return Ok(PruneOutcome::Skipped);
        }

        let result = self.archive_and_prune().await;

        if let Err(e) = self.store.release_prune_lease(&self.holder).await {
            warn!(holder = %self.holder, error = %e, "Failed to release retention lease, it will expire");
        }

        let report = result?;
        self.health.record_success(self.clock.now());
        info!(
            cutoff = %report.cutoff,
            deleted = report.deleted,
            archive = ?report.archive,
            "Retention run completed"
        );
        Ok(PruneOutcome::Completed(report))
    }

    async fn archive_and_prune(&self) -> Result<PruneReport> {
        let cutoff = self.cutoff_for(self.config.horizon());

        let archive = match &self.config.archive_dir {
            Some(dir) => {
                let expired = self.store.expired(cutoff).await.map_err(|e| self.failed(e))?;
                if expired.is_empty() {
                    None
                } else {
                    Some(archive_events(&expired, dir, self.clock.now()).await?)
                }
            }
            None => None,
        };

        let deleted = self
            .store
            .delete_older_than(cutoff)
            .await
            .map_err(|e| self.failed(e))?;

        Ok(PruneReport {
            cutoff,
            deleted,
            archive,
        })
    }

    fn failed(&self, e: StoreError) -> Error {
        self.health
            .record_failure(StoreOperation::Prune, &e, self.clock.now());
        Error::Store(e)
    }

    /// Run on the configured interval until `shutdown` is cancelled
    ///
    /// The first run starts immediately. Failures are logged and retried on
    /// the next tick.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.prune_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                retention_days = self.config.retention_days,
                interval_secs = self.config.prune_interval_secs,
                "Retention pruner started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "Retention run failed, retrying on next schedule");
                        }
                    }
                }
            }

            info!("Retention pruner stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::storage::FlakyAuditLog;
    use crate::audit::{AuthEvent, AuthEventKind, MemoryAuditLog};
    use crate::clock::MockClock;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 2, 0, 0).unwrap()
    }

    async fn seed(store: &dyn AuditLogStore, ages: &[Duration]) {
        for age in ages {
            store
                .append(&AuthEvent::new(
                    AuthEventKind::LoginFailed,
                    "old@example.com",
                    now() - *age,
                ))
                .await
                .unwrap();
        }
    }

    fn pruner(store: Arc<dyn AuditLogStore>, config: RetentionConfig) -> RetentionPruner {
        RetentionPruner::new(config, store, Arc::new(MockClock::new(now())), "test-instance")
    }

    #[tokio::test]
    async fn test_prune_is_strict_and_idempotent() {
        let store = Arc::new(MemoryAuditLog::new());
        let horizon = Duration::days(90);
        seed(
            store.as_ref(),
            &[
                horizon + Duration::seconds(1),
                horizon,
                horizon - Duration::seconds(1),
                Duration::days(1),
            ],
        )
        .await;
        let pruner = pruner(store.clone(), RetentionConfig::default());

        assert_eq!(pruner.prune(horizon).await.unwrap(), 1);
        assert_eq!(pruner.prune(horizon).await.unwrap(), 0);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_run_once_archives_before_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryAuditLog::new());
        seed(store.as_ref(), &[Duration::days(200), Duration::days(91), Duration::days(3)]).await;
        let config = RetentionConfig {
            archive_dir: Some(dir.path().to_path_buf()),
            ..RetentionConfig::default()
        };

        let outcome = pruner(store.clone(), config).run_once().await.unwrap();
        let PruneOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(report.deleted, 2);
        assert_eq!(report.cutoff, now() - Duration::days(90));

        let archive = report.archive.unwrap();
        let contents = tokio::fs::read_to_string(&archive).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_run_once_without_expired_events_writes_no_archive() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryAuditLog::new());
        seed(store.as_ref(), &[Duration::days(1)]).await;
        let config = RetentionConfig {
            archive_dir: Some(dir.path().join("archive")),
            ..RetentionConfig::default()
        };

        let outcome = pruner(store, config).run_once().await.unwrap();
        assert_eq!(
            outcome,
            PruneOutcome::Completed(PruneReport {
                cutoff: now() - Duration::days(90),
                deleted: 0,
                archive: None,
            })
        );
    }

    #[tokio::test]
    async fn test_run_once_skips_when_lease_is_taken() {
        let store = Arc::new(FlakyAuditLog::new());
        seed(store.as_ref(), &[Duration::days(120)]).await;
        store.lease_held_elsewhere(true);

        let outcome = pruner(store.clone(), RetentionConfig::default())
            .run_once()
            .await
            .unwrap();
        assert_eq!(outcome, PruneOutcome::Skipped);
        assert_eq!(store.inner().len(), 1);
        assert_eq!(store.lease_release_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_run_is_reported_and_releases_lease() {
        let store = Arc::new(FlakyAuditLog::new());
        seed(store.as_ref(), &[Duration::days(120)]).await;
        store.fail_deletes(true);
        let health = Arc::new(StoreHealth::default());
        let pruner = pruner(store.clone(), RetentionConfig::default()).with_health(health.clone());

        assert!(pruner.run_once().await.is_err());
        assert_eq!(store.lease_release_count(), 1);
        assert_eq!(health.snapshot().prune_failures, 1);

        // The next run picks up where the failed one left off
        store.fail_deletes(false);
        assert!(matches!(
            pruner.run_once().await.unwrap(),
            PruneOutcome::Completed(PruneReport { deleted: 1, .. })
        ));
        assert!(health.snapshot().healthy);
    }

    #[tokio::test]
    async fn test_spawned_pruner_runs_until_cancelled() {
        let store = Arc::new(MemoryAuditLog::new());
        seed(store.as_ref(), &[Duration::days(365)]).await;
        let shutdown = CancellationToken::new();

        let handle = pruner(store.clone(), RetentionConfig::default()).spawn(shutdown.clone());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(store.is_empty());
    }
}
