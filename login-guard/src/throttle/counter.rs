//! Failure counting over a trailing window
//!
//! The audit log is the only source of attempt history. A count is the
//! number of `LOGIN_FAILED` events for the identity stamped at or after
//! `now - window`; successes and rate-limit records never affect it.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use crate::audit::{normalize_identity, AuditLogStore, AuthEventKind};
use crate::clock::Clock;
use crate::error::StoreError;

const DEFAULT_STORE_TIMEOUT: StdDuration = StdDuration::from_secs(2);

/// Failures and block records inside one window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowTally {
    /// Timestamps of counted failures, oldest first
    pub failures: Vec<DateTime<Utc>>,
    /// Most recent `LOGIN_RATE_LIMITED` record in the window
    pub last_rate_limited: Option<DateTime<Utc>>,
}

impl WindowTally {
    /// Number of counted failures
    pub fn count(&self) -> u32 {
        u32::try_from(self.failures.len()).unwrap_or(u32::MAX)
    }

    /// Most recent counted failure
    pub fn newest_failure(&self) -> Option<DateTime<Utc>> {
        self.failures.last().copied()
    }
}

/// Derives per-identity failure counts from the audit log
#[derive(Clone)]
pub struct AttemptWindowCounter {
    store: Arc<dyn AuditLogStore>,
    clock: Arc<dyn Clock>,
    timeout: StdDuration,
}

impl AttemptWindowCounter {
    /// Create a counter reading from `store`
    pub fn new(store: Arc<dyn AuditLogStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bound each store query by `timeout`
    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Earliest timestamp still inside `window`
    pub fn cutoff(&self, window: Duration) -> DateTime<Utc> {
        self.clock
            .now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Number of failures for `identity` inside `window`
    pub async fn count(&self, identity: &str, window: Duration) -> Result<u32, StoreError> {
        Ok(self.tally(identity, window).await?.count())
    }

    /// Failure timestamps and latest block record for `identity` inside `window`
    pub async fn tally(&self, identity: &str, window: Duration) -> Result<WindowTally, StoreError> {
        let identity = normalize_identity(identity);
        let since = self.cutoff(window);

        let events = tokio::time::timeout(self.timeout, self.store.query(&identity, since))
            .await
            .map_err(|_| {
                StoreError::Timeout(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX))
            })??;

        let mut tally = WindowTally::default();
        for event in events.iter().filter(|event| event.timestamp >= since) {
            match event.kind {
                AuthEventKind::LoginFailed => tally.failures.push(event.timestamp),
                AuthEventKind::LoginRateLimited => {
                    tally.last_rate_limited = tally.last_rate_limited.max(Some(event.timestamp));
                }
                AuthEventKind::LoginSuccess => {}
            }
        }
        tally.failures.sort_unstable();

        Ok(tally)
    }
}
