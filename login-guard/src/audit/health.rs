//! Audit store failure tracking
//!
//! Every store failure is soft: an append failure leaves an audit gap and a
//! query failure makes the gate fail open. `StoreHealth` counts both, tracks
//! consecutive failures, and logs an outage once when they pile up, then a
//! recovery when the store answers again. `/ready` reports its snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::StoreError;

/// Consecutive failures before an outage is declared
pub const DEFAULT_OUTAGE_THRESHOLD: u64 = 3;

/// Store call that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    /// Writing an event
    Append,
    /// Reading an identity's window
    Query,
    /// Retention pruning
    Prune,
}

impl StoreOperation {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Query => "query",
            Self::Prune => "prune",
        }
    }
}

/// Outage bookkeeping protected by a `std::sync::Mutex`
///
/// Never held across `.await`.
#[derive(Default)]
struct OutageState {
    failing_since: Option<DateTime<Utc>>,
    consecutive_failures: u64,
    last_error: Option<String>,
    outage_declared: bool,
}

/// Store health counters shared by the gate, the pruner and `/ready`
pub struct StoreHealth {
    state: Mutex<OutageState>,
    audit_gaps: AtomicU64,
    fail_opens: AtomicU64,
    prune_failures: AtomicU64,
    outage_threshold: u64,
}

/// Point-in-time view of [`StoreHealth`]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoreHealthSnapshot {
    /// No failure since the last success
    pub healthy: bool,
    /// Failures since the last success
    pub consecutive_failures: u64,
    /// Events that could not be appended
    pub audit_gaps: u64,
    /// Decisions that admitted because the window could not be read
    pub fail_opens: u64,
    /// Pruning runs that did not complete
    pub prune_failures: u64,
    /// Message of the most recent failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// First failure of the current streak
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failing_since: Option<DateTime<Utc>>,
}

impl Default for StoreHealth {
    fn default() -> Self {
        Self::new(DEFAULT_OUTAGE_THRESHOLD)
    }
}

impl StoreHealth {
    /// Create a tracker declaring an outage after `outage_threshold` failures in a row
    pub fn new(outage_threshold: u64) -> Self {
        Self {
            state: Mutex::new(OutageState::default()),
            audit_gaps: AtomicU64::new(0),
            fail_opens: AtomicU64::new(0),
            prune_failures: AtomicU64::new(0),
            outage_threshold: outage_threshold.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OutageState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a failed store call
    pub fn record_failure(&self, operation: StoreOperation, error: &StoreError, now: DateTime<Utc>) {
        match operation {
            StoreOperation::Append => self.audit_gaps.fetch_add(1, Ordering::Relaxed),
            StoreOperation::Query => self.fail_opens.fetch_add(1, Ordering::Relaxed),
            StoreOperation::Prune => self.prune_failures.fetch_add(1, Ordering::Relaxed),
        };

        let declared = {
            let mut state = self.lock();
            state.failing_since.get_or_insert(now);
            state.consecutive_failures += 1;
            state.last_error = Some(error.to_string());

            if !state.outage_declared && state.consecutive_failures >= self.outage_threshold {
                state.outage_declared = true;
                Some(state.consecutive_failures)
            } else {
                None
            }
        };

        if let Some(consecutive_failures) = declared {
            tracing::error!(
                alert = true,
                operation = operation.as_str(),
                consecutive_failures = consecutive_failures,
                error = %error,
                "Audit store unreachable"
            );
        }
    }

    /// Record a store call that succeeded, ending any failure streak
    pub fn record_success(&self, now: DateTime<Utc>) {
        let recovered = {
            let mut state = self.lock();
            if state.consecutive_failures == 0 {
                return;
            }
            let recovered = state
                .outage_declared
                .then(|| (state.failing_since, state.consecutive_failures));
            *state = OutageState::default();
            recovered
        };

        if let Some((failing_since, failures)) = recovered {
            let outage_secs = failing_since
                .map(|since| (now - since).num_seconds().max(0))
                .unwrap_or(0);
            tracing::warn!(
                outage_secs = outage_secs,
                failures = failures,
                audit_gaps = self.audit_gaps.load(Ordering::Relaxed),
                "Audit store recovered"
            );
        }
    }

    /// Current counters
    pub fn snapshot(&self) -> StoreHealthSnapshot {
        let state = self.lock();
        StoreHealthSnapshot {
            healthy: state.consecutive_failures == 0,
            consecutive_failures: state.consecutive_failures,
            audit_gaps: self.audit_gaps.load(Ordering::Relaxed),
            fail_opens: self.fail_opens.load(Ordering::Relaxed),
            prune_failures: self.prune_failures.load(Ordering::Relaxed),
            last_error: state.last_error.clone(),
            failing_since: state.failing_since,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    fn err() -> StoreError {
        StoreError::Unavailable("connection refused".to_string())
    }

    #[test]
    fn test_failures_are_counted_per_operation() {
        let health = StoreHealth::default();
        health.record_failure(StoreOperation::Append, &err(), t0());
        health.record_failure(StoreOperation::Query, &err(), t0());
        health.record_failure(StoreOperation::Query, &err(), t0());

        let snapshot = health.snapshot();
        assert!(!snapshot.healthy);
        assert_eq!(snapshot.audit_gaps, 1);
        assert_eq!(snapshot.fail_opens, 2);
        assert_eq!(snapshot.consecutive_failures, 3);
        assert_eq!(snapshot.failing_since, Some(t0()));
        assert!(snapshot.last_error.unwrap().contains("connection refused"));
    }

    #[test]
    fn test_success_resets_streak_but_keeps_totals() {
        let health = StoreHealth::new(1);
        health.record_failure(StoreOperation::Append, &err(), t0());
        health.record_failure(StoreOperation::Append, &err(), t0() + Duration::seconds(5));
        health.record_success(t0() + Duration::seconds(10));

        let snapshot = health.snapshot();
        assert!(snapshot.healthy);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.audit_gaps, 2);
        assert!(snapshot.last_error.is_none());
        assert!(snapshot.failing_since.is_none());
    }

    #[test]
    fn test_success_without_failures_is_noop() {
        let health = StoreHealth::default();
        health.record_success(t0());
        assert_eq!(
            health.snapshot(),
            StoreHealthSnapshot {
                healthy: true,
                consecutive_failures: 0,
                audit_gaps: 0,
                fail_opens: 0,
                prune_failures: 0,
                last_error: None,
                failing_since: None,
            }
        );
    }

    #[test]
    fn test_outage_is_declared_once() {
        let health = StoreHealth::new(2);
        for _ in 0..5 {
            health.record_failure(StoreOperation::Prune, &err(), t0());
        }
        assert!(health.lock().outage_declared);
        assert_eq!(health.snapshot().prune_failures, 5);
    }
}
