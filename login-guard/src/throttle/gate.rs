//! Login throttle gate
//!
//! Decides whether a login attempt for an identity is admitted, based on the
//! failures the audit log holds for it inside the trailing window. Passage
//! of time is the only way out of the blocked state: successes are recorded
//! but never reset the count.
//!
//! The gate fails open. When the window cannot be read the attempt is
//! admitted, a warning is logged and [`StoreHealth`] counts the event.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::config::ThrottleConfig;
use super::counter::{AttemptWindowCounter, WindowTally};
use super::notification::{ThrottleEvent, ThrottleNotification};
use crate::audit::{
    normalize_identity, AuditLogStore, AuthEvent, AuthEventKind, StoreHealth, StoreOperation,
};
use crate::clock::Clock;
use crate::error::StoreError;

/// Outcome of evaluating an identity against the throttle
///
/// Computed fresh for every request and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ThrottleDecision {
    /// Normalized identity the decision applies to
    pub identity: String,
    /// Failures counted inside the window
    pub window_count: u32,
    /// Failures that block the identity
    pub threshold: u32,
    /// Whether the attempt is rejected
    pub blocked: bool,
    /// Time until the identity is admitted again, when blocked
    pub retry_after: Option<StdDuration>,
    /// The window could not be read and the attempt was admitted anyway
    pub fail_open: bool,
}

impl ThrottleDecision {
    fn admitted(identity: String, window_count: u32, threshold: u32) -> Self {
        Self {
            identity,
            window_count,
            threshold,
            blocked: false,
            retry_after: None,
            fail_open: false,
        }
    }

    fn failed_open(identity: String, threshold: u32) -> Self {
        Self {
            fail_open: true,
            ..Self::admitted(identity, 0, threshold)
        }
    }

    /// Whether the attempt may proceed
    pub fn is_allowed(&self) -> bool {
        !self.blocked
    }

    /// `retry_after` in whole seconds, rounded up and at least 1
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|remaining| {
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            secs.max(1)
        })
    }
}

/// Apply the threshold to a window tally
///
/// When blocked, `retry_after` runs until enough counted failures have left
/// the window for the count to drop below `threshold`. With exactly
/// `threshold` failures that is the moment the oldest one exits.
pub fn decide(
    identity: &str,
    tally: &WindowTally,
    threshold: u32,
    window: Duration,
    now: DateTime<Utc>,
) -> ThrottleDecision {
    let threshold = threshold.max(1);
    let count = tally.count();
    if count < threshold {
        return ThrottleDecision::admitted(identity.to_string(), count, threshold);
    }

    let must_exit = (count - threshold) as usize;
    let retry_after = tally.failures.get(must_exit).map(|failed_at| {
        let exits_at = failed_at
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (exits_at - now).to_std().unwrap_or(StdDuration::ZERO)
    });

    ThrottleDecision {
        identity: identity.to_string(),
        window_count: count,
        threshold,
        blocked: true,
        retry_after,
        fail_open: false,
    }
}

/// A block is already on record when a `LOGIN_RATE_LIMITED` event is at or
/// after the newest counted failure
fn block_already_logged(tally: &WindowTally) -> bool {
    match (tally.last_rate_limited, tally.newest_failure()) {
        (Some(limited_at), Some(failed_at)) => limited_at >= failed_at,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Login throttle gate
///
/// Construct once at startup and share through axum `State`. Collaborators
/// call [`admit`](Self::admit) before checking credentials and
/// [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure) after every outcome.
///
/// # Example
///
/// ```rust,ignore
/// let gate = ThrottleGate::new(config.throttle.clone(), store, Arc::new(SystemClock));
///
/// let decision = gate.admit(&email, json!({ "ip": ip })).await;
/// if decision.blocked {
///     return Err(Error::Throttled {
///         retry_after_secs: decision.retry_after_secs().unwrap_or(1),
///     });
/// }
///
/// match authenticate(&creds).await {
///     Ok(session) => { gate.record_success(&email, Value::Null).await; Ok(session) }
///     Err(_) => { gate.record_failure(&email, Value::Null).await; Err(unauthorized()) }
/// }
/// ```
#[derive(Clone)]
pub struct ThrottleGate {
    config: ThrottleConfig,
    store: Arc<dyn AuditLogStore>,
    counter: AttemptWindowCounter,
    clock: Arc<dyn Clock>,
    health: Arc<StoreHealth>,
    notifications: Vec<Arc<dyn ThrottleNotification>>,
}

impl ThrottleGate {
    /// Create a gate over `store`
    ///
    /// Invalid configuration values are replaced with defaults and logged.
    pub fn new(mut config: ThrottleConfig, store: Arc<dyn AuditLogStore>, clock: Arc<dyn Clock>) -> Self {
        for warning in config.sanitize() {
            warn!("{}", warning);
        }
        let counter = AttemptWindowCounter::new(Arc::clone(&store), Arc::clone(&clock))
            .with_timeout(config.store_timeout());

        Self {
            config,
            store,
            counter,
            clock,
            health: Arc::new(StoreHealth::default()),
            notifications: Vec::new(),
        }
    }

    /// Share a health tracker with other components
    pub fn with_health(mut self, health: Arc<StoreHealth>) -> Self {
        self.health = health;
        self
    }

    /// Register a notification handler
    ///
    /// Multiple handlers can be registered. Events are dispatched
    /// via `tokio::spawn` (fire-and-forget).
    pub fn with_notification(mut self, handler: Arc<dyn ThrottleNotification>) -> Self {
        self.notifications.push(handler);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Store health tracker
    pub fn health(&self) -> &Arc<StoreHealth> {
        &self.health
    }

    /// Current decision for `identity`, without side effects on the log
    pub async fn evaluate(&self, identity: &str) -> ThrottleDecision {
        let identity = normalize_identity(identity);
        if !self.config.enabled {
            return ThrottleDecision::admitted(identity, 0, self.config.threshold);
        }

        match self.tally(&identity).await {
            Some(tally) => self.decide(&identity, &tally),
            None => ThrottleDecision::failed_open(identity, self.config.threshold),
        }
    }

    /// Decide whether a login attempt may proceed
    ///
    /// A rejection that moves the identity into the blocked state appends one
    /// `LOGIN_RATE_LIMITED` event. Later rejections append again only when
    /// `log_every_rejection` is set.
    pub async fn admit(&self, identity: &str, metadata: Value) -> ThrottleDecision {
        let identity = normalize_identity(identity);
        if !self.config.enabled {
            return ThrottleDecision::admitted(identity, 0, self.config.threshold);
        }

        let Some(tally) = self.tally(&identity).await else {
            return ThrottleDecision::failed_open(identity, self.config.threshold);
        };
        let decision = self.decide(&identity, &tally);

        if decision.blocked {
            let transition = !block_already_logged(&tally);
            if transition || self.config.log_every_rejection {
                self.log_block(&decision, metadata).await;
            }
            if transition {
                self.announce_block(&decision);
            } else {
                debug!(
                    identity = %decision.identity,
                    attempt_count = decision.window_count,
                    retry_after_secs = decision.retry_after_secs().unwrap_or(0),
                    "Login attempt rejected while blocked"
                );
            }
        }

        decision
    }

    /// Record a successful login and return the unchanged decision
    ///
    /// Successes do not reset the failure count.
    pub async fn record_success(&self, identity: &str, metadata: Value) -> ThrottleDecision {
        let identity = normalize_identity(identity);
        let event = AuthEvent::new(AuthEventKind::LoginSuccess, &identity, self.clock.now())
            .with_metadata(metadata);
        self.append(&event).await;

        self.evaluate(&identity).await
    }

    /// Record a failed login and return the updated decision
    ///
    /// The failure that reaches the threshold logs the transition into the
    /// blocked state.
    pub async fn record_failure(&self, identity: &str, metadata: Value) -> ThrottleDecision {
        let identity = normalize_identity(identity);
        let event = AuthEvent::new(AuthEventKind::LoginFailed, &identity, self.clock.now())
            .with_metadata(metadata);
        self.append(&event).await;

        if !self.config.enabled {
            return ThrottleDecision::admitted(identity, 0, self.config.threshold);
        }

        let Some(tally) = self.tally(&identity).await else {
            return ThrottleDecision::failed_open(identity, self.config.threshold);
        };
        let decision = self.decide(&identity, &tally);
        let count = decision.window_count;

        debug!(
            identity = %identity,
            attempt_count = count,
            threshold = decision.threshold,
            "Login failure recorded"
        );

        self.notify(ThrottleEvent::FailedAttempt {
            identity: identity.clone(),
            attempt_count: count,
            threshold: decision.threshold,
        });

        if self.config.warning_threshold > 0
            && count == self.config.warning_threshold
            && count < decision.threshold
        {
            self.notify(ThrottleEvent::ApproachingThreshold {
                identity: identity.clone(),
                attempt_count: count,
                remaining_attempts: decision.threshold - count,
            });
        }

        if decision.blocked && !block_already_logged(&tally) {
            self.log_block(&decision, Value::Null).await;
            self.announce_block(&decision);
        }

        decision
    }

    fn decide(&self, identity: &str, tally: &WindowTally) -> ThrottleDecision {
        decide(
            identity,
            tally,
            self.config.threshold,
            self.config.window(),
            self.clock.now(),
        )
    }

    /// Read the window, recording the outcome in the health tracker
    async fn tally(&self, identity: &str) -> Option<WindowTally> {
        match self.counter.tally(identity, self.config.window()).await {
            Ok(tally) => {
                self.health.record_success(self.clock.now());
                Some(tally)
            }
            Err(e) => {
                warn!(
                    identity = %identity,
                    error = %e,
                    "Could not count login failures, admitting attempt"
                );
                self.health
                    .record_failure(StoreOperation::Query, &e, self.clock.now());
                None
            }
        }
    }

    /// Append an event; a failure is logged and counted as an audit gap
    async fn append(&self, event: &AuthEvent) -> bool {
        let result = tokio::time::timeout(self.config.store_timeout(), self.store.append(event))
            .await
            .unwrap_or(Err(StoreError::Timeout(self.config.store_timeout_ms)));

        match result {
            Ok(()) => {
                self.health.record_success(self.clock.now());
                true
            }
            Err(e) => {
                warn!(
                    identity = %event.identity,
                    event = %event.kind,
                    error = %e,
                    "Failed to append auth event, audit gap recorded"
                );
                self.health
                    .record_failure(StoreOperation::Append, &e, self.clock.now());
                false
            }
        }
    }

    async fn log_block(&self, decision: &ThrottleDecision, metadata: Value) {
        let event = AuthEvent::new(
            AuthEventKind::LoginRateLimited,
            &decision.identity,
            self.clock.now(),
        )
        .with_metadata(metadata)
        .with_field("attempts", decision.window_count)
        .with_field("threshold", decision.threshold)
        .with_field("retry_after_secs", decision.retry_after_secs());
        self.append(&event).await;
    }

    fn announce_block(&self, decision: &ThrottleDecision) {
        let retry_after_secs = decision.retry_after_secs().unwrap_or(0);
        warn!(
            identity = %decision.identity,
            attempt_count = decision.window_count,
            retry_after_secs = retry_after_secs,
            "Login attempts throttled after repeated failures"
        );
        self.notify(ThrottleEvent::Blocked {
            identity: decision.identity.clone(),
            attempt_count: decision.window_count,
            retry_after_secs,
        });
    }

    /// Dispatch a notification event to all registered handlers
    fn notify(&self, event: ThrottleEvent) {
        for handler in &self.notifications {
            let handler = Arc::clone(handler);
            let event = event.clone();
            tokio::spawn(async move {
                handler.on_event(event).await;
            });
        }
    }
}
