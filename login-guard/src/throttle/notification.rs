//! Throttle notification hooks
//!
//! Provides a trait for receiving throttle lifecycle events (failed
//! attempts, threshold warnings, blocks). Notifications are dispatched via
//! `tokio::spawn` so they never delay the login response.

use async_trait::async_trait;

/// Events emitted during the throttle lifecycle
///
/// Dispatched to [`ThrottleNotification`] handlers via fire-and-forget
/// `tokio::spawn`, so handlers should be lightweight and non-blocking.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ThrottleEvent {
    /// A login attempt failed
    FailedAttempt {
        /// Normalized identity the attempt was made against
        identity: String,
        /// Failures currently inside the window
        attempt_count: u32,
        /// Failures that block the identity
        threshold: u32,
    },
    /// The warning threshold has been reached
    ApproachingThreshold {
        /// Identity approaching the block
        identity: String,
        /// Failures currently inside the window
        attempt_count: u32,
        /// Failures left before the block
        remaining_attempts: u32,
    },
    /// The identity moved into the blocked state
    Blocked {
        /// Identity that is now blocked
        identity: String,
        /// Failures inside the window at the time of the block
        attempt_count: u32,
        /// Seconds until the identity is admitted again
        retry_after_secs: u64,
    },
}

impl ThrottleEvent {
    /// Identity the event concerns
    pub fn identity(&self) -> &str {
        match self {
            Self::FailedAttempt { identity, .. }
            | Self::ApproachingThreshold { identity, .. }
            | Self::Blocked { identity, .. } => identity,
        }
    }
}

/// Trait for receiving throttle lifecycle notifications
///
/// Implement this trait to react to throttle events (send emails, emit
/// metrics, page an operator). Handlers are invoked asynchronously and must
/// not panic.
///
/// # Example
///
/// ```rust,ignore
/// use login_guard::throttle::{ThrottleEvent, ThrottleNotification};
///
/// struct SecurityDesk { /* ... */ }
///
/// #[async_trait]
/// impl ThrottleNotification for SecurityDesk {
///     async fn on_event(&self, event: ThrottleEvent) {
///         if let ThrottleEvent::Blocked { identity, .. } = event {
///             // open_ticket(&identity).await;
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait ThrottleNotification: Send + Sync + 'static {
    /// Called when a throttle lifecycle event occurs
    ///
    /// Runs inside `tokio::spawn`. Implementations handle their own errors
    /// (log and continue).
    async fn on_event(&self, event: ThrottleEvent);
}
