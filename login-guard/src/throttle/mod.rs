//! Login-attempt throttling over the audit log
//!
//! Counts failed logins per identity inside a trailing window and blocks
//! further attempts once the threshold is reached. There is no separate
//! counter state: every decision is derived from the audit log.
//!
//! # Architecture
//!
//! - **Counter**: [`AttemptWindowCounter`] reads an identity's window from the store
//! - **Gate**: [`ThrottleGate`] turns the count into a [`ThrottleDecision`] and
//!   records outcomes; construct once, pass via `State`
//! - **Middleware**: [`LoginThrottleMiddleware`] for automatic enforcement
//! - **Notifications**: register [`ThrottleNotification`] handlers for events
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use login_guard::throttle::{ThrottleConfig, ThrottleGate};
//!
//! let gate = ThrottleGate::new(ThrottleConfig::default(), store, Arc::new(SystemClock));
//!
//! let decision = gate.admit(&email, Value::Null).await;
//! if decision.blocked { /* return 429 with decision.retry_after_secs() */ }
//! ```

pub mod config;
pub mod counter;
pub mod gate;
pub mod middleware;
pub mod notification;

pub use config::ThrottleConfig;
pub use counter::{AttemptWindowCounter, WindowTally};
pub use gate::{decide, ThrottleDecision, ThrottleGate};
pub use middleware::LoginThrottleMiddleware;
pub use notification::{ThrottleEvent, ThrottleNotification};
