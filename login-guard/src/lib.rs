//! # login-guard
//!
//! Login-attempt throttling backed by an append-only authentication audit log.
//!
//! Every login outcome is appended to the audit log. The throttle derives its
//! decisions from that log: an identity with `threshold` failures inside the
//! trailing window is rejected until the oldest of those failures ages out.
//! Nothing is cached between requests, so all instances sharing a store agree.
//!
//! ## Features
//!
//! - **Audit log**: JSONL file (default), PostgreSQL (`database`), Redis (`cache`)
//! - **Throttle**: sliding-window failure counting, fail-open on store errors
//! - **Status endpoint**: `GET /api/login-attempts` for client-side countdowns
//! - **Retention**: scheduled, lease-coordinated pruning with optional archiving
//! - **Graceful shutdown**: SIGTERM and SIGINT drain requests and stop the pruner
//!
//! ## Example
//!
//! ```rust,no_run
//! use login_guard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!     config.log_startup_warnings();
//!
//!     let state = AppState::connect(config).await?;
//!     Server::new(state).serve().await
//! }
//! ```

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod observability;
pub mod retention;
pub mod server;
pub mod state;
pub mod throttle;

#[cfg(feature = "database")]
pub mod database;

#[cfg(feature = "cache")]
pub mod cache;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::{AuditLogStore, AuthEvent, AuthEventKind, StoreHealth};
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, StoreError};
    pub use crate::handlers::{login_attempts, LoginAttemptStatus};
    pub use crate::health::{health, readiness};
    pub use crate::observability::{init_tracing, shutdown_tracing};
    pub use crate::retention::{PruneOutcome, RetentionConfig, RetentionPruner};
    pub use crate::server::Server;
    pub use crate::state::AppState;
    pub use crate::throttle::{
        LoginThrottleMiddleware, ThrottleConfig, ThrottleDecision, ThrottleGate,
        ThrottleNotification,
    };

    #[cfg(any(test, feature = "test-helpers"))]
    pub use crate::clock::MockClock;
}
