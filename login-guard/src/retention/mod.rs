//! Audit log retention
//!
//! Events are kept for `retention_days` and then deleted by the
//! [`RetentionPruner`], optionally after being archived to JSONL. Only one
//! instance prunes at a time, coordinated through a lease in the store.

pub mod config;
pub mod pruner;

pub use config::RetentionConfig;
pub use pruner::{PruneOutcome, PruneReport, RetentionPruner};
