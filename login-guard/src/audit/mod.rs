//! Append-only authentication audit log
//!
//! Every login outcome and every throttle rejection becomes an [`AuthEvent`]
//! persisted by an [`AuditLogStore`]. The same log is the source of truth for
//! throttling: the window counter derives failure counts from it rather than
//! keeping a separate counter.
//!
//! # Feature Interactions
//!
//! - default: memory and JSONL backends
//! - `database`: PostgreSQL backend
//! - `cache`: Redis backend

pub mod archive;
pub mod event;
pub mod health;
pub mod storage;

pub use archive::archive_events;
pub use event::{normalize_identity, AuthEvent, AuthEventKind, UnknownEventKind, ANONYMOUS_IDENTITY};
pub use health::{StoreHealth, StoreHealthSnapshot, StoreOperation};
pub use storage::{connect, AuditLogStore, JsonlAuditLog, MemoryAuditLog};
