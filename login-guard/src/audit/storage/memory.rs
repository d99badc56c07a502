//! In-memory audit log
//!
//! Events are indexed by identity in a `DashMap`, so window queries only
//! touch the caller's own history. Nothing survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::AuditLogStore;
use crate::audit::event::AuthEvent;
use crate::error::StoreError;

/// Process-local audit store
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: DashMap<String, Vec<AuthEvent>>,
}

impl MemoryAuditLog {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events currently held
    pub fn len(&self) -> usize {
        self.events.iter().map(|entry| entry.value().len()).sum()
    }

    /// Whether the store holds no events
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditLogStore for MemoryAuditLog {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, event: &AuthEvent) -> Result<(), StoreError> {
        self.events
            .entry(event.identity.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn query(
        &self,
        identity: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuthEvent>, StoreError> {
        let mut events: Vec<AuthEvent> = self
            .events
            .get(identity)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|event| event.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // Concurrent writers may push slightly out of order
        events.sort_by_key(|event| event.timestamp);
        Ok(events)
    }

    async fn expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<AuthEvent>, StoreError> {
        let mut events: Vec<AuthEvent> = self
            .events
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|event| event.timestamp < cutoff)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        events.sort_by_key(|event| event.timestamp);
        Ok(events)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut deleted = 0u64;
        for mut entry in self.events.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|event| event.timestamp >= cutoff);
            deleted += (before - entry.value().len()) as u64;
        }
        self.events.retain(|_, events| !events.is_empty());
        Ok(deleted)
    }

    fn skipped_records(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::AuthEventKind;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_append_then_query_round_trip() {
        let store = MemoryAuditLog::new();
        let event = AuthEvent::new(AuthEventKind::LoginFailed, "alice@example.com", t0())
            .with_field("provider", "google");

        store.append(&event).await.unwrap();

        let events = store.query("alice@example.com", t0()).await.unwrap();
        assert_eq!(events, vec![event]);
    }

    #[tokio::test]
    async fn test_query_filters_identity_and_since() {
        let store = MemoryAuditLog::new();
        for minutes in [0, 5, 10] {
            let at = t0() + Duration::minutes(minutes);
            store
                .append(&AuthEvent::new(AuthEventKind::LoginFailed, "alice@example.com", at))
                .await
                .unwrap();
        }
        store
            .append(&AuthEvent::new(AuthEventKind::LoginFailed, "bob@example.com", t0()))
            .await
            .unwrap();

        let events = store
            .query("alice@example.com", t0() + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.identity == "alice@example.com"));
    }

    #[tokio::test]
    async fn test_delete_older_than_is_strict_and_idempotent() {
        let store = MemoryAuditLog::new();
        let cutoff = t0();
        for seconds in [-10, 0, 10] {
            store
                .append(&AuthEvent::new(
                    AuthEventKind::LoginSuccess,
                    "carol@example.com",
                    cutoff + Duration::seconds(seconds),
                ))
                .await
                .unwrap();
        }

        assert_eq!(store.expired(cutoff).await.unwrap().len(), 1);
        assert_eq!(store.delete_older_than(cutoff).await.unwrap(), 1);
        assert_eq!(store.delete_older_than(cutoff).await.unwrap(), 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_visible() {
        let store = Arc::new(MemoryAuditLog::new());
        let writes = (0..32).map(|i| {
            let store = Arc::clone(&store);
            async move {
                let event = AuthEvent::new(
                    AuthEventKind::LoginFailed,
                    "dave@example.com",
                    t0() + Duration::milliseconds(i),
                );
                store.append(&event).await
            }
        });

        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let events = store.query("dave@example.com", t0()).await.unwrap();
        assert_eq!(events.len(), 32);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
