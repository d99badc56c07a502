//! PostgreSQL audit storage backend
//!
//! Enforces append-only semantics with a `CREATE RULE` that silently discards
//! UPDATEs. DELETE stays available to the retention pruner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;

use super::AuditLogStore;
use crate::audit::event::{AuthEvent, AuthEventKind};
use crate::error::StoreError;

/// PostgreSQL-backed audit log
pub struct PgAuditLog {
    pool: PgPool,
    skipped: AtomicU64,
}

impl PgAuditLog {
    /// Create a new PostgreSQL audit log
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            skipped: AtomicU64::new(0),
        }
    }

    /// Create the `auth_events` table, its index and rule, and the lease table
    ///
    /// Idempotent. Should be called once during application startup.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auth_events (
                id BIGSERIAL PRIMARY KEY,
                timestamp TIMESTAMPTZ NOT NULL,
                event TEXT NOT NULL,
                email TEXT NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Window queries filter on both columns
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_auth_events_email_timestamp ON auth_events (email, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_auth_events_timestamp ON auth_events (timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            DO $$
            BEGIN
                IF NOT EXISTS (
                    SELECT 1 FROM pg_rules
                    WHERE rulename = 'auth_events_no_update' AND tablename = 'auth_events'
                ) THEN
                    CREATE RULE auth_events_no_update AS ON UPDATE TO auth_events DO INSTEAD NOTHING;
                END IF;
            END
            $$;
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auth_prune_lease (
                name TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn decode_rows(&self, rows: Vec<AuthEventRow>) -> Vec<AuthEvent> {
        let total = rows.len();
        let events: Vec<AuthEvent> = rows.into_iter().filter_map(AuthEventRow::decode).collect();

        let corrupt = (total - events.len()) as u64;
        if corrupt > 0 {
            let skipped_total = self.skipped.fetch_add(corrupt, Ordering::Relaxed) + corrupt;
            tracing::warn!(
                skipped = corrupt,
                skipped_total = skipped_total,
                "Skipped malformed audit rows"
            );
        }
        events
    }
}

const LEASE_NAME: &str = "retention";

#[async_trait]
impl AuditLogStore for PgAuditLog {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn append(&self, event: &AuthEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO auth_events (timestamp, event, email, metadata) VALUES ($1, $2, $3, $4)",
        )
        .bind(event.timestamp)
        .bind(event.kind.as_str())
        .bind(&event.identity)
        .bind(Value::Object(event.metadata.clone()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        identity: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuthEvent>, StoreError> {
        let rows = sqlx::query_as::<_, AuthEventRow>(
            "SELECT timestamp, event, email, metadata FROM auth_events \
             WHERE email = $1 AND timestamp >= $2 ORDER BY timestamp ASC, id ASC",
        )
        .bind(identity)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(self.decode_rows(rows))
    }

    async fn expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<AuthEvent>, StoreError> {
        let rows = sqlx::query_as::<_, AuthEventRow>(
            "SELECT timestamp, event, email, metadata FROM auth_events \
             WHERE timestamp < $1 ORDER BY timestamp ASC, id ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(self.decode_rows(rows))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM auth_events WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    fn skipped_records(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn try_acquire_prune_lease(&self, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        // Take the row when it is free, expired, or already ours
        let result = sqlx::query(
            r#"
            INSERT INTO auth_prune_lease (name, holder, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3::double precision / 1000))
            ON CONFLICT (name) DO UPDATE
                SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
                WHERE auth_prune_lease.expires_at < now() OR auth_prune_lease.holder = EXCLUDED.holder
            "#,
        )
        .bind(LEASE_NAME)
        .bind(holder)
        .bind(ttl_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_prune_lease(&self, holder: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM auth_prune_lease WHERE name = $1 AND holder = $2")
            .bind(LEASE_NAME)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Internal row type for sqlx mapping
#[derive(sqlx::FromRow)]
struct AuthEventRow {
    timestamp: DateTime<Utc>,
    event: String,
    email: String,
    metadata: Option<Value>,
}

impl AuthEventRow {
    /// `None` when the stored kind or metadata is not recognizable
    fn decode(self) -> Option<AuthEvent> {
        let kind: AuthEventKind = self.event.parse().ok()?;
        let metadata = match self.metadata {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return None,
        };

        Some(AuthEvent {
            timestamp: self.timestamp,
            kind,
            identity: self.email,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(event: &str, metadata: Option<Value>) -> AuthEventRow {
        AuthEventRow {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            event: event.to_string(),
            email: "alice@example.com".to_string(),
            metadata,
        }
    }

    #[test]
    fn test_row_decodes_known_kind() {
        let event = row("LOGIN_FAILED", Some(json!({"ip": "10.1.1.1"})))
            .decode()
            .unwrap();
        assert_eq!(event.kind, AuthEventKind::LoginFailed);
        assert_eq!(event.identity, "alice@example.com");
        assert_eq!(event.metadata["ip"], "10.1.1.1");
    }

    #[test]
    fn test_row_with_null_metadata_decodes_empty() {
        let event = row("LOGIN_SUCCESS", None).decode().unwrap();
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn test_row_with_unknown_kind_is_skipped() {
        assert!(row("LOGIN_SOMETIMES", None).decode().is_none());
        assert!(row("LOGIN_FAILED", Some(json!([1, 2]))).decode().is_none());
    }
}
