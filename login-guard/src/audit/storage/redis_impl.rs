//! Redis audit storage backend
//!
//! Each identity owns a sorted set scored by event time in milliseconds.
//! Members are `<uuid>:<record json>` so identical records stay distinct.
//! A companion set lists every identity with history, which the pruner
//! walks. Identity keys expire one retention horizon after their newest
//! event, so abandoned identities clean themselves up.

use std::ops::DerefMut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool as RedisPool;

use super::AuditLogStore;
use crate::audit::event::AuthEvent;
use crate::error::StoreError;

// KEYS: events, identities. ARGV: cutoff ms, identity, boundary members.
// Runs as one unit so an append cannot land between the emptiness check
// and the index removal.
const PRUNE_IDENTITY_SCRIPT: &str = r#"
local removed = redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
for i = 3, #ARGV do
    removed = removed + redis.call('ZREM', KEYS[1], ARGV[i])
end
if redis.call('ZCARD', KEYS[1]) == 0 then
    redis.call('SREM', KEYS[2], ARGV[2])
end
return removed
"#;

const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis-backed audit log
#[derive(Clone)]
pub struct RedisAuditLog {
    pool: RedisPool,
    key_prefix: String,
    key_ttl: Option<chrono::Duration>,
    skipped: std::sync::Arc<AtomicU64>,
}

impl RedisAuditLog {
    /// Create a store writing keys under `key_prefix`
    pub fn new(pool: RedisPool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
            key_ttl: None,
            skipped: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }

    /// Expire each identity's history this long after its newest event
    pub fn with_key_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.key_ttl = Some(ttl);
        self
    }

    /// Get a Redis connection from the pool
    async fn get_connection(&self) -> Result<deadpool_redis::Connection, StoreError> {
        self.pool.get().await.map_err(|e| {
            StoreError::Unavailable(format!("failed to get Redis connection for audit log: {}", e))
        })
    }

    /// Sorted set holding one identity's events
    fn events_key(&self, identity: &str) -> String {
        format!("{}:events:{}", self.key_prefix, identity)
    }

    /// Set of identities that have events
    fn identities_key(&self) -> String {
        format!("{}:identities", self.key_prefix)
    }

    /// Single-holder pruning lease
    fn lease_key(&self) -> String {
        format!("{}:prune-lease", self.key_prefix)
    }

    fn decode_members(&self, members: Vec<String>) -> Vec<AuthEvent> {
        let total = members.len();
        let events: Vec<AuthEvent> = members
            .iter()
            .filter_map(|member| decode_member(member))
            .collect();

        let corrupt = (total - events.len()) as u64;
        if corrupt > 0 {
            let skipped_total = self.skipped.fetch_add(corrupt, Ordering::Relaxed) + corrupt;
            tracing::warn!(
                skipped = corrupt,
                skipped_total = skipped_total,
                "Skipped malformed audit records"
            );
        }
        events
    }

    async fn identities(&self, conn: &mut deadpool_redis::Connection) -> Result<Vec<String>, StoreError> {
        let identities: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.identities_key())
            .query_async(conn.deref_mut())
            .await?;
        Ok(identities)
    }
}

fn encode_member(event: &AuthEvent) -> Result<String, StoreError> {
    Ok(format!("{}:{}", uuid::Uuid::now_v7(), serde_json::to_string(event)?))
}

fn decode_member(member: &str) -> Option<AuthEvent> {
    let (_, json) = member.split_once(':')?;
    serde_json::from_str(json).ok()
}

/// Members scored in the cutoff's own millisecond that still fall before it
///
/// Scores drop sub-millisecond precision, so the score range alone cannot
/// separate these from events at or after the cutoff. Unreadable members
/// are kept.
fn boundary_members_before(members: &[String], cutoff: DateTime<Utc>) -> Vec<&str> {
    members
        .iter()
        .filter(|member| decode_member(member).is_some_and(|event| event.timestamp < cutoff))
        .map(String::as_str)
        .collect()
}

#[async_trait]
impl AuditLogStore for RedisAuditLog {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn append(&self, event: &AuthEvent) -> Result<(), StoreError> {
        let member = encode_member(event)?;
        let key = self.events_key(&event.identity);
        let mut conn = self.get_connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZADD")
            .arg(&key)
            .arg(event.timestamp.timestamp_millis())
            .arg(&member)
            .ignore()
            .cmd("SADD")
            .arg(self.identities_key())
            .arg(&event.identity)
            .ignore();
        if let Some(expire_at) = self
            .key_ttl
            .and_then(|ttl| event.timestamp.checked_add_signed(ttl))
        {
            pipe.cmd("PEXPIREAT")
                .arg(&key)
                .arg(expire_at.timestamp_millis())
                .ignore();
        }
        let _: () = pipe.query_async(conn.deref_mut()).await?;

        Ok(())
    }

    async fn query(
        &self,
        identity: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuthEvent>, StoreError> {
        let mut conn = self.get_connection().await?;
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.events_key(identity))
            .arg(since.timestamp_millis())
            .arg("+inf")
            .query_async(conn.deref_mut())
            .await?;

        // Scores are truncated to milliseconds
        let mut events: Vec<AuthEvent> = self
            .decode_members(members)
            .into_iter()
            .filter(|event| event.timestamp >= since)
            .collect();
        events.sort_by_key(|event| event.timestamp);
        Ok(events)
    }

    async fn expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<AuthEvent>, StoreError> {
        let mut conn = self.get_connection().await?;
        let cutoff_ms = cutoff.timestamp_millis();

        let mut events = Vec::new();
        for identity in self.identities(&mut conn).await? {
            // Inclusive, the boundary millisecond is filtered below
            let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
                .arg(self.events_key(&identity))
                .arg("-inf")
                .arg(cutoff_ms)
                .query_async(conn.deref_mut())
                .await?;
            events.extend(
                self.decode_members(members)
                    .into_iter()
                    .filter(|event| event.timestamp < cutoff),
            );
        }
        events.sort_by_key(|event| event.timestamp);
        Ok(events)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.get_connection().await?;
        let cutoff_ms = cutoff.timestamp_millis();
        let script = redis::Script::new(PRUNE_IDENTITY_SCRIPT);

        let mut deleted = 0u64;
        for identity in self.identities(&mut conn).await? {
            let key = self.events_key(&identity);
            let boundary: Vec<String> = redis::cmd("ZRANGEBYSCORE")
                .arg(&key)
                .arg(cutoff_ms)
                .arg(cutoff_ms)
                .query_async(conn.deref_mut())
                .await?;

            let removed: u64 = script
                .key(&key)
                .key(self.identities_key())
                .arg(cutoff_ms)
                .arg(&identity)
                .arg(boundary_members_before(&boundary, cutoff))
                .invoke_async(conn.deref_mut())
                .await?;
            deleted += removed;
        }

        Ok(deleted)
    }

    fn skipped_records(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(conn.deref_mut()).await?;
        Ok(())
    }

    async fn try_acquire_prune_lease(&self, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.get_connection().await?;
        let key = self.lease_key();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(conn.deref_mut())
            .await?;
        if acquired.is_some() {
            return Ok(true);
        }

        let current: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(conn.deref_mut())
            .await?;
        if current.as_deref() == Some(holder) {
            let _: () = redis::cmd("PEXPIRE")
                .arg(&key)
                .arg(ttl_ms)
                .query_async(conn.deref_mut())
                .await?;
            return Ok(true);
        }

        Ok(false)
    }

    async fn release_prune_lease(&self, holder: &str) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let _: i64 = redis::Script::new(RELEASE_LEASE_SCRIPT)
            .key(self.lease_key())
            .arg(holder)
            .invoke_async(conn.deref_mut())
            .await?;
        Ok(())
    }
}
