//! JSON-lines audit log file
//!
//! One record per line in the persisted record shape. Appends go through
//! `O_APPEND` and are synced to disk before they are acknowledged. Pruning
//! rewrites the file through a temporary sibling and an atomic rename.
//!
//! Queries scan the whole file, so this backend suits single-instance
//! deployments with modest traffic. Writers are serialized per process only;
//! use the `postgres` or `redis` backend when several instances share a log.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::AuditLogStore;
use crate::audit::event::AuthEvent;
use crate::error::StoreError;

/// Append-only JSONL audit store
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
    skipped: AtomicU64,
}

/// One parsed line of the log
enum Line {
    Event(AuthEvent),
    Corrupt,
    Blank,
}

/// Bytes that are not UTF-8 or not a record are `Corrupt`
fn parse_line(line: &[u8]) -> Line {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Line::Blank;
    }
    match serde_json::from_slice::<AuthEvent>(line) {
        Ok(event) => Line::Event(event),
        Err(_) => Line::Corrupt,
    }
}

fn lines(contents: &[u8]) -> impl Iterator<Item = &[u8]> {
    contents.split(|byte| *byte == b'\n')
}

impl JsonlAuditLog {
    /// Open (creating if needed) the log file and its parent directories
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            skipped: AtomicU64::new(0),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_contents(&self) -> Result<Vec<u8>, StoreError> {
        match fs::read(&self.path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Parse every line, keeping events that match `keep`
    fn scan(&self, contents: &[u8], keep: impl Fn(&AuthEvent) -> bool) -> Vec<AuthEvent> {
        let mut corrupt = 0u64;
        let mut events: Vec<AuthEvent> = lines(contents)
            .filter_map(|line| match parse_line(line) {
                Line::Event(event) if keep(&event) => Some(event),
                Line::Event(_) | Line::Blank => None,
                Line::Corrupt => {
                    corrupt += 1;
                    None
                }
            })
            .collect();

        if corrupt > 0 {
            let total = self.skipped.fetch_add(corrupt, Ordering::Relaxed) + corrupt;
            tracing::warn!(
                path = %self.path.display(),
                skipped = corrupt,
                skipped_total = total,
                "Skipped malformed audit records"
            );
        }

        events.sort_by_key(|event| event.timestamp);
        events
    }
}

#[async_trait]
impl AuditLogStore for JsonlAuditLog {
    fn backend(&self) -> &'static str {
        "jsonl"
    }

    async fn append(&self, event: &AuthEvent) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn query(
        &self,
        identity: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuthEvent>, StoreError> {
        let contents = self.read_contents().await?;
        Ok(self.scan(&contents, |event| {
            event.identity == identity && event.timestamp >= since
        }))
    }

    async fn expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<AuthEvent>, StoreError> {
        let contents = self.read_contents().await?;
        Ok(self.scan(&contents, |event| event.timestamp < cutoff))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;
        let contents = self.read_contents().await?;

        let mut kept = Vec::with_capacity(contents.len());
        let mut deleted = 0u64;
        for line in lines(&contents) {
            match parse_line(line) {
                Line::Event(event) if event.timestamp < cutoff => deleted += 1,
                // Malformed lines have no age; keep them for forensic review
                Line::Event(_) | Line::Corrupt => {
                    kept.extend_from_slice(line);
                    kept.push(b'\n');
                }
                Line::Blank => {}
            }
        }

        if deleted == 0 {
            return Ok(0);
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".prune");
        let tmp_path = PathBuf::from(tmp_name);

        let mut tmp = fs::File::create(&tmp_path).await?;
        tmp.write_all(&kept).await?;
        tmp.sync_all().await?;
        drop(tmp);
        fs::rename(&tmp_path, &self.path).await?;

        Ok(deleted)
    }

    fn skipped_records(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        fs::metadata(&self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::AuthEventKind;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_append_writes_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlAuditLog::open(dir.path().join("auth.jsonl")).await.unwrap();

        store
            .append(&AuthEvent::new(AuthEventKind::LoginFailed, "alice@example.com", t0()))
            .await
            .unwrap();
        store
            .append(&AuthEvent::new(AuthEventKind::LoginSuccess, "alice@example.com", t0()))
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "LOGIN_FAILED");
        assert_eq!(first["email"], "alice@example.com");
    }

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlAuditLog::open(dir.path().join("auth.jsonl")).await.unwrap();
        let event = AuthEvent::new(AuthEventKind::LoginRateLimited, "bob@example.com", t0())
            .with_field("attempts", 5)
            .with_field("retry_after_secs", 300);

        store.append(&event).await.unwrap();

        let events = store.query("bob@example.com", t0()).await.unwrap();
        assert_eq!(events, vec![event]);
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.jsonl");
        let valid = serde_json::to_string(&AuthEvent::new(
            AuthEventKind::LoginFailed,
            "carol@example.com",
            t0(),
        ))
        .unwrap();
        let contents = format!(
            "{valid}\nnot json at all\n{{\"timestamp\":\"yesterday\",\"event\":\"LOGIN_FAILED\",\"email\":\"carol@example.com\"}}\n\n{valid}\n"
        );
        tokio::fs::write(&path, contents).await.unwrap();

        let store = JsonlAuditLog::open(&path).await.unwrap();
        let events = store.query("carol@example.com", t0()).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(store.skipped_records(), 2);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.jsonl");
        let store = JsonlAuditLog::open(&path).await.unwrap();
        store
            .append(&AuthEvent::new(
                AuthEventKind::LoginFailed,
                "erin@example.com",
                t0() - Duration::days(100),
            ))
            .await
            .unwrap();
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap()
            .write_all(b"\xff\xfe torn\n")
            .await
            .unwrap();
        store
            .append(&AuthEvent::new(AuthEventKind::LoginFailed, "erin@example.com", t0()))
            .await
            .unwrap();

        let events = store
            .query("erin@example.com", t0() - Duration::days(365))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(store.skipped_records(), 1);

        assert_eq!(store.delete_older_than(t0() - Duration::days(90)).await.unwrap(), 1);
        let contents = tokio::fs::read(&path).await.unwrap();
        assert!(contents.windows(2).any(|w| w == b"\xff\xfe"));
        assert_eq!(store.query("erin@example.com", t0()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_visible() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(
            JsonlAuditLog::open(dir.path().join("auth.jsonl")).await.unwrap(),
        );
        let writes = (0..32).map(|i| {
            let store = std::sync::Arc::clone(&store);
            async move {
                let event = AuthEvent::new(
                    AuthEventKind::LoginFailed,
                    "frank@example.com",
                    t0() + Duration::milliseconds(i),
                )
                .with_field("attempt", i);
                store.append(&event).await
            }
        });

        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert_eq!(contents.lines().count(), 32);
        assert!(contents
            .lines()
            .all(|line| serde_json::from_str::<AuthEvent>(line).is_ok()));

        let events = store.query("frank@example.com", t0()).await.unwrap();
        assert_eq!(events.len(), 32);
        assert_eq!(store.skipped_records(), 0);
    }

    #[tokio::test]
    async fn test_delete_older_than_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.jsonl");
        let store = JsonlAuditLog::open(&path).await.unwrap();
        for days in [-100, -91, -10, 0] {
            store
                .append(&AuthEvent::new(
                    AuthEventKind::LoginSuccess,
                    "dave@example.com",
                    t0() + Duration::days(days),
                ))
                .await
                .unwrap();
        }
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap()
            .write_all(b"garbage\n")
            .await
            .unwrap();

        let cutoff = t0() - Duration::days(90);
        assert_eq!(store.expired(cutoff).await.unwrap().len(), 2);
        assert_eq!(store.delete_older_than(cutoff).await.unwrap(), 2);
        assert_eq!(store.delete_older_than(cutoff).await.unwrap(), 0);

        let remaining = store
            .query("dave@example.com", t0() - Duration::days(365))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 2);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("garbage"));
    }

    #[tokio::test]
    async fn test_ping_fails_when_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.jsonl");
        let store = JsonlAuditLog::open(&path).await.unwrap();
        assert!(store.ping().await.is_ok());

        tokio::fs::remove_file(&path).await.unwrap();
        assert!(store.ping().await.is_err());
    }
}
