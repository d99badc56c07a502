//! JSONL archival for audit events before retention pruning
//!
//! Expired events are copied to one-JSON-per-line files before the pruner
//! deletes them from the store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use super::event::AuthEvent;
use crate::error::{Error, Result};

/// Archive a batch of auth events to a JSONL file.
///
/// Creates `archive_dir` if it doesn't exist and writes events as
/// newline-delimited JSON to `auth_archive_YYYYMMDD_HHMMSS.jsonl`, stamped
/// with `now`. A second archive in the same second gets a numeric suffix
/// rather than overwriting the first.
///
/// Returns the path to the created archive file.
pub async fn archive_events(
    events: &[AuthEvent],
    archive_dir: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    if events.is_empty() {
        return Err(Error::Internal("No events to archive".into()));
    }

    tokio::fs::create_dir_all(archive_dir).await.map_err(|e| {
        Error::Internal(format!(
            "Failed to create archive directory {}: {}",
            archive_dir.display(),
            e
        ))
    })?;

    let mut lines = String::new();
    for event in events {
        let line = serde_json::to_string(event).map_err(|e| {
            Error::Internal(format!("Failed to serialize auth event for archive: {}", e))
        })?;
        lines.push_str(&line);
        lines.push('\n');
    }

    let stem = format!("auth_archive_{}", now.format("%Y%m%d_%H%M%S"));
    let (filepath, mut file) = create_unique(archive_dir, &stem).await?;

    file.write_all(lines.as_bytes()).await?;
    file.sync_all().await?;

    tracing::info!(
        "Archived {} auth events to {}",
        events.len(),
        filepath.display()
    );

    Ok(filepath)
}

async fn create_unique(dir: &Path, stem: &str) -> Result<(PathBuf, tokio::fs::File)> {
    let mut suffix = 0u32;
    loop {
        let filename = if suffix == 0 {
            format!("{}.jsonl", stem)
        } else {
            format!("{}_{}.jsonl", stem, suffix)
        };
        let filepath = dir.join(filename);

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&filepath)
            .await
        {
            Ok(file) => return Ok((filepath, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => {
                return Err(Error::Internal(format!(
                    "Failed to create archive file {}: {}",
                    filepath.display(),
                    e
                )))
            }
        }
    }
}
