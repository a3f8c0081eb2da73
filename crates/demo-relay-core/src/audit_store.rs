//! JSONL-based audit store: interaction log as an append-only JSONL file.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEntry, AuditSink, newest_first, purge_cutoff};
use crate::error::Result;

/// File-based audit sink.
///
/// Layout: `<base>/interaction_log.jsonl`, one [`AuditEntry`] per line.
pub struct JsonlAuditStore {
    base: PathBuf,
    /// Next entry id, loaded lazily from disk. Also serialises writers.
    next_id: Mutex<Option<u64>>,
}

impl JsonlAuditStore {
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            next_id: Mutex::new(None),
        }
    }

    fn log_path(&self) -> PathBuf {
        self.base.join("interaction_log.jsonl")
    }

    async fn load_entries(&self) -> Result<Vec<AuditEntry>> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    skipped += 1;
                    debug!(%e, "Unparsable audit line");
                }
            }
        }
        if skipped > 0 {
            warn!(skipped, path = %path.display(), "Skipped corrupt audit lines");
        }
        Ok(entries)
    }

    /// Whether the last write was cut off before its newline.
    async fn ends_mid_line(&self) -> Result<bool> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(false);
        }
        let data = tokio::fs::read(&path).await?;
        Ok(data.last().is_some_and(|b| *b != b'\n'))
    }

    async fn append(&self, event_type: &str, details: &str) -> Result<u64> {
        let mut next_id = self.next_id.lock().await;
        let id = match *next_id {
            Some(id) => id,
            None => {
                let entries = self.load_entries().await?;
                entries.iter().map(|e| e.id).max().unwrap_or(0) + 1
            }
        };

        let entry = AuditEntry {
            id,
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            details: details.to_string(),
        };
        let mut line = serde_json::to_string(&entry)?;
        if next_id.is_none() && self.ends_mid_line().await? {
            line.insert(0, '\n');
        }

        tokio::fs::create_dir_all(&self.base).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        *next_id = Some(id + 1);
        Ok(id)
    }

    async fn purge(&self, max_age: chrono::Duration) -> Result<usize> {
        let _writer = self.next_id.lock().await;
        let Some(cutoff) = purge_cutoff(max_age) else {
            return Ok(0);
        };
        let entries = self.load_entries().await?;
        let before = entries.len();
        let kept: Vec<_> = entries.into_iter().filter(|e| e.timestamp >= cutoff).collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut data = String::new();
        for entry in &kept {
            data.push_str(&serde_json::to_string(entry)?);
            data.push('\n');
        }
        // Atomic write: write to temp then rename
        let path = self.log_path();
        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(removed)
    }
}

#[async_trait]
impl AuditSink for JsonlAuditStore {
    async fn record_event(&self, event_type: &str, details: &str) -> bool {
        match self.append(event_type, details).await {
            Ok(id) => {
                debug!(id, event_type, "Logged interaction");
                true
            }
            Err(e) => {
                error!(%e, event_type, "Failed to log interaction");
                false
            }
        }
    }

    async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        match self.load_entries().await {
            Ok(entries) => newest_first(entries, limit),
            Err(e) => {
                error!(%e, "Failed to retrieve interaction logs");
                Vec::new()
            }
        }
    }

    async fn purge_older_than(&self, max_age: chrono::Duration) -> bool {
        match self.purge(max_age).await {
            Ok(removed) => {
                info!(removed, days = max_age.num_days(), "Cleared old interaction logs");
                true
            }
            Err(e) => {
                error!(%e, "Failed to clear old interaction logs");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlAuditStore::new(dir.path().to_path_buf());

        assert!(store.record_event("connect", "Controller connected").await);
        assert!(store.record_event("disconnect", "Controller disconnected").await);

        let recent = store.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event_type, "disconnect");
        assert_eq!(recent[0].id, 2);
        assert_eq!(recent[1].id, 1);
    }

    #[tokio::test]
    async fn test_ids_continue_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonlAuditStore::new(dir.path().to_path_buf());
            store.record_event("connect", "a").await;
            store.record_event("connect", "b").await;
        }
        let store = JsonlAuditStore::new(dir.path().to_path_buf());
        store.record_event("connect", "c").await;
        let recent = store.recent(1).await;
        assert_eq!(recent[0].id, 3);
        assert_eq!(recent[0].details, "c");
    }

    #[tokio::test]
    async fn test_recent_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlAuditStore::new(dir.path().join("never-created"));
        assert!(store.recent(100).await.is_empty());
    }

    #[tokio::test]
    async fn test_purge_drops_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlAuditStore::new(dir.path().to_path_buf());

        let old = AuditEntry {
            id: 1,
            event_type: "connect".into(),
            timestamp: Utc::now() - chrono::Duration::days(40),
            details: "old".into(),
        };
        std::fs::write(
            dir.path().join("interaction_log.jsonl"),
            format!("{}\n", serde_json::to_string(&old).unwrap()),
        )
        .unwrap();
        store.record_event("connect", "fresh").await;

        assert!(store.purge_older_than(chrono::Duration::days(30)).await);
        let left = store.recent(10).await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].details, "fresh");
        assert_eq!(left[0].id, 2);
    }

    #[tokio::test]
    async fn test_corrupt_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = AuditEntry {
            id: 4,
            event_type: "connect".into(),
            timestamp: Utc::now(),
            details: "before crash".into(),
        };
        std::fs::write(
            dir.path().join("interaction_log.jsonl"),
            format!(
                "{}\n{{\"id\":5,\"event_ty",
                serde_json::to_string(&good).unwrap()
            ),
        )
        .unwrap();
        let store = JsonlAuditStore::new(dir.path().to_path_buf());

        assert_eq!(store.recent(10).await.len(), 1);
        assert!(store.record_event("disconnect", "after crash").await);

        let recent = store.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].details, "after crash");
        assert_eq!(recent[0].id, 5);
        assert!(store.purge_older_than(chrono::Duration::days(1)).await);
    }

    #[tokio::test]
    async fn test_purge_with_huge_retention_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlAuditStore::new(dir.path().to_path_buf());
        store.record_event("connect", "kept").await;

        assert!(store.purge_older_than(chrono::Duration::MAX).await);
        assert_eq!(store.recent(10).await.len(), 1);
    }
}
