//! Audit sink boundary: interaction log of connect/disconnect events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

/// One recorded interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: u64,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

/// Persistent interaction log.
///
/// Implementations never fail loudly: errors are logged and reported as
/// `false` or an empty result so the relay keeps working without a store.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_event(&self, event_type: &str, details: &str) -> bool;

    /// Most recent entries first, at most `limit` of them.
    async fn recent(&self, limit: usize) -> Vec<AuditEntry>;

    /// Delete entries older than `max_age`.
    async fn purge_older_than(&self, max_age: chrono::Duration) -> bool;
}

/// Sink used when auditing is disabled.
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record_event(&self, event_type: &str, _details: &str) -> bool {
        warn!(event_type, "Audit log not configured, skipping event");
        false
    }

    async fn recent(&self, _limit: usize) -> Vec<AuditEntry> {
        warn!("Audit log not configured, returning no entries");
        Vec::new()
    }

    async fn purge_older_than(&self, _max_age: chrono::Duration) -> bool {
        warn!("Audit log not configured, cannot purge");
        false
    }
}

/// In-memory sink, handy for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }

    /// Insert an entry with an explicit timestamp.
    pub async fn insert_at(&self, event_type: &str, details: &str, timestamp: DateTime<Utc>) {
        let mut entries = self.entries.lock().await;
        let id = entries.last().map(|e| e.id + 1).unwrap_or(1);
        entries.push(AuditEntry {
            id,
            event_type: event_type.to_string(),
            timestamp,
            details: details.to_string(),
        });
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record_event(&self, event_type: &str, details: &str) -> bool {
        self.insert_at(event_type, details, Utc::now()).await;
        true
    }

    async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock().await;
        newest_first(entries.clone(), limit)
    }

    async fn purge_older_than(&self, max_age: chrono::Duration) -> bool {
        let Some(cutoff) = purge_cutoff(max_age) else {
            return true;
        };
        self.entries.lock().await.retain(|e| e.timestamp >= cutoff);
        true
    }
}

/// Retention window of `days` days, saturating at the largest span chrono can hold.
pub fn retention_days(days: u32) -> chrono::Duration {
    chrono::Duration::try_days(i64::from(days)).unwrap_or(chrono::Duration::MAX)
}

/// Oldest timestamp a purge keeps. `None` when the cutoff falls before the
/// representable range, in which case nothing is old enough to purge.
pub(crate) fn purge_cutoff(max_age: chrono::Duration) -> Option<DateTime<Utc>> {
    Utc::now().checked_sub_signed(max_age)
}

/// Sort by timestamp descending (ties broken by id) and truncate.
pub(crate) fn newest_first(mut entries: Vec<AuditEntry>, limit: usize) -> Vec<AuditEntry> {
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    entries.truncate(limit);
    entries
}
