//! Dead-letter queue: a store of terminally-failed messages with an
//! `Active -> {Retried, Discarded, Expired}` transition DAG. Terminal
//! transitions are irreversible. Grounded on an in-memory
//! `WarningService` (category/severity bookkeeping, oldest-eviction,
//! statistics by group) generalized from operational warnings to
//! failed-message entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hero_common::ProcessingErrorInfo;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const REASON_TRUNCATE_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeadLetterStatus {
    Active,
    Retried,
    Discarded,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub entry_id: Uuid,
    pub message_id: Uuid,
    pub message_type: String,
    pub component: String,
    pub reason: String,
    pub error: ProcessingErrorInfo,
    pub payload: serde_json::Value,
    pub status: DeadLetterStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-status, per-component, per-reason counts plus oldest/newest
/// timestamps.
#[derive(Debug, Clone, Serialize, Default)]
pub struct DeadLetterStatistics {
    pub total_by_status: HashMap<String, u64>,
    pub by_component: HashMap<String, u64>,
    pub by_reason: HashMap<String, u64>,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Truncates a reason string to 50 characters, appending "…" when longer.
pub fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= REASON_TRUNCATE_LEN {
        reason.to_string()
    } else {
        let truncated: String = reason.chars().take(REASON_TRUNCATE_LEN).collect();
        format!("{truncated}…")
    }
}

#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    async fn send(
        &self,
        message_id: Uuid,
        message_type: String,
        component: String,
        reason: String,
        error: ProcessingErrorInfo,
        payload: serde_json::Value,
    ) -> Uuid;

    async fn list(&self, limit: usize) -> Vec<DeadLetterEntry>;

    /// Marks `Active -> Retried`; requires `message_type` to match the
    /// stored entry. Does not itself re-dispatch.
    async fn retry(&self, entry_id: Uuid, expected_type: &str) -> bool;

    async fn discard(&self, entry_id: Uuid) -> bool;

    async fn count(&self) -> usize;

    async fn statistics(&self) -> DeadLetterStatistics;

    /// Marks entries older than `older_than` as `Expired`. Not part of the
    /// spec's minimal contract but a natural complement to `CleanupOldEntries`
    /// on the neighboring storage traits.
    async fn expire_older_than(&self, older_than: DateTime<Utc>) -> usize;
}

pub struct InMemoryDeadLetterQueue {
    entries: RwLock<HashMap<Uuid, DeadLetterEntry>>,
    next_sequence: AtomicU64,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
        }
    }
}

impl Default for InMemoryDeadLetterQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDeadLetterQueue {
    async fn send(
        &self,
        message_id: Uuid,
        message_type: String,
        component: String,
        reason: String,
        error: ProcessingErrorInfo,
        payload: serde_json::Value,
    ) -> Uuid {
        let entry_id = Uuid::new_v4();
        let now = Utc::now();
        let entry = DeadLetterEntry {
            entry_id,
            message_id,
            message_type,
            component,
            reason: truncate_reason(&reason),
            error,
            payload,
            status: DeadLetterStatus::Active,
            created_at: now,
            updated_at: now,
        };
        self.next_sequence.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(%entry_id, %message_id, "message sent to dead-letter queue");
        self.entries.write().insert(entry_id, entry);
        entry_id
    }

    async fn list(&self, limit: usize) -> Vec<DeadLetterEntry> {
        let entries = self.entries.read();
        let mut active: Vec<_> = entries
            .values()
            .filter(|e| e.status == DeadLetterStatus::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        active.truncate(limit);
        active
    }

    async fn retry(&self, entry_id: Uuid, expected_type: &str) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(&entry_id) {
            Some(entry)
                if entry.status == DeadLetterStatus::Active
                    && entry.message_type == expected_type =>
            {
                entry.status = DeadLetterStatus::Retried;
                entry.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    async fn discard(&self, entry_id: Uuid) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(&entry_id) {
            Some(entry) if entry.status == DeadLetterStatus::Active => {
                entry.status = DeadLetterStatus::Discarded;
                entry.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    async fn count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|e| e.status == DeadLetterStatus::Active)
            .count()
    }

    async fn statistics(&self) -> DeadLetterStatistics {
        let entries = self.entries.read();
        let mut stats = DeadLetterStatistics::default();
        for entry in entries.values() {
            let status_key = format!("{:?}", entry.status);
            *stats.total_by_status.entry(status_key).or_insert(0) += 1;
            *stats.by_component.entry(entry.component.clone()).or_insert(0) += 1;
            *stats.by_reason.entry(entry.reason.clone()).or_insert(0) += 1;
            stats.oldest_entry = Some(match stats.oldest_entry {
                Some(existing) if existing <= entry.created_at => existing,
                _ => entry.created_at,
            });
            stats.newest_entry = Some(match stats.newest_entry {
                Some(existing) if existing >= entry.created_at => existing,
                _ => entry.created_at,
            });
        }
        stats
    }

    async fn expire_older_than(&self, older_than: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let mut expired = 0;
        for entry in entries.values_mut() {
            if entry.status == DeadLetterStatus::Active && entry.created_at < older_than {
                entry.status = DeadLetterStatus::Expired;
                entry.updated_at = Utc::now();
                expired += 1;
            }
        }
        expired
    }
}
