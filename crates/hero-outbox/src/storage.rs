//! Outbox persistence trait and an in-memory reference implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hero_common::HeroError;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::{OutboxEntry, OutboxStatus};

#[async_trait]
pub trait OutboxStorage: Send + Sync {
    /// Adds an entry. Implementations backed by a relational store should
    /// let this participate in the caller's transaction so the business
    /// write and the outbox row commit atomically.
    async fn add(&self, entry: OutboxEntry) -> Result<(), HeroError>;

    /// Atomically selects up to `batch_size` `Pending` entries due at or
    /// before `now`, ordered by `next_retry_at`, and marks them `InProgress`
    /// in the same operation so two processors can't double-claim a row.
    async fn claim_due(&self, batch_size: u32, now: DateTime<Utc>) -> Result<Vec<OutboxEntry>, HeroError>;

    async fn mark_processed(&self, id: Uuid) -> Result<(), HeroError>;

    async fn mark_failed(&self, id: Uuid, reason: String) -> Result<(), HeroError>;

    async fn update_retry(&self, id: Uuid, retry_count: u32, next_retry_at: DateTime<Utc>) -> Result<(), HeroError>;

    async fn pending_count(&self) -> Result<u64, HeroError>;

    async fn get_failed(&self, limit: u32) -> Result<Vec<OutboxEntry>, HeroError>;

    /// Resets entries stuck `InProgress` for longer than `stuck_after` back
    /// to `Pending`, for recovery after a crash between claim and publish.
    /// Returns the number of entries reset.
    async fn recover_stuck(&self, stuck_after: std::time::Duration) -> Result<u64, HeroError>;
}

#[derive(Default)]
pub struct InMemoryOutboxStorage {
    entries: RwLock<HashMap<Uuid, OutboxEntry>>,
}

impl InMemoryOutboxStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboxStorage for InMemoryOutboxStorage {
    async fn add(&self, entry: OutboxEntry) -> Result<(), HeroError> {
        self.entries.write().insert(entry.id, entry);
        Ok(())
    }

    async fn claim_due(&self, batch_size: u32, now: DateTime<Utc>) -> Result<Vec<OutboxEntry>, HeroError> {
        let mut entries = self.entries.write();
        let mut due: Vec<Uuid> = entries
            .values()
            .filter(|e| e.status == OutboxStatus::Pending && e.next_retry_at <= now)
            .map(|e| e.id)
            .collect();
        due.sort_by_key(|id| entries[id].next_retry_at);
        due.truncate(batch_size as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(entry) = entries.get_mut(&id) {
                entry.status = OutboxStatus::InProgress;
                entry.updated_at = now;
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), HeroError> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&id) {
            entry.status = OutboxStatus::Processed;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: String) -> Result<(), HeroError> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&id) {
            entry.status = OutboxStatus::Failed;
            entry.last_error = Some(reason);
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_retry(&self, id: Uuid, retry_count: u32, next_retry_at: DateTime<Utc>) -> Result<(), HeroError> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&id) {
            entry.status = OutboxStatus::Pending;
            entry.retry_count = retry_count;
            entry.next_retry_at = next_retry_at;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, HeroError> {
        Ok(self
            .entries
            .read()
            .values()
            .filter(|e| e.status == OutboxStatus::Pending)
            .count() as u64)
    }

    async fn get_failed(&self, limit: u32) -> Result<Vec<OutboxEntry>, HeroError> {
        let entries = self.entries.read();
        let mut failed: Vec<OutboxEntry> = entries
            .values()
            .filter(|e| e.status == OutboxStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|e| std::cmp::Reverse(e.updated_at));
        failed.truncate(limit as usize);
        Ok(failed)
    }

    async fn recover_stuck(&self, stuck_after: std::time::Duration) -> Result<u64, HeroError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(stuck_after).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let mut entries = self.entries.write();
        let mut recovered = 0u64;
        for entry in entries.values_mut() {
            if entry.status == OutboxStatus::InProgress && entry.updated_at < cutoff {
                entry.status = OutboxStatus::Pending;
                entry.updated_at = Utc::now();
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}
