//! Inbox persistence trait and an in-memory reference implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hero_common::HeroError;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::{InboxEntry, InboxStatus};

#[async_trait]
pub trait InboxStorage: Send + Sync {
    /// True if `message_id` has already been seen within `window` (no
    /// window means pure, permanent id uniqueness).
    async fn is_duplicate(&self, message_id: Uuid, window: Option<Duration>) -> Result<bool, HeroError>;

    /// Records a new `Pending` entry. Implementations backed by a
    /// relational store should do this in the same transaction as the
    /// duplicate check so two concurrent intakes can't both pass it.
    async fn add(&self, message_id: Uuid) -> Result<(), HeroError>;

    async fn get(&self, message_id: Uuid) -> Result<Option<InboxEntry>, HeroError>;

    async fn mark_processed(&self, message_id: Uuid) -> Result<(), HeroError>;

    async fn mark_failed(&self, message_id: Uuid, reason: String) -> Result<(), HeroError>;

    async fn get_unprocessed(&self, limit: u32) -> Result<Vec<InboxEntry>, HeroError>;

    async fn get_unprocessed_count(&self) -> Result<u64, HeroError>;

    /// Deletes entries older than `older_than`, returning how many were
    /// removed. Callers run this on a schedule to keep the dedup table
    /// from growing without bound.
    async fn cleanup_old_entries(&self, older_than: Duration) -> Result<u64, HeroError>;
}

#[derive(Default)]
pub struct InMemoryInboxStorage {
    entries: RwLock<HashMap<Uuid, InboxEntry>>,
}

impl InMemoryInboxStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InboxStorage for InMemoryInboxStorage {
    async fn is_duplicate(&self, message_id: Uuid, window: Option<Duration>) -> Result<bool, HeroError> {
        let entries = self.entries.read();
        let Some(entry) = entries.get(&message_id) else {
            return Ok(false);
        };
        match window {
            None => Ok(true),
            Some(window) => {
                let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
                Ok(entry.received_at >= cutoff)
            }
        }
    }

    async fn add(&self, message_id: Uuid) -> Result<(), HeroError> {
        self.entries.write().insert(message_id, InboxEntry::new(message_id));
        Ok(())
    }

    async fn get(&self, message_id: Uuid) -> Result<Option<InboxEntry>, HeroError> {
        Ok(self.entries.read().get(&message_id).cloned())
    }

    async fn mark_processed(&self, message_id: Uuid) -> Result<(), HeroError> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&message_id) {
            entry.status = InboxStatus::Processed;
            entry.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(&self, message_id: Uuid, reason: String) -> Result<(), HeroError> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&message_id) {
            entry.status = InboxStatus::Failed;
            entry.last_error = Some(reason);
            entry.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_unprocessed(&self, limit: u32) -> Result<Vec<InboxEntry>, HeroError> {
        let entries = self.entries.read();
        let mut pending: Vec<InboxEntry> = entries
            .values()
            .filter(|e| e.status == InboxStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.received_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn get_unprocessed_count(&self) -> Result<u64, HeroError> {
        Ok(self
            .entries
            .read()
            .values()
            .filter(|e| e.status == InboxStatus::Pending)
            .count() as u64)
    }

    async fn cleanup_old_entries(&self, older_than: Duration) -> Result<u64, HeroError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.received_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}
