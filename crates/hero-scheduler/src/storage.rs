//! Scheduled-message persistence trait and an in-memory reference
//! implementation shared by both the timer and poller-based variants.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hero_common::HeroError;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::{PendingQuery, ScheduledMessage, ScheduledStatus};

#[async_trait]
pub trait ScheduledMessageStorage: Send + Sync {
    async fn schedule(&self, message: ScheduledMessage) -> Result<(), HeroError>;

    /// Atomically selects up to `batch_size` `Pending` entries due at or
    /// before `now`, ordered by `(deliver_at ASC, priority DESC)`, and
    /// marks them `InProgress` so two pollers can't both claim a row.
    async fn get_due(&self, now: DateTime<Utc>, batch_size: u32) -> Result<Vec<ScheduledMessage>, HeroError>;

    /// Succeeds (returns `true`) only if the entry is currently `Pending`.
    async fn cancel(&self, id: Uuid) -> Result<bool, HeroError>;

    async fn get(&self, id: Uuid) -> Result<Option<ScheduledMessage>, HeroError>;

    async fn pending(&self, query: PendingQuery) -> Result<Vec<ScheduledMessage>, HeroError>;

    async fn pending_count(&self) -> Result<u64, HeroError>;

    async fn mark_delivered(&self, id: Uuid) -> Result<(), HeroError>;

    async fn mark_failed(&self, id: Uuid, reason: String) -> Result<(), HeroError>;

    /// Resets an `InProgress` entry back to `Pending` for retry, used by
    /// `handle_delivery_failure` policies that choose to redeliver rather
    /// than terminally fail.
    async fn reschedule(&self, id: Uuid, deliver_at: DateTime<Utc>) -> Result<(), HeroError>;

    /// Removes `Delivered`/`Cancelled`/`Failed` entries last touched before
    /// `older_than` ago. Returns the number removed.
    async fn cleanup(&self, older_than: Duration) -> Result<u64, HeroError>;

    /// Removes a single entry outright, regardless of status. Used by the
    /// in-memory timer variant's grace-period self-removal.
    async fn remove(&self, id: Uuid) -> Result<(), HeroError>;
}

#[derive(Default)]
pub struct InMemoryScheduledMessageStorage {
    entries: RwLock<HashMap<Uuid, ScheduledMessage>>,
}

impl InMemoryScheduledMessageStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduledMessageStorage for InMemoryScheduledMessageStorage {
    async fn schedule(&self, message: ScheduledMessage) -> Result<(), HeroError> {
        self.entries.write().insert(message.id, message);
        Ok(())
    }

    async fn get_due(&self, now: DateTime<Utc>, batch_size: u32) -> Result<Vec<ScheduledMessage>, HeroError> {
        let mut entries = self.entries.write();
        let mut due: Vec<Uuid> = entries
            .values()
            .filter(|m| m.status == ScheduledStatus::Pending && m.deliver_at <= now)
            .map(|m| m.id)
            .collect();
        due.sort_by(|a, b| {
            let (ma, mb) = (&entries[a], &entries[b]);
            ma.deliver_at.cmp(&mb.deliver_at).then(mb.priority.cmp(&ma.priority))
        });
        due.truncate(batch_size as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(entry) = entries.get_mut(&id) {
                entry.status = ScheduledStatus::InProgress;
                entry.updated_at = now;
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn cancel(&self, id: Uuid) -> Result<bool, HeroError> {
        let mut entries = self.entries.write();
        match entries.get_mut(&id) {
            Some(entry) if entry.status == ScheduledStatus::Pending => {
                entry.status = ScheduledStatus::Cancelled;
                entry.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScheduledMessage>, HeroError> {
        Ok(self.entries.read().get(&id).cloned())
    }

    async fn pending(&self, query: PendingQuery) -> Result<Vec<ScheduledMessage>, HeroError> {
        let entries = self.entries.read();
        let mut matched: Vec<ScheduledMessage> = entries.values().filter(|m| query.matches(m)).cloned().collect();
        matched.sort_by_key(|m| m.deliver_at);
        let limit = if query.limit == 0 { matched.len() } else { query.limit };
        Ok(matched.into_iter().skip(query.offset).take(limit).collect())
    }

    async fn pending_count(&self) -> Result<u64, HeroError> {
        Ok(self
            .entries
            .read()
            .values()
            .filter(|m| m.status == ScheduledStatus::Pending)
            .count() as u64)
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<(), HeroError> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&id) {
            let now = Utc::now();
            entry.status = ScheduledStatus::Delivered;
            entry.delivered_at = Some(now);
            entry.updated_at = now;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: String) -> Result<(), HeroError> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&id) {
            entry.status = ScheduledStatus::Failed;
            entry.last_error = Some(reason);
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reschedule(&self, id: Uuid, deliver_at: DateTime<Utc>) -> Result<(), HeroError> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&id) {
            entry.status = ScheduledStatus::Pending;
            entry.deliver_at = deliver_at;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn cleanup(&self, older_than: Duration) -> Result<u64, HeroError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, m| !(m.status.is_terminal() && m.updated_at < cutoff));
        Ok((before - entries.len()) as u64)
    }

    async fn remove(&self, id: Uuid) -> Result<(), HeroError> {
        self.entries.write().remove(&id);
        Ok(())
    }
}
