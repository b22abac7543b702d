//! Scheduled-message shape shared by both scheduler variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduledStatus {
    Pending,
    /// Claimed by a poller and in flight; not visible to `GetDue` again
    /// until it resolves, so two pollers can't both deliver the same row.
    InProgress,
    Delivered,
    Failed,
    Cancelled,
}

impl ScheduledStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScheduledStatus::Delivered | ScheduledStatus::Failed | ScheduledStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub id: Uuid,
    pub destination: String,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub deliver_at: DateTime<Utc>,
    pub status: ScheduledStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ScheduledMessage {
    pub fn new(
        destination: impl Into<String>,
        message_type: impl Into<String>,
        payload: serde_json::Value,
        deliver_at: DateTime<Utc>,
        priority: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            destination: destination.into(),
            message_type: message_type.into(),
            payload,
            priority,
            deliver_at,
            status: ScheduledStatus::Pending,
            created_at: now,
            updated_at: now,
            delivered_at: None,
            last_error: None,
        }
    }
}

/// Filter for `pending(...)`; every field is optional and narrows the
/// result set further when set.
#[derive(Debug, Clone, Default)]
pub struct PendingQuery {
    pub status: Option<ScheduledStatus>,
    pub destination: Option<String>,
    pub message_type: Option<String>,
    pub deliver_before: Option<DateTime<Utc>>,
    pub deliver_after: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: usize,
}

impl PendingQuery {
    pub fn matches(&self, msg: &ScheduledMessage) -> bool {
        if let Some(status) = self.status {
            if msg.status != status {
                return false;
            }
        }
        if let Some(destination) = &self.destination {
            if &msg.destination != destination {
                return false;
            }
        }
        if let Some(message_type) = &self.message_type {
            if &msg.message_type != message_type {
                return false;
            }
        }
        if let Some(before) = self.deliver_before {
            if msg.deliver_at > before {
                return false;
            }
        }
        if let Some(after) = self.deliver_after {
            if msg.deliver_at < after {
                return false;
            }
        }
        true
    }
}
