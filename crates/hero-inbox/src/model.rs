//! Inbox entry shape: one row per message id seen, used to make
//! at-least-once upstream delivery look at-most-once to handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboxStatus {
    Pending,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEntry {
    pub message_id: Uuid,
    pub status: InboxStatus,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl InboxEntry {
    pub fn new(message_id: Uuid) -> Self {
        Self {
            message_id,
            status: InboxStatus::Pending,
            received_at: Utc::now(),
            processed_at: None,
            last_error: None,
        }
    }
}
