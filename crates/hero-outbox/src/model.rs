//! Outbox entry shape and status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    InProgress,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Processed | OutboxStatus::Failed)
    }
}

/// One row of the transactional outbox: a message durably recorded in the
/// same transaction as the business write that produced it, waiting to be
/// published by the outbox processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub message_id: Uuid,
    pub destination: String,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn new(destination: impl Into<String>, message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            destination: destination.into(),
            message_type: message_type.into(),
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            next_retry_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
