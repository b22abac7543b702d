//! In-memory scheduler: one timer task per scheduled message, firing
//! exactly once, with a grace-period self-removal so a caller polling
//! `get`/`pending` right after delivery still observes the terminal state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hero_common::HeroError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::delivery::DeliveryHandler;
use crate::model::{PendingQuery, ScheduledMessage};
use crate::storage::ScheduledMessageStorage;

#[derive(Debug, Clone)]
pub enum When {
    After(Duration),
    At(DateTime<Utc>),
}

pub struct ScheduleHandle {
    pub schedule_id: Uuid,
    pub deliver_at: DateTime<Utc>,
}

pub struct InMemoryScheduler {
    storage: Arc<dyn ScheduledMessageStorage>,
    delivery: Arc<dyn DeliveryHandler>,
    grace_period: Duration,
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl InMemoryScheduler {
    pub fn new(storage: Arc<dyn ScheduledMessageStorage>, delivery: Arc<dyn DeliveryHandler>, grace_period: Duration) -> Self {
        Self {
            storage,
            delivery,
            grace_period,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn schedule(
        &self,
        destination: impl Into<String>,
        message_type: impl Into<String>,
        payload: serde_json::Value,
        when: When,
        priority: i32,
    ) -> Result<ScheduleHandle, HeroError> {
        let now = Utc::now();
        let deliver_at = match when {
            When::After(delay) => {
                now + chrono::Duration::from_std(delay).map_err(|_| HeroError::Dispatch("negative delay".to_string()))?
            }
            When::At(at) => at,
        };
        if deliver_at < now - chrono::Duration::seconds(1) {
            return Err(HeroError::Dispatch("deliver_at is too far in the past".to_string()));
        }

        let message = ScheduledMessage::new(destination, message_type, payload, deliver_at, priority);
        let schedule_id = message.id;
        self.storage.schedule(message).await?;
        self.spawn_timer(schedule_id, deliver_at).await;

        Ok(ScheduleHandle { schedule_id, deliver_at })
    }

    pub async fn cancel(&self, schedule_id: Uuid) -> Result<bool, HeroError> {
        let cancelled = self.storage.cancel(schedule_id).await?;
        if cancelled {
            if let Some(handle) = self.tasks.lock().await.remove(&schedule_id) {
                handle.abort();
            }
        }
        Ok(cancelled)
    }

    pub async fn get(&self, schedule_id: Uuid) -> Result<Option<ScheduledMessage>, HeroError> {
        self.storage.get(schedule_id).await
    }

    pub async fn pending(&self, query: PendingQuery) -> Result<Vec<ScheduledMessage>, HeroError> {
        self.storage.pending(query).await
    }

    pub async fn pending_count(&self) -> Result<u64, HeroError> {
        self.storage.pending_count().await
    }

    async fn spawn_timer(&self, id: Uuid, deliver_at: DateTime<Utc>) {
        let storage = self.storage.clone();
        let delivery = self.delivery.clone();
        let grace_period = self.grace_period;

        let handle = tokio::spawn(async move {
            let wait = (deliver_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            let due = match storage.get_due(Utc::now(), 1).await {
                Ok(due) => due.into_iter().find(|m| m.id == id),
                Err(_) => None,
            };
            if let Some(message) = due {
                match delivery.deliver(id, &message.destination, message.payload.clone()).await {
                    Ok(()) => {
                        let _ = storage.mark_delivered(id).await;
                    }
                    Err(err) => {
                        let _ = storage.mark_failed(id, err.to_string()).await;
                        delivery.handle_delivery_failure(id, &err).await;
                    }
                }
            }

            tokio::time::sleep(grace_period).await;
            let _ = storage.remove(id).await;
        });

        self.tasks.lock().await.insert(id, handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScheduledStatus;
    use crate::storage::InMemoryScheduledMessageStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingDelivery {
        fired: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DeliveryHandler for RecordingDelivery {
        async fn deliver(&self, _id: Uuid, _destination: &str, _payload: serde_json::Value) -> Result<(), HeroError> {
            self.fired.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn fires_once_then_self_removes_after_grace_period() {
        let storage = Arc::new(InMemoryScheduledMessageStorage::new());
        let fired = Arc::new(AtomicBool::new(false));
        let scheduler = InMemoryScheduler::new(
            storage.clone(),
            Arc::new(RecordingDelivery { fired: fired.clone() }),
            Duration::from_millis(20),
        );

        let handle = scheduler
            .schedule("orders", "Reminder", serde_json::json!({}), When::After(Duration::from_millis(5)), 0)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(fired.load(Ordering::SeqCst));
        let entry = scheduler.get(handle.schedule_id).await.unwrap().unwrap();
        assert_eq!(entry.status, ScheduledStatus::Delivered);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(scheduler.get(handle.schedule_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_prevents_delivery() {
        let storage = Arc::new(InMemoryScheduledMessageStorage::new());
        let fired = Arc::new(AtomicBool::new(false));
        let scheduler = InMemoryScheduler::new(
            storage,
            Arc::new(RecordingDelivery { fired: fired.clone() }),
            Duration::from_millis(20),
        );

        let handle = scheduler
            .schedule("orders", "Reminder", serde_json::json!({}), When::After(Duration::from_millis(30)), 0)
            .await
            .unwrap();
        assert!(scheduler.cancel(handle.schedule_id).await.unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn rejects_deliver_at_far_in_the_past() {
        let storage = Arc::new(InMemoryScheduledMessageStorage::new());
        let scheduler = InMemoryScheduler::new(
            storage,
            Arc::new(RecordingDelivery { fired: Arc::new(AtomicBool::new(false)) }),
            Duration::from_millis(20),
        );

        let result = scheduler
            .schedule(
                "orders",
                "Reminder",
                serde_json::json!({}),
                When::At(Utc::now() - chrono::Duration::minutes(5)),
                0,
            )
            .await;
        assert!(result.is_err());
    }
}
