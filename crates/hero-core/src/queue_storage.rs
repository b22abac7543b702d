//! Named-queue storage: a durable-shaped CRUD surface distinct from
//! `hero-transport`'s destination/topic queues, which a transport
//! implementation may use as its backing store. Visibility-timeout
//! claim/ack/reject is modeled on `fc-queue/src/sqlite.rs`'s poll/ack/nack
//! dance.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hero_common::HeroError;
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub payload: serde_json::Value,
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

#[async_trait]
pub trait QueueStorage: Send + Sync {
    async fn create_queue(&self, name: &str) -> Result<(), HeroError>;

    async fn delete_queue(&self, name: &str) -> Result<(), HeroError>;

    async fn queue_exists(&self, name: &str) -> Result<bool, HeroError>;

    async fn get_queues(&self) -> Result<Vec<String>, HeroError>;

    async fn enqueue(&self, name: &str, payload: serde_json::Value) -> Result<Uuid, HeroError>;

    /// Claims the oldest visible message, hiding it from further `dequeue`
    /// calls for `visibility_timeout` until `acknowledge` or `reject`.
    async fn dequeue(&self, name: &str, visibility_timeout: Duration) -> Result<Option<QueuedMessage>, HeroError>;

    /// A non-claiming look at up to `count` messages, oldest first.
    async fn peek(&self, name: &str, count: usize) -> Result<Vec<QueuedMessage>, HeroError>;

    async fn acknowledge(&self, name: &str, id: Uuid) -> Result<bool, HeroError>;

    /// `requeue = true` makes the message immediately visible again;
    /// `false` removes it permanently (the caller is expected to have
    /// already routed it to a dead-letter queue if that's desired).
    async fn reject(&self, name: &str, id: Uuid, requeue: bool) -> Result<bool, HeroError>;

    async fn queue_depth(&self, name: &str) -> Result<u64, HeroError>;
}

struct Entry {
    message: QueuedMessage,
    visible_at: DateTime<Utc>,
}

pub struct InMemoryQueueStorage {
    queues: DashMap<String, Mutex<VecDeque<Entry>>>,
}

impl InMemoryQueueStorage {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }
}

impl Default for InMemoryQueueStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStorage for InMemoryQueueStorage {
    async fn create_queue(&self, name: &str) -> Result<(), HeroError> {
        self.queues.entry(name.to_string()).or_insert_with(|| Mutex::new(VecDeque::new()));
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), HeroError> {
        self.queues.remove(name);
        Ok(())
    }

    async fn queue_exists(&self, name: &str) -> Result<bool, HeroError> {
        Ok(self.queues.contains_key(name))
    }

    async fn get_queues(&self) -> Result<Vec<String>, HeroError> {
        Ok(self.queues.iter().map(|e| e.key().clone()).collect())
    }

    async fn enqueue(&self, name: &str, payload: serde_json::Value) -> Result<Uuid, HeroError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let entry = Entry {
            message: QueuedMessage {
                id,
                payload,
                receive_count: 0,
                enqueued_at: now,
            },
            visible_at: now,
        };
        let queue = self.queues.entry(name.to_string()).or_insert_with(|| Mutex::new(VecDeque::new()));
        queue.lock().push_back(entry);
        Ok(id)
    }

    async fn dequeue(&self, name: &str, visibility_timeout: Duration) -> Result<Option<QueuedMessage>, HeroError> {
        let Some(queue) = self.queues.get(name) else {
            return Ok(None);
        };
        let now = Utc::now();
        let mut queue = queue.lock();
        let claimed = queue
            .iter_mut()
            .filter(|e| e.visible_at <= now)
            .min_by_key(|e| e.message.enqueued_at)
            .map(|e| {
                e.message.receive_count += 1;
                e.visible_at = now
                    + chrono::Duration::from_std(visibility_timeout).unwrap_or_else(|_| chrono::Duration::zero());
                e.message.clone()
            });
        Ok(claimed)
    }

    async fn peek(&self, name: &str, count: usize) -> Result<Vec<QueuedMessage>, HeroError> {
        let Some(queue) = self.queues.get(name) else {
            return Ok(Vec::new());
        };
        let queue = queue.lock();
        let mut messages: Vec<QueuedMessage> = queue.iter().map(|e| e.message.clone()).collect();
        messages.sort_by_key(|m| m.enqueued_at);
        messages.truncate(count);
        Ok(messages)
    }

    async fn acknowledge(&self, name: &str, id: Uuid) -> Result<bool, HeroError> {
        let Some(queue) = self.queues.get(name) else {
            return Ok(false);
        };
        let mut queue = queue.lock();
        let before = queue.len();
        queue.retain(|e| e.message.id != id);
        Ok(queue.len() < before)
    }

    async fn reject(&self, name: &str, id: Uuid, requeue: bool) -> Result<bool, HeroError> {
        let Some(queue) = self.queues.get(name) else {
            return Ok(false);
        };
        let mut queue = queue.lock();
        if requeue {
            if let Some(entry) = queue.iter_mut().find(|e| e.message.id == id) {
                entry.visible_at = Utc::now();
                return Ok(true);
            }
            Ok(false)
        } else {
            let before = queue.len();
            queue.retain(|e| e.message.id != id);
            Ok(queue.len() < before)
        }
    }

    async fn queue_depth(&self, name: &str) -> Result<u64, HeroError> {
        Ok(self.queues.get(name).map(|q| q.lock().len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_dequeue_acknowledge_round_trip() {
        let storage = InMemoryQueueStorage::new();
        storage.create_queue("orders").await.unwrap();
        storage.enqueue("orders", serde_json::json!({"id": 1})).await.unwrap();

        let claimed = storage.dequeue("orders", Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(claimed.receive_count, 1);
        assert_eq!(storage.dequeue("orders", Duration::from_secs(30)).await.unwrap().map(|_| ()), None);

        assert!(storage.acknowledge("orders", claimed.id).await.unwrap());
        assert_eq!(storage.queue_depth("orders").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reject_with_requeue_makes_message_claimable_again() {
        let storage = InMemoryQueueStorage::new();
        storage.create_queue("orders").await.unwrap();
        storage.enqueue("orders", serde_json::json!({})).await.unwrap();

        let claimed = storage.dequeue("orders", Duration::from_secs(30)).await.unwrap().unwrap();
        assert!(storage.reject("orders", claimed.id, true).await.unwrap());

        let reclaimed = storage.dequeue("orders", Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(reclaimed.id, claimed.id);
        assert_eq!(reclaimed.receive_count, 2);
    }

    #[tokio::test]
    async fn reject_without_requeue_removes_the_message() {
        let storage = InMemoryQueueStorage::new();
        storage.create_queue("orders").await.unwrap();
        storage.enqueue("orders", serde_json::json!({})).await.unwrap();
        let claimed = storage.dequeue("orders", Duration::from_secs(30)).await.unwrap().unwrap();

        assert!(storage.reject("orders", claimed.id, false).await.unwrap());
        assert_eq!(storage.queue_depth("orders").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn peek_does_not_claim() {
        let storage = InMemoryQueueStorage::new();
        storage.create_queue("orders").await.unwrap();
        storage.enqueue("orders", serde_json::json!({})).await.unwrap();

        let peeked = storage.peek("orders", 10).await.unwrap();
        assert_eq!(peeked.len(), 1);
        assert!(storage.dequeue("orders", Duration::from_secs(30)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_queue_removes_it_from_get_queues() {
        let storage = InMemoryQueueStorage::new();
        storage.create_queue("orders").await.unwrap();
        storage.delete_queue("orders").await.unwrap();
        assert!(!storage.queue_exists("orders").await.unwrap());
        assert!(storage.get_queues().await.unwrap().is_empty());
    }
}
