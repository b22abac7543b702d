//! In-process mock transport: destinations are visibility-timeout queues
//! modeled on `SqliteQueue`'s poll/ack/nack dance (minus the SQL), topics
//! are broadcast channels. Used for development and as the fixture every
//! integration test in this workspace runs against.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hero_common::{Envelope, HeroError};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::transport::{
    ConsumeOptions, Consumer, ConsumerHandler, ConsumerMetrics, MessageContext, MessageTransport,
    TransportHealth,
};

struct QueuedEntry {
    id: Uuid,
    envelope: Envelope<Value>,
    visible_at: DateTime<Utc>,
    receive_count: u32,
}

#[derive(Default)]
struct MetricsInner {
    received: AtomicU64,
    acknowledged: AtomicU64,
    rejected: AtomicU64,
    deferred: AtomicU64,
    dead_lettered: AtomicU64,
}

impl MetricsInner {
    fn snapshot(&self) -> ConsumerMetrics {
        ConsumerMetrics {
            received: self.received.load(Ordering::SeqCst),
            acknowledged: self.acknowledged.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
            deferred: self.deferred.load(Ordering::SeqCst),
            dead_lettered: self.dead_lettered.load(Ordering::SeqCst),
        }
    }
}

pub struct InMemoryTransport {
    name: String,
    destinations: DashMap<String, Arc<Mutex<VecDeque<QueuedEntry>>>>,
    topics: DashMap<String, broadcast::Sender<Envelope<Value>>>,
    healthy: AtomicBool,
}

impl InMemoryTransport {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            destinations: DashMap::new(),
            topics: DashMap::new(),
            healthy: AtomicBool::new(true),
        })
    }

    /// Test/ops hook to simulate a broker outage.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn queue_for(&self, destination: &str) -> Arc<Mutex<VecDeque<QueuedEntry>>> {
        self.destinations.entry(destination.to_string()).or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))).clone()
    }

    fn topic_sender(&self, topic: &str) -> broadcast::Sender<Envelope<Value>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }
}

#[async_trait]
impl MessageTransport for InMemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, envelope: Envelope<Value>, destination: &str) -> Result<(), HeroError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(HeroError::Transport(format!("transport '{}' is unhealthy", self.name)));
        }
        let queue = self.queue_for(destination);
        queue.lock().push_back(QueuedEntry { id: Uuid::new_v4(), envelope, visible_at: Utc::now(), receive_count: 0 });
        Ok(())
    }

    async fn publish(&self, envelope: Envelope<Value>, topic: &str) -> Result<(), HeroError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(HeroError::Transport(format!("transport '{}' is unhealthy", self.name)));
        }
        let sender = self.topic_sender(topic);
        // No subscribers is not an error: a broker-backed topic can have zero listeners too.
        let _ = sender.send(envelope);
        Ok(())
    }

    async fn consume(
        &self,
        source: &str,
        handler: Arc<dyn ConsumerHandler>,
        options: ConsumeOptions,
    ) -> Result<Arc<dyn Consumer>, HeroError> {
        let metrics = Arc::new(MetricsInner::default());
        let running = Arc::new(AtomicBool::new(false));

        if let Some(sender) = self.topics.get(source).map(|s| s.clone()) {
            let consumer = BroadcastConsumer {
                receiver_factory: sender,
                handler,
                metrics,
                running,
                task: Mutex::new(None),
            };
            return Ok(Arc::new(consumer));
        }

        let queue = self.queue_for(source);
        let consumer = QueueConsumer {
            queue,
            handler,
            options,
            metrics,
            running,
            task: Mutex::new(None),
        };
        Ok(Arc::new(consumer))
    }

    async fn get_health(&self) -> TransportHealth {
        let healthy = self.healthy.load(Ordering::SeqCst);
        TransportHealth { healthy, detail: (!healthy).then(|| format!("transport '{}' marked unhealthy", self.name)) }
    }
}

struct QueueContext {
    queue: Arc<Mutex<VecDeque<QueuedEntry>>>,
    entry_id: Uuid,
    metrics: Arc<MetricsInner>,
}

#[async_trait]
impl MessageContext for QueueContext {
    async fn acknowledge(&self) -> Result<(), HeroError> {
        self.queue.lock().retain(|e| e.id != self.entry_id);
        self.metrics.acknowledged.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), HeroError> {
        self.metrics.rejected.fetch_add(1, Ordering::SeqCst);
        if requeue {
            let mut queue = self.queue.lock();
            if let Some(entry) = queue.iter_mut().find(|e| e.id == self.entry_id) {
                entry.visible_at = Utc::now();
            }
        } else {
            self.queue.lock().retain(|e| e.id != self.entry_id);
        }
        Ok(())
    }

    async fn defer(&self, delay: Duration) -> Result<(), HeroError> {
        self.metrics.deferred.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.queue.lock();
        if let Some(entry) = queue.iter_mut().find(|e| e.id == self.entry_id) {
            entry.visible_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        }
        Ok(())
    }

    async fn dead_letter(&self, reason: String) -> Result<(), HeroError> {
        tracing::warn!(entry_id = %self.entry_id, reason, "message dead-lettered by consumer");
        self.queue.lock().retain(|e| e.id != self.entry_id);
        self.metrics.dead_lettered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Polling consumer for a point-to-point destination: claims one visible
/// entry at a time, bounded by `max_in_flight` concurrent handler calls.
struct QueueConsumer {
    queue: Arc<Mutex<VecDeque<QueuedEntry>>>,
    handler: Arc<dyn ConsumerHandler>,
    options: ConsumeOptions,
    metrics: Arc<MetricsInner>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Consumer for QueueConsumer {
    async fn start(&self) -> Result<(), HeroError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let queue = self.queue.clone();
        let handler = self.handler.clone();
        let metrics = self.metrics.clone();
        let running = self.running.clone();
        let semaphore = Arc::new(Semaphore::new(self.options.max_in_flight.max(1) as usize));
        let visibility_timeout = self.options.visibility_timeout;

        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let claimed = {
                    let mut q = queue.lock();
                    let now = Utc::now();
                    let position = q.iter().position(|e| e.visible_at <= now);
                    position.and_then(|idx| {
                        let entry = q.get_mut(idx)?;
                        entry.visible_at = now + chrono::Duration::from_std(visibility_timeout).unwrap_or_else(|_| chrono::Duration::zero());
                        entry.receive_count += 1;
                        Some((entry.id, entry.envelope.clone()))
                    })
                };

                let Some((id, envelope)) = claimed else {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    continue;
                };

                metrics.received.fetch_add(1, Ordering::SeqCst);
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                let handler = handler.clone();
                let ctx: Arc<dyn MessageContext> =
                    Arc::new(QueueContext { queue: queue.clone(), entry_id: id, metrics: metrics.clone() });
                tokio::spawn(async move {
                    let _permit = permit;
                    handler.handle(envelope, ctx).await;
                });
            }
        });
        *self.task.lock() = Some(task);
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn get_metrics(&self) -> ConsumerMetrics {
        self.metrics.snapshot()
    }
}

struct BroadcastContext;

#[async_trait]
impl MessageContext for BroadcastContext {
    async fn acknowledge(&self) -> Result<(), HeroError> {
        Ok(())
    }

    async fn reject(&self, _requeue: bool) -> Result<(), HeroError> {
        tracing::debug!("reject is a no-op for broadcast topic delivery");
        Ok(())
    }

    async fn defer(&self, _delay: Duration) -> Result<(), HeroError> {
        tracing::debug!("defer is a no-op for broadcast topic delivery");
        Ok(())
    }

    async fn dead_letter(&self, reason: String) -> Result<(), HeroError> {
        tracing::warn!(reason, "dead_letter is a no-op for broadcast topic delivery");
        Ok(())
    }
}

/// Fan-out consumer for a topic: every subscriber gets every publish.
struct BroadcastConsumer {
    receiver_factory: broadcast::Sender<Envelope<Value>>,
    handler: Arc<dyn ConsumerHandler>,
    metrics: Arc<MetricsInner>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Consumer for BroadcastConsumer {
    async fn start(&self) -> Result<(), HeroError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut receiver = self.receiver_factory.subscribe();
        let handler = self.handler.clone();
        let metrics = self.metrics.clone();
        let running = self.running.clone();

        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                match receiver.recv().await {
                    Ok(envelope) => {
                        metrics.received.fetch_add(1, Ordering::SeqCst);
                        let ctx: Arc<dyn MessageContext> = Arc::new(BroadcastContext);
                        handler.handle(envelope, ctx).await;
                        metrics.acknowledged.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "broadcast consumer lagged and dropped publishes");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.task.lock() = Some(task);
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn get_metrics(&self) -> ConsumerMetrics {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hero_common::MessageKind;
    use tokio::sync::mpsc;

    struct RecordingHandler {
        tx: mpsc::UnboundedSender<Envelope<Value>>,
    }

    #[async_trait]
    impl ConsumerHandler for RecordingHandler {
        async fn handle(&self, envelope: Envelope<Value>, ctx: Arc<dyn MessageContext>) {
            let _ = self.tx.send(envelope);
            ctx.acknowledge().await.unwrap();
        }
    }

    #[tokio::test]
    async fn send_then_consume_delivers_and_acknowledges() {
        let transport = InMemoryTransport::new("mock");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = transport
            .consume("orders", Arc::new(RecordingHandler { tx }), ConsumeOptions::default())
            .await
            .unwrap();
        consumer.start().await.unwrap();

        let envelope = Envelope::new(MessageKind::Command, serde_json::json!({"id": 1}));
        transport.send(envelope.clone(), "orders").await.unwrap();

        let received = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await.unwrap().unwrap();
        assert_eq!(received.message_id, envelope.message_id);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(consumer.get_metrics().acknowledged, 1);
        consumer.stop().await;
    }

    #[tokio::test]
    async fn publish_fans_out_to_topic_subscribers() {
        let transport = InMemoryTransport::new("mock");
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = transport.consume("events", Arc::new(RecordingHandler { tx: tx1 }), ConsumeOptions::default()).await.unwrap();
        let c2 = transport.consume("events", Arc::new(RecordingHandler { tx: tx2 }), ConsumeOptions::default()).await.unwrap();
        c1.start().await.unwrap();
        c2.start().await.unwrap();

        transport.publish(Envelope::new(MessageKind::Event, serde_json::json!({})), "events").await.unwrap();

        tokio::time::timeout(Duration::from_millis(500), rx1.recv()).await.unwrap().unwrap();
        tokio::time::timeout(Duration::from_millis(500), rx2.recv()).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn send_on_unhealthy_transport_errors() {
        let transport = InMemoryTransport::new("mock");
        transport.set_healthy(false);
        let result = transport.send(Envelope::new(MessageKind::Command, serde_json::json!({})), "orders").await;
        assert!(result.is_err());
    }
}
