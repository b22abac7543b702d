//! The outbox processor: claim-publish-ack loop plus lifecycle and metrics,
//! adapted from `fc-outbox`'s `OutboxProcessor::start`/`process_batch` shape
//! (minus leader election, which the workspace drops as out of scope for a
//! single-process runtime).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hero_common::{default_random, HeroError, ProcessingErrorInfo, RandomSource};
use hero_dlq::DeadLetterQueue;
use hero_resilience::RetryPolicy;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::OutboxEntry;
use crate::storage::OutboxStorage;

/// The transport-facing publish call the processor drives. A thin seam so
/// this crate doesn't need to depend on `hero-transport` directly.
#[async_trait]
pub trait OutboxPublisher: Send + Sync {
    async fn publish(&self, destination: &str, message_id: Uuid, payload: serde_json::Value) -> Result<(), HeroError>;
}

#[derive(Debug, Clone)]
pub struct OutboxProcessorConfig {
    pub batch_size: u32,
    pub polling_interval: Duration,
    pub polling_jitter: Duration,
    pub max_retries: u32,
    pub shutdown_deadline: Duration,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            polling_interval: Duration::from_secs(1),
            polling_jitter: Duration::from_millis(200),
            max_retries: 5,
            shutdown_deadline: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OutboxMetricsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub pending: u64,
    pub last_processed_time: Option<DateTime<Utc>>,
}

pub struct OutboxProcessor {
    storage: Arc<dyn OutboxStorage>,
    publisher: Arc<dyn OutboxPublisher>,
    retry: Arc<RetryPolicy>,
    dlq: Option<Arc<dyn DeadLetterQueue>>,
    random: Arc<dyn RandomSource>,
    config: OutboxProcessorConfig,
    processed: AtomicU64,
    failed: AtomicU64,
    last_processed_time: RwLock<Option<DateTime<Utc>>>,
    running: AtomicBool,
    cancellation: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OutboxProcessor {
    pub fn new(
        storage: Arc<dyn OutboxStorage>,
        publisher: Arc<dyn OutboxPublisher>,
        retry: Arc<RetryPolicy>,
        config: OutboxProcessorConfig,
    ) -> Self {
        Self {
            storage,
            publisher,
            retry,
            dlq: None,
            random: default_random(),
            config,
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_processed_time: RwLock::new(None),
            running: AtomicBool::new(false),
            cancellation: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn with_dlq(mut self, dlq: Arc<dyn DeadLetterQueue>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn metrics(&self) -> OutboxMetricsSnapshot {
        OutboxMetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            pending: self.storage.pending_count().await.unwrap_or(0),
            last_processed_time: *self.last_processed_time.read(),
        }
    }

    /// Spawns the claim/publish loop as a background task. `self` must be
    /// wrapped in an `Arc` so the task can outlive the caller's stack frame.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("outbox processor already running");
            return;
        }
        let this = self.clone();
        let join = tokio::spawn(async move { this.run().await });
        *self.handle.lock().await = Some(join);
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = %self.config.polling_interval.as_millis(),
            "outbox processor started"
        );
    }

    /// Cancels the loop cooperatively and waits (bounded by
    /// `shutdown_deadline`) for the in-flight batch to finish.
    pub async fn stop(&self) {
        self.cancellation.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(self.config.shutdown_deadline, handle).await.is_err() {
                tracing::warn!("outbox processor did not stop within the shutdown deadline");
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.cancellation.is_cancelled() {
                break;
            }
            if let Err(err) = self.poll_once().await {
                tracing::error!(%err, "error polling outbox");
            }
            let jitter_ms = (self.random.unit() * self.config.polling_jitter.as_millis() as f64) as u64;
            let sleep = self.config.polling_interval + Duration::from_millis(jitter_ms);
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = self.cancellation.cancelled() => break,
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    async fn poll_once(&self) -> Result<(), HeroError> {
        let due = self.storage.claim_due(self.config.batch_size, Utc::now()).await?;
        for entry in due {
            self.process_entry(entry).await?;
        }
        Ok(())
    }

    async fn process_entry(&self, entry: OutboxEntry) -> Result<(), HeroError> {
        match self
            .publisher
            .publish(&entry.destination, entry.message_id, entry.payload.clone())
            .await
        {
            Ok(()) => {
                self.storage.mark_processed(entry.id).await?;
                self.processed.fetch_add(1, Ordering::Relaxed);
                *self.last_processed_time.write() = Some(Utc::now());
            }
            Err(err) => {
                let next_retry_count = entry.retry_count + 1;
                if next_retry_count > self.config.max_retries {
                    self.storage.mark_failed(entry.id, err.to_string()).await?;
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    if let Some(dlq) = &self.dlq {
                        dlq.send(
                            entry.message_id,
                            entry.message_type.clone(),
                            "hero-outbox".to_string(),
                            err.to_string(),
                            ProcessingErrorInfo::new(err.kind(), err.to_string()),
                            entry.payload.clone(),
                        )
                        .await;
                    }
                } else {
                    let delay = self.retry.next_delay(next_retry_count);
                    let next_retry_at = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(1));
                    self.storage
                        .update_retry(entry.id, next_retry_count, next_retry_at)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryOutboxStorage;
    use hero_resilience::RetryConfig;
    use std::sync::atomic::AtomicU32;

    struct FailingThenSucceedingPublisher {
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl OutboxPublisher for FailingThenSucceedingPublisher {
        async fn publish(&self, _destination: &str, _message_id: Uuid, _payload: serde_json::Value) -> Result<(), HeroError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(HeroError::Transport("unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn retry_policy() -> Arc<RetryPolicy> {
        Arc::new(RetryPolicy::new(
            RetryConfig {
                max_retries: 5,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            default_random(),
        ))
    }

    #[tokio::test]
    async fn successful_publish_marks_processed_and_updates_metrics() {
        let storage = Arc::new(InMemoryOutboxStorage::new());
        storage
            .add(OutboxEntry::new("orders", "OrderCreated", serde_json::json!({})))
            .await
            .unwrap();
        let publisher = Arc::new(FailingThenSucceedingPublisher {
            calls: AtomicU32::new(0),
            fail_times: 0,
        });
        let processor = OutboxProcessor::new(storage.clone(), publisher, retry_policy(), OutboxProcessorConfig::default());

        processor.poll_once().await.unwrap();

        let metrics = processor.metrics().await;
        assert_eq!(metrics.processed, 1);
        assert_eq!(metrics.failed, 0);
        assert!(metrics.last_processed_time.is_some());
    }

    #[tokio::test]
    async fn publish_failure_within_retry_budget_reschedules() {
        let storage = Arc::new(InMemoryOutboxStorage::new());
        storage
            .add(OutboxEntry::new("orders", "OrderCreated", serde_json::json!({})))
            .await
            .unwrap();
        let publisher = Arc::new(FailingThenSucceedingPublisher {
            calls: AtomicU32::new(0),
            fail_times: 10,
        });
        let processor = OutboxProcessor::new(storage.clone(), publisher, retry_policy(), OutboxProcessorConfig::default());

        processor.poll_once().await.unwrap();

        let metrics = processor.metrics().await;
        assert_eq!(metrics.processed, 0);
        assert_eq!(metrics.failed, 0);
        assert_eq!(metrics.pending, 1);
    }

    #[tokio::test]
    async fn publish_failure_beyond_retry_budget_marks_failed() {
        let storage = Arc::new(InMemoryOutboxStorage::new());
        let entry = OutboxEntry::new("orders", "OrderCreated", serde_json::json!({}));
        let id = entry.id;
        storage.add(entry).await.unwrap();
        let publisher = Arc::new(FailingThenSucceedingPublisher {
            calls: AtomicU32::new(0),
            fail_times: 100,
        });
        let mut config = OutboxProcessorConfig::default();
        config.max_retries = 0;
        let processor = OutboxProcessor::new(storage.clone(), publisher, retry_policy(), config);

        processor.poll_once().await.unwrap();

        let metrics = processor.metrics().await;
        assert_eq!(metrics.failed, 1);
        let failed = storage.get_failed(10).await.unwrap();
        assert_eq!(failed[0].id, id);
    }

    #[tokio::test]
    async fn start_stop_lifecycle_toggles_is_running() {
        let storage = Arc::new(InMemoryOutboxStorage::new());
        let publisher = Arc::new(FailingThenSucceedingPublisher {
            calls: AtomicU32::new(0),
            fail_times: 0,
        });
        let mut config = OutboxProcessorConfig::default();
        config.polling_interval = Duration::from_millis(5);
        let processor = Arc::new(OutboxProcessor::new(storage, publisher, retry_policy(), config));

        processor.start().await;
        assert!(processor.is_running());
        processor.stop().await;
        assert!(!processor.is_running());
    }
}
