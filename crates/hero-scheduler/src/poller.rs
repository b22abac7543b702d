//! Storage-backed scheduler: a poller pushes due entries onto a bounded
//! channel, a deliverer drains it with bounded concurrency, and an
//! optional cleaner reaps old terminal entries. Mirrors
//! `DispatchScheduler`'s poll-loop-plus-AtomicBool-running lifecycle,
//! generalized from Mongo dispatch jobs to `deliver_at`/`priority`
//! scheduling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::delivery::DeliveryHandler;
use crate::model::{PendingQuery, ScheduledMessage};
use crate::storage::ScheduledMessageStorage;
use hero_common::HeroError;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StorageBackedSchedulerConfig {
    pub polling_interval: Duration,
    pub batch_size: u32,
    pub max_concurrency: usize,
    pub cleanup_interval: Option<Duration>,
    pub cleanup_age: Duration,
    pub shutdown_deadline: Duration,
}

impl Default for StorageBackedSchedulerConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(1),
            batch_size: 100,
            max_concurrency: 8,
            cleanup_interval: Some(Duration::from_secs(300)),
            cleanup_age: Duration::from_secs(86_400),
            shutdown_deadline: Duration::from_secs(10),
        }
    }
}

pub struct StorageBackedScheduler {
    storage: Arc<dyn ScheduledMessageStorage>,
    delivery: Arc<dyn DeliveryHandler>,
    config: StorageBackedSchedulerConfig,
    running: AtomicBool,
    cancellation: CancellationToken,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl StorageBackedScheduler {
    pub fn new(storage: Arc<dyn ScheduledMessageStorage>, delivery: Arc<dyn DeliveryHandler>, config: StorageBackedSchedulerConfig) -> Self {
        Self {
            storage,
            delivery,
            config,
            running: AtomicBool::new(false),
            cancellation: CancellationToken::new(),
            handles: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn schedule(&self, message: ScheduledMessage) -> Result<(), HeroError> {
        self.storage.schedule(message).await
    }

    pub async fn cancel(&self, id: Uuid) -> Result<bool, HeroError> {
        self.storage.cancel(id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ScheduledMessage>, HeroError> {
        self.storage.get(id).await
    }

    pub async fn pending(&self, query: PendingQuery) -> Result<Vec<ScheduledMessage>, HeroError> {
        self.storage.pending(query).await
    }

    pub async fn pending_count(&self) -> Result<u64, HeroError> {
        self.storage.pending_count().await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("scheduler already running");
            return;
        }

        let (tx, rx) = mpsc::channel(2 * self.config.batch_size as usize);

        let poller = self.clone();
        let poller_tx = tx;
        let poll_handle = tokio::spawn(async move { poller.run_poller(poller_tx).await });

        let deliverer = self.clone();
        let deliver_handle = tokio::spawn(async move { deliverer.run_deliverer(rx).await });

        let mut handles = vec![poll_handle, deliver_handle];
        if let Some(interval) = self.config.cleanup_interval {
            let cleaner = self.clone();
            handles.push(tokio::spawn(async move { cleaner.run_cleaner(interval).await }));
        }

        *self.handles.lock().await = handles;
        tracing::info!("storage-backed scheduler started");
    }

    pub async fn stop(&self) {
        self.cancellation.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if tokio::time::timeout(self.config.shutdown_deadline, handle).await.is_err() {
                tracing::warn!("scheduler worker did not stop within the shutdown deadline");
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run_poller(&self, tx: mpsc::Sender<ScheduledMessage>) {
        loop {
            if self.cancellation.is_cancelled() {
                break;
            }
            match self.storage.get_due(Utc::now(), self.config.batch_size).await {
                Ok(due) => {
                    for message in due {
                        if tx.send(message).await.is_err() {
                            return;
                        }
                    }
                }
                Err(err) => tracing::error!(%err, "error polling scheduled messages"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.polling_interval) => {}
                _ = self.cancellation.cancelled() => break,
            }
        }
    }

    async fn run_deliverer(&self, mut rx: mpsc::Receiver<ScheduledMessage>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut in_flight = Vec::new();
        while let Some(message) = rx.recv().await {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
            let storage = self.storage.clone();
            let delivery = self.delivery.clone();
            in_flight.push(tokio::spawn(async move {
                let _permit = permit;
                match delivery.deliver(message.id, &message.destination, message.payload.clone()).await {
                    Ok(()) => {
                        let _ = storage.mark_delivered(message.id).await;
                    }
                    Err(err) => {
                        let _ = storage.mark_failed(message.id, err.to_string()).await;
                        delivery.handle_delivery_failure(message.id, &err).await;
                    }
                }
            }));
            in_flight.retain(|h: &JoinHandle<()>| !h.is_finished());
        }
        for handle in in_flight {
            let _ = handle.await;
        }
    }

    async fn run_cleaner(&self, interval: Duration) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.cancellation.cancelled() => break,
            }
            match self.storage.cleanup(self.config.cleanup_age).await {
                Ok(removed) if removed > 0 => tracing::debug!(removed, "cleaned up old scheduled entries"),
                Ok(_) => {}
                Err(err) => tracing::error!(%err, "error cleaning up scheduled entries"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScheduledStatus;
    use crate::storage::InMemoryScheduledMessageStorage;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingDelivery {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl DeliveryHandler for CountingDelivery {
        async fn deliver(&self, _id: Uuid, _destination: &str, _payload: serde_json::Value) -> Result<(), HeroError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_delivers_due_messages_and_stop_is_clean() {
        let storage = Arc::new(InMemoryScheduledMessageStorage::new());
        let message = ScheduledMessage::new("orders", "Reminder", serde_json::json!({}), Utc::now(), 0);
        let id = message.id;
        storage.schedule(message).await.unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let mut config = StorageBackedSchedulerConfig::default();
        config.polling_interval = Duration::from_millis(5);
        let scheduler = Arc::new(StorageBackedScheduler::new(
            storage.clone(),
            Arc::new(CountingDelivery { calls: calls.clone() }),
            config,
        ));

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(storage.get(id).await.unwrap().unwrap().status, ScheduledStatus::Delivered);
        assert!(!scheduler.is_running());
    }
}
