//! The top-level facade: one handle composing the outbox processor,
//! scheduler, dead-letter queue, and named-queue storage behind a single
//! `start`/`stop`, grounded on `fc-router/src/lifecycle.rs`'s
//! composition-of-subsystems shape (background tasks started together,
//! cancelled together, no inheritance required).

use std::sync::Arc;

use hero_dlq::{DeadLetterQueue, DeadLetterStatistics};
use hero_outbox::{OutboxProcessor, OutboxMetricsSnapshot, OutboxStorage};
use hero_resilience::{CircuitBreakerRegistry, HealthMonitor, HealthStatus, RetryPolicy};
use hero_scheduler::{ScheduledMessageStorage, StorageBackedScheduler};
use hero_transport::MessageTransport;

use crate::queue_storage::QueueStorage;

/// Everything a running instance exposes once the builder has wired it
/// together. Holds `Arc`s throughout so callers can clone out individual
/// subsystems (e.g. to hand a `Arc<dyn OutboxStorage>` to application code
/// that writes outbox entries inside its own transactions).
pub struct HeroMessaging {
    dlq: Arc<dyn DeadLetterQueue>,
    outbox_storage: Arc<dyn OutboxStorage>,
    scheduled_storage: Arc<dyn ScheduledMessageStorage>,
    queue_storage: Arc<dyn QueueStorage>,
    transport: Option<Arc<dyn MessageTransport>>,
    outbox: Option<Arc<OutboxProcessor>>,
    scheduler: Option<Arc<StorageBackedScheduler>>,
    breaker: Arc<CircuitBreakerRegistry>,
    retry: Arc<RetryPolicy>,
    health: Arc<HealthMonitor>,
}

impl HeroMessaging {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        dlq: Arc<dyn DeadLetterQueue>,
        outbox_storage: Arc<dyn OutboxStorage>,
        scheduled_storage: Arc<dyn ScheduledMessageStorage>,
        queue_storage: Arc<dyn QueueStorage>,
        transport: Option<Arc<dyn MessageTransport>>,
        outbox: Option<Arc<OutboxProcessor>>,
        scheduler: Option<Arc<StorageBackedScheduler>>,
        breaker: Arc<CircuitBreakerRegistry>,
        retry: Arc<RetryPolicy>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            dlq,
            outbox_storage,
            scheduled_storage,
            queue_storage,
            transport,
            outbox,
            scheduler,
            breaker,
            retry,
            health,
        }
    }

    pub fn dlq(&self) -> Arc<dyn DeadLetterQueue> {
        self.dlq.clone()
    }

    pub fn outbox_storage(&self) -> Arc<dyn OutboxStorage> {
        self.outbox_storage.clone()
    }

    pub fn scheduled_storage(&self) -> Arc<dyn ScheduledMessageStorage> {
        self.scheduled_storage.clone()
    }

    pub fn queue_storage(&self) -> Arc<dyn QueueStorage> {
        self.queue_storage.clone()
    }

    pub fn transport(&self) -> Option<Arc<dyn MessageTransport>> {
        self.transport.clone()
    }

    pub fn outbox(&self) -> Option<Arc<OutboxProcessor>> {
        self.outbox.clone()
    }

    pub fn scheduler(&self) -> Option<Arc<StorageBackedScheduler>> {
        self.scheduler.clone()
    }

    pub fn breaker(&self) -> Arc<CircuitBreakerRegistry> {
        self.breaker.clone()
    }

    pub fn retry(&self) -> Arc<RetryPolicy> {
        self.retry.clone()
    }

    pub fn health(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }

    pub async fn dlq_statistics(&self) -> DeadLetterStatistics {
        self.dlq.statistics().await
    }

    pub fn overall_health(&self) -> HealthStatus {
        self.health.overall_status()
    }

    pub async fn outbox_metrics(&self) -> Option<OutboxMetricsSnapshot> {
        match &self.outbox {
            Some(outbox) => Some(outbox.metrics().await),
            None => None,
        }
    }

    /// Starts every background subsystem the builder wired (outbox
    /// processor, scheduler). A transport-less instance has nothing to
    /// start and returns immediately.
    pub async fn start(&self) {
        if let Some(outbox) = &self.outbox {
            outbox.start().await;
        }
        if let Some(scheduler) = &self.scheduler {
            scheduler.start().await;
        }
        tracing::info!("hero-messaging started");
    }

    /// Cancels and awaits every background subsystem, bounded by each
    /// subsystem's own shutdown deadline.
    pub async fn stop(&self) {
        if let Some(outbox) = &self.outbox {
            outbox.stop().await;
        }
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop().await;
        }
        tracing::info!("hero-messaging stopped");
    }

    pub fn is_running(&self) -> bool {
        self.outbox.as_ref().map(|o| o.is_running()).unwrap_or(false)
            || self.scheduler.as_ref().map(|s| s.is_running()).unwrap_or(false)
    }
}
