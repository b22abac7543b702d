//! The composition root: validates and wires storages, a serializer, an
//! optional transport, and the resilience layer into a [`HeroMessaging`]
//! handle. `with_app_config` seeds the numeric options from a loaded
//! `hero_config::AppConfig`; storages and the transport still need their
//! own `with_*` calls.

use std::sync::Arc;
use std::time::Duration;

use hero_common::{default_random, RandomSource};
use hero_config::AppConfig;
use hero_dlq::{DeadLetterQueue, InMemoryDeadLetterQueue};
use hero_outbox::{OutboxProcessor, OutboxProcessorConfig, OutboxStorage};
use hero_resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, HealthMonitor, HealthMonitorConfig, RetryConfig, RetryPolicy,
};
use hero_scheduler::{ScheduledMessageStorage, StorageBackedScheduler, StorageBackedSchedulerConfig};
use hero_transport::{MessageTransport, TransportDeliveryHandler, TransportOutboxPublisher};

use crate::messaging::HeroMessaging;
use crate::queue_storage::QueueStorage;
use crate::registry::{PluginRegistry, RegistryError};

#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("plugin registration failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("missing required implementation: {0}")]
    MissingImplementation(&'static str),

    #[error("invalid option: {0}")]
    InvalidOption(String),
}

/// Mirrors `hero-outbox`/`hero-scheduler`'s own config structs but in
/// `Duration`/count form convenient for builder callers; translated into
/// each crate's native config at `build()` time.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub outbox_batch_size: u32,
    pub outbox_poll_interval: Duration,
    pub outbox_poll_jitter: Duration,
    pub outbox_max_retries: u32,
    pub outbox_shutdown_deadline: Duration,
    pub scheduler_batch_size: u32,
    pub scheduler_poll_interval: Duration,
    pub scheduler_max_concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            outbox_batch_size: 100,
            outbox_poll_interval: Duration::from_secs(1),
            outbox_poll_jitter: Duration::from_millis(200),
            outbox_max_retries: 5,
            outbox_shutdown_deadline: Duration::from_secs(10),
            scheduler_batch_size: 100,
            scheduler_poll_interval: Duration::from_secs(1),
            scheduler_max_concurrency: 8,
        }
    }
}

pub struct MessagingBuilder {
    registry: PluginRegistry<()>,
    dlq: Option<Arc<dyn DeadLetterQueue>>,
    outbox_storage: Option<Arc<dyn OutboxStorage>>,
    scheduled_storage: Option<Arc<dyn ScheduledMessageStorage>>,
    queue_storage: Option<Arc<dyn QueueStorage>>,
    transport: Option<Arc<dyn MessageTransport>>,
    batch: BatchOptions,
    retry_config: RetryConfig,
    breaker_config: CircuitBreakerConfig,
    health_config: HealthMonitorConfig,
    random: Arc<dyn RandomSource>,
}

impl MessagingBuilder {
    pub fn new() -> Self {
        Self {
            registry: PluginRegistry::new(),
            dlq: None,
            outbox_storage: None,
            scheduled_storage: None,
            queue_storage: None,
            transport: None,
            batch: BatchOptions::default(),
            retry_config: RetryConfig::default(),
            breaker_config: CircuitBreakerConfig::default(),
            health_config: HealthMonitorConfig::default(),
            random: default_random(),
        }
    }

    /// Registers `name` against the dependency graph so duplicate names
    /// and missing/cyclic dependencies are caught at `build()` time, then
    /// records `implementation` under the matching builder slot.
    pub fn with_dlq(mut self, name: impl Into<String>, dlq: Arc<dyn DeadLetterQueue>) -> Result<Self, BuilderError> {
        self.registry.register(name, (), vec![])?;
        self.dlq = Some(dlq);
        Ok(self)
    }

    pub fn with_outbox_storage(
        mut self,
        name: impl Into<String>,
        storage: Arc<dyn OutboxStorage>,
    ) -> Result<Self, BuilderError> {
        self.registry.register(name, (), vec![])?;
        self.outbox_storage = Some(storage);
        Ok(self)
    }

    pub fn with_scheduled_storage(
        mut self,
        name: impl Into<String>,
        storage: Arc<dyn ScheduledMessageStorage>,
    ) -> Result<Self, BuilderError> {
        self.registry.register(name, (), vec![])?;
        self.scheduled_storage = Some(storage);
        Ok(self)
    }

    pub fn with_queue_storage(
        mut self,
        name: impl Into<String>,
        storage: Arc<dyn QueueStorage>,
    ) -> Result<Self, BuilderError> {
        self.registry.register(name, (), vec![])?;
        self.queue_storage = Some(storage);
        Ok(self)
    }

    /// Transport is the one optional plugin: a builder with no transport
    /// still wires storages, DLQ, and the resilience layer, just without
    /// an outbox processor or scheduler delivery to drive.
    pub fn with_transport(
        mut self,
        name: impl Into<String>,
        transport: Arc<dyn MessageTransport>,
    ) -> Result<Self, BuilderError> {
        self.registry.register(name, (), vec![])?;
        self.transport = Some(transport);
        Ok(self)
    }

    pub fn with_batch_options(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn with_health_config(mut self, config: HealthMonitorConfig) -> Self {
        self.health_config = config;
        self
    }

    /// Seeds batch/retry/breaker/health options from a loaded [`AppConfig`],
    /// translating its millisecond/field-name conventions into each
    /// resilience crate's native config. Storages and transport still need
    /// their own `with_*` calls — this only carries the numeric knobs.
    pub fn with_app_config(mut self, config: &AppConfig) -> Self {
        self.batch = BatchOptions {
            outbox_batch_size: config.outbox.batch_size,
            outbox_poll_interval: Duration::from_millis(config.outbox.polling_interval_ms),
            outbox_poll_jitter: Duration::from_millis(config.outbox.polling_jitter_ms),
            outbox_max_retries: config.outbox.max_retries,
            outbox_shutdown_deadline: Duration::from_secs(config.outbox.shutdown_deadline_secs),
            scheduler_batch_size: config.scheduler.batch_size,
            scheduler_poll_interval: Duration::from_millis(config.scheduler.polling_interval_ms),
            scheduler_max_concurrency: config.scheduler.max_concurrency,
        };
        self.retry_config = RetryConfig {
            max_retries: config.resilience.retry.max_retries,
            base_delay: Duration::from_millis(config.resilience.retry.base_delay_ms),
            max_delay: Duration::from_millis(config.resilience.retry.max_delay_ms),
        };
        self.breaker_config = CircuitBreakerConfig {
            failure_threshold: config.resilience.breaker.failure_threshold,
            break_duration: Duration::from_millis(config.resilience.breaker.break_duration_ms),
        };
        self.health_config = HealthMonitorConfig {
            failure_rate_threshold: config.resilience.health.unhealthy_threshold,
            ..HealthMonitorConfig::default()
        };
        self
    }

    fn validate_options(&self) -> Result<(), BuilderError> {
        if self.batch.outbox_batch_size == 0 {
            return Err(BuilderError::InvalidOption("outbox_batch_size must be greater than zero".to_string()));
        }
        if self.batch.scheduler_batch_size == 0 {
            return Err(BuilderError::InvalidOption("scheduler_batch_size must be greater than zero".to_string()));
        }
        if self.breaker_config.failure_threshold == 0 {
            return Err(BuilderError::InvalidOption("breaker failure_threshold must be greater than zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.health_config.failure_rate_threshold) {
            return Err(BuilderError::InvalidOption("health failure_rate_threshold must be in [0, 1]".to_string()));
        }
        Ok(())
    }

    /// Validates non-empty plugin names (enforced per-call by `register`),
    /// resolves the dependency graph, checks internal option bounds, then
    /// wires everything into a [`HeroMessaging`] handle.
    pub fn build(mut self) -> Result<HeroMessaging, BuilderError> {
        self.registry.resolve()?;
        self.validate_options()?;

        let outbox_storage = self
            .outbox_storage
            .ok_or(BuilderError::MissingImplementation("outbox storage"))?;
        let scheduled_storage = self
            .scheduled_storage
            .ok_or(BuilderError::MissingImplementation("scheduled message storage"))?;
        let queue_storage = self
            .queue_storage
            .ok_or(BuilderError::MissingImplementation("queue storage"))?;

        let dlq = self.dlq.unwrap_or_else(|| Arc::new(InMemoryDeadLetterQueue::new()));
        let breaker = Arc::new(CircuitBreakerRegistry::new(self.breaker_config));
        let retry = Arc::new(RetryPolicy::new(self.retry_config, self.random.clone()));
        let health = Arc::new(HealthMonitor::new(self.health_config));

        let (outbox, scheduler) = match &self.transport {
            Some(transport) => {
                let publisher = Arc::new(TransportOutboxPublisher::new(transport.clone()));
                let outbox_config = OutboxProcessorConfig {
                    batch_size: self.batch.outbox_batch_size,
                    polling_interval: self.batch.outbox_poll_interval,
                    polling_jitter: self.batch.outbox_poll_jitter,
                    max_retries: self.batch.outbox_max_retries,
                    shutdown_deadline: self.batch.outbox_shutdown_deadline,
                };
                let outbox = Arc::new(
                    OutboxProcessor::new(outbox_storage.clone(), publisher, retry.clone(), outbox_config)
                        .with_dlq(dlq.clone()),
                );

                let delivery = Arc::new(TransportDeliveryHandler::new(transport.clone()));
                let scheduler_config = StorageBackedSchedulerConfig {
                    polling_interval: self.batch.scheduler_poll_interval,
                    batch_size: self.batch.scheduler_batch_size,
                    max_concurrency: self.batch.scheduler_max_concurrency,
                    ..StorageBackedSchedulerConfig::default()
                };
                let scheduler = Arc::new(StorageBackedScheduler::new(scheduled_storage.clone(), delivery, scheduler_config));

                (Some(outbox), Some(scheduler))
            }
            None => (None, None),
        };

        Ok(HeroMessaging::new(
            dlq,
            outbox_storage,
            scheduled_storage,
            queue_storage,
            self.transport,
            outbox,
            scheduler,
            breaker,
            retry,
            health,
        ))
    }
}

impl Default for MessagingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hero_outbox::InMemoryOutboxStorage;
    use hero_scheduler::InMemoryScheduledMessageStorage;
    use hero_transport::InMemoryTransport;

    use crate::queue_storage::InMemoryQueueStorage;

    #[test]
    fn build_without_transport_skips_outbox_and_scheduler() {
        let messaging = MessagingBuilder::new()
            .with_outbox_storage("outbox-storage", Arc::new(InMemoryOutboxStorage::new()))
            .unwrap()
            .with_scheduled_storage("scheduled-storage", Arc::new(InMemoryScheduledMessageStorage::new()))
            .unwrap()
            .with_queue_storage("queue-storage", Arc::new(InMemoryQueueStorage::new()))
            .unwrap()
            .build()
            .unwrap();

        assert!(messaging.outbox().is_none());
        assert!(messaging.scheduler().is_none());
    }

    #[test]
    fn build_with_transport_wires_outbox_and_scheduler() {
        let transport = InMemoryTransport::new("memory");
        let messaging = MessagingBuilder::new()
            .with_outbox_storage("outbox-storage", Arc::new(InMemoryOutboxStorage::new()))
            .unwrap()
            .with_scheduled_storage("scheduled-storage", Arc::new(InMemoryScheduledMessageStorage::new()))
            .unwrap()
            .with_queue_storage("queue-storage", Arc::new(InMemoryQueueStorage::new()))
            .unwrap()
            .with_transport("memory-transport", transport)
            .unwrap()
            .build()
            .unwrap();

        assert!(messaging.outbox().is_some());
        assert!(messaging.scheduler().is_some());
    }

    #[test]
    fn duplicate_plugin_name_is_rejected() {
        let result = MessagingBuilder::new()
            .with_outbox_storage("same-name", Arc::new(InMemoryOutboxStorage::new()))
            .unwrap()
            .with_scheduled_storage("same-name", Arc::new(InMemoryScheduledMessageStorage::new()));
        assert!(result.is_err());
    }

    #[test]
    fn missing_required_storage_fails_build() {
        let result = MessagingBuilder::new()
            .with_outbox_storage("outbox-storage", Arc::new(InMemoryOutboxStorage::new()))
            .unwrap()
            .build();
        assert!(matches!(result, Err(BuilderError::MissingImplementation(_))));
    }

    #[test]
    fn with_app_config_seeds_batch_and_resilience_options_from_config() {
        let mut config = hero_config::AppConfig::default();
        config.outbox.batch_size = 42;
        config.resilience.breaker.failure_threshold = 7;
        config.resilience.health.unhealthy_threshold = 0.9;

        let messaging = MessagingBuilder::new()
            .with_app_config(&config)
            .with_outbox_storage("outbox-storage", Arc::new(InMemoryOutboxStorage::new()))
            .unwrap()
            .with_scheduled_storage("scheduled-storage", Arc::new(InMemoryScheduledMessageStorage::new()))
            .unwrap()
            .with_queue_storage("queue-storage", Arc::new(InMemoryQueueStorage::new()))
            .unwrap()
            .build()
            .unwrap();

        let breaker = messaging.breaker();
        for _ in 0..6 {
            breaker.record_failure("probe");
        }
        assert_eq!(breaker.state("probe"), Some(hero_common::CircuitState::Closed));
        breaker.record_failure("probe");
        assert_eq!(breaker.state("probe"), Some(hero_common::CircuitState::Open));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = MessagingBuilder::new()
            .with_outbox_storage("outbox-storage", Arc::new(InMemoryOutboxStorage::new()))
            .unwrap()
            .with_scheduled_storage("scheduled-storage", Arc::new(InMemoryScheduledMessageStorage::new()))
            .unwrap()
            .with_queue_storage("queue-storage", Arc::new(InMemoryQueueStorage::new()))
            .unwrap()
            .with_batch_options(BatchOptions {
                outbox_batch_size: 0,
                ..BatchOptions::default()
            })
            .build();
        assert!(matches!(result, Err(BuilderError::InvalidOption(_))));
    }
}
