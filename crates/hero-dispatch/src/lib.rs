//! Routes commands, queries, and events to their registered handlers
//! through the resilience pipeline; also hosts the scheduled-message
//! delivery hook used by the scheduler to figure out how a due message
//! should be handled.

mod command;
mod event;
mod query;

pub use command::{Command, CommandDispatcher, CommandHandler, DispatchError};
pub use event::{Event, EventDispatchConfig, EventDispatchMode, EventDispatcher, EventHandler};
pub use query::{Query, QueryCache, QueryCacheConfig, QueryDispatcher, QueryHandler};

use async_trait::async_trait;
use hero_common::ProcessingContext;
use serde_json::Value;

/// Bundles the three dispatch surfaces behind one handle, the way a
/// caller typically wires them up once at startup.
#[derive(Default)]
pub struct Dispatcher {
    pub commands: CommandDispatcher,
    pub queries: QueryDispatcher,
    pub events: EventDispatcher,
}

impl Dispatcher {
    pub fn new(query_cache_config: QueryCacheConfig, event_config: EventDispatchConfig) -> Self {
        Self {
            commands: CommandDispatcher::new(),
            queries: QueryDispatcher::new(query_cache_config),
            events: EventDispatcher::new(event_config),
        }
    }
}

/// Destination for an enqueue-only scheduled delivery. Implemented by
/// `hero-transport`'s `QueueStorage` adapter; kept as a narrow trait here so
/// `hero-dispatch` doesn't need to depend on the transport crate.
#[async_trait]
pub trait Enqueuer: Send + Sync {
    async fn enqueue(&self, queue: &str, payload: Value) -> Result<(), DispatchError>;
}

/// What the scheduler should do with a message once it comes due, decided
/// once at schedule time so the delivery hook doesn't need to re-inspect
/// the message's type on every attempt.
pub enum DeliveryRoute {
    /// Route through command dispatch; handler errors surface through the
    /// normal command `ProcessingResult`, not as a delivery failure, unless
    /// the dispatch call itself errors (`NoHandler`, escalation, ...).
    Command,
    /// Queries have no reply channel once scheduled; rejected at schedule
    /// time rather than at delivery time.
    Query,
    /// Publish to all registered event handlers.
    Event,
    /// Bypass dispatch entirely and enqueue to a named queue.
    Queue(String),
}

/// One boxed, ready-to-run delivery: the scheduler holds these and calls
/// `deliver` when a message comes due.
#[async_trait]
pub trait ScheduledDelivery: Send + Sync {
    async fn deliver(&self, ctx: ProcessingContext) -> Result<(), DispatchError>;
}

pub struct QueueDelivery {
    pub queue: String,
    pub payload: Value,
    pub enqueuer: std::sync::Arc<dyn Enqueuer>,
}

#[async_trait]
impl ScheduledDelivery for QueueDelivery {
    async fn deliver(&self, _ctx: ProcessingContext) -> Result<(), DispatchError> {
        self.enqueuer.enqueue(&self.queue, self.payload.clone()).await
    }
}

pub struct CommandDelivery<C: Command> {
    pub command: C,
    pub dispatcher: std::sync::Arc<CommandDispatcher>,
}

#[async_trait]
impl<C: Command> ScheduledDelivery for CommandDelivery<C> {
    async fn deliver(&self, ctx: ProcessingContext) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(self.command.clone(), ctx).await?;
        Ok(())
    }
}

pub struct EventDelivery<E: Event> {
    pub event: E,
    pub dispatcher: std::sync::Arc<EventDispatcher>,
}

#[async_trait]
impl<E: Event> ScheduledDelivery for EventDelivery<E> {
    async fn deliver(&self, ctx: ProcessingContext) -> Result<(), DispatchError> {
        let results = self.dispatcher.dispatch(self.event.clone(), ctx).await;
        if results.iter().any(|r| r.is_failure()) {
            tracing::warn!("one or more event handlers failed during scheduled delivery");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hero_common::ProcessingErrorInfo;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Clone, serde::Serialize)]
    struct Ping;

    impl Event for Ping {}

    struct RecordingHandler(Arc<AtomicBool>);

    #[async_trait]
    impl EventHandler<Ping> for RecordingHandler {
        async fn handle(&self, _event: Ping, _ctx: &ProcessingContext) -> Result<(), ProcessingErrorInfo> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn event_delivery_invokes_registered_handlers() {
        let called = Arc::new(AtomicBool::new(false));
        let dispatcher = Arc::new(EventDispatcher::new(EventDispatchConfig::default()));
        dispatcher.register(
            RecordingHandler(called.clone()),
            Arc::new(hero_pipeline::Pipeline::new(
                hero_pipeline::PipelineConfig {
                    operation_name: "ping".to_string(),
                    timeout: std::time::Duration::from_secs(5),
                    max_retries: 0,
                },
                Arc::new(hero_resilience::CircuitBreakerRegistry::default()),
                Arc::new(hero_resilience::RetryPolicy::new(
                    hero_resilience::RetryConfig::default(),
                    hero_common::default_random(),
                )),
                Arc::new(hero_resilience::HealthMonitor::new(Default::default())),
            )),
        );

        let delivery = EventDelivery {
            event: Ping,
            dispatcher,
        };
        delivery.deliver(ProcessingContext::new("test", 0)).await.unwrap();
        assert!(called.load(Ordering::SeqCst));
    }
}
