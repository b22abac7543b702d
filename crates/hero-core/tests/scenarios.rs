//! End-to-end scenarios spanning dispatch, inbox, outbox, and scheduler,
//! composed the way application code wires them around `hero-core`'s
//! storages and resilience primitives.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hero_common::{
    default_random, CircuitState, ErrorKind, Envelope, HeroError, MessageKind, ProcessingContext,
    ProcessingErrorInfo, ProcessingResult,
};
use hero_dispatch::{Command, CommandDispatcher, CommandHandler, DispatchError};
use hero_dlq::{DeadLetterQueue, InMemoryDeadLetterQueue};
use hero_inbox::{InMemoryInboxStorage, InboxProcessor};
use hero_outbox::{InMemoryOutboxStorage, OutboxEntry, OutboxStorage};
use hero_pipeline::{Handler, Pipeline, PipelineConfig};
use hero_resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, HealthMonitor, RetryConfig, RetryPolicy};
use hero_scheduler::{DeliveryHandler, InMemoryScheduledMessageStorage, InMemoryScheduler, When};

fn pipeline<C: Command>(
    name: &str,
    max_retries: u32,
    breaker: Arc<CircuitBreakerRegistry>,
) -> Arc<Pipeline<C, C::Reply>> {
    Arc::new(Pipeline::new(
        PipelineConfig {
            operation_name: name.to_string(),
            timeout: Duration::from_secs(5),
            max_retries,
        },
        breaker,
        Arc::new(RetryPolicy::new(
            RetryConfig {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            default_random(),
        )),
        Arc::new(HealthMonitor::new(Default::default())),
    ))
}

// ---------------------------------------------------------------------
// Scenario 1: transient failures retry within budget, breaker stays closed
// ---------------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize)]
struct Ping;

impl Command for Ping {
    type Reply = ();
}

struct Forwarding(Arc<FlakyHandler>);

struct FlakyHandler {
    calls: AtomicU32,
    fail_times: u32,
}

#[async_trait]
impl CommandHandler<Ping> for Forwarding {
    async fn handle(&self, _command: Ping, _ctx: &ProcessingContext) -> Result<(), ProcessingErrorInfo> {
        let call = self.0.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.0.fail_times {
            Err(ProcessingErrorInfo::new(ErrorKind::Transient, "connection reset"))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn transient_failures_retry_then_succeed_leaving_the_breaker_closed() {
    let breaker = Arc::new(CircuitBreakerRegistry::default());
    let mut dispatcher = CommandDispatcher::new();
    let handler = Arc::new(FlakyHandler {
        calls: AtomicU32::new(0),
        fail_times: 2,
    });

    dispatcher
        .register(Forwarding(handler.clone()), pipeline::<Ping>("ping", 3, breaker.clone()))
        .unwrap();

    let result = dispatcher.dispatch(Ping, ProcessingContext::new("test", 3)).await.unwrap();
    assert!(matches!(result, ProcessingResult::Success { .. }));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    assert_eq!(breaker.state("ping"), Some(CircuitState::Closed));
}

// ---------------------------------------------------------------------
// Scenario 2: a permanently failing command lands exactly one DLQ entry
// ---------------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize)]
struct Reject;

impl Command for Reject {
    type Reply = ();
}

struct RejectingHandler;

#[async_trait]
impl CommandHandler<Reject> for RejectingHandler {
    async fn handle(&self, _command: Reject, _ctx: &ProcessingContext) -> Result<(), ProcessingErrorInfo> {
        Err(ProcessingErrorInfo::new(ErrorKind::Permanent, "bad state"))
    }
}

#[tokio::test]
async fn a_permanently_failing_command_lands_exactly_one_dlq_entry() {
    let breaker = Arc::new(CircuitBreakerRegistry::default());
    let dlq = Arc::new(InMemoryDeadLetterQueue::new());
    let pipeline = Arc::new(
        Pipeline::<Reject, ()>::new(
            PipelineConfig {
                operation_name: "reject".to_string(),
                timeout: Duration::from_secs(5),
                max_retries: 0,
            },
            breaker,
            Arc::new(RetryPolicy::new(RetryConfig::default(), default_random())),
            Arc::new(HealthMonitor::new(Default::default())),
        )
        .with_dlq(dlq.clone()),
    );

    let mut dispatcher = CommandDispatcher::new();
    dispatcher.register(RejectingHandler, pipeline).unwrap();

    let result = dispatcher.dispatch(Reject, ProcessingContext::new("test", 0)).await.unwrap();
    assert!(matches!(result, ProcessingResult::Failure { .. }));

    assert_eq!(dlq.count().await, 1);
    let stats = dlq.statistics().await;
    assert_eq!(stats.by_component.get("command-dispatch"), Some(&1));
}

// ---------------------------------------------------------------------
// Scenario 3: inbox deduplication — second delivery of the same message
// id is suppressed without invoking the handler again
// ---------------------------------------------------------------------

struct CountingHandler {
    calls: AtomicU32,
}

#[async_trait]
impl Handler<String, ()> for CountingHandler {
    async fn handle(&self, _envelope: &Envelope<String>, _ctx: &ProcessingContext) -> Result<(), ProcessingErrorInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn redelivering_the_same_message_id_is_deduplicated_by_the_inbox() {
    let storage = Arc::new(InMemoryInboxStorage::new());
    let handler = Arc::new(CountingHandler { calls: AtomicU32::new(0) });
    let pipeline = Arc::new(Pipeline::new(
        PipelineConfig {
            operation_name: "inbox".to_string(),
            timeout: Duration::from_secs(1),
            max_retries: 0,
        },
        Arc::new(CircuitBreakerRegistry::default()),
        Arc::new(RetryPolicy::new(RetryConfig::default(), default_random())),
        Arc::new(HealthMonitor::new(Default::default())),
    ));
    let processor = InboxProcessor::new(storage, pipeline, handler.clone(), None);

    let envelope = Envelope::new(MessageKind::Event, "order-created".to_string());
    let ctx = ProcessingContext::new("inbox", 0);

    let first = processor.process_incoming(envelope.clone(), ctx.clone()).await.unwrap();
    let second = processor.process_incoming(envelope, ctx).await.unwrap();

    assert!(first);
    assert!(!second);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    let metrics = processor.metrics();
    assert_eq!(metrics.processed, 1);
    assert_eq!(metrics.duplicates, 1);
}

// ---------------------------------------------------------------------
// Scenario 4: outbox crash recovery — an entry stuck `InProgress` after a
// simulated crash between claim and publish is recovered and delivered
// (at-least-once, so the publisher sees it twice).
// ---------------------------------------------------------------------

#[tokio::test]
async fn an_entry_stuck_in_progress_is_recovered_and_redelivered() {
    let storage = InMemoryOutboxStorage::new();
    let entry = OutboxEntry::new("orders.created", "OrderCreated", serde_json::json!({"id": 1}));
    let id = entry.id;
    storage.add(entry).await.unwrap();

    // First attempt claims the entry, simulating a crash before publish
    // completes — the entry is left `InProgress` with no `mark_processed`.
    let claimed = storage.claim_due(10, chrono::Utc::now()).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);

    tokio::time::sleep(Duration::from_millis(5)).await;

    let recovered = storage.recover_stuck(Duration::ZERO).await.unwrap();
    assert_eq!(recovered, 1);
    assert_eq!(storage.pending_count().await.unwrap(), 1);

    // A second pass now claims the recovered entry and completes it.
    let reclaimed = storage.claim_due(10, chrono::Utc::now()).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    storage.mark_processed(id).await.unwrap();
    assert_eq!(storage.pending_count().await.unwrap(), 0);
    assert_eq!(storage.get_failed(10).await.unwrap().len(), 0);
}

// ---------------------------------------------------------------------
// Scenario 5: scheduled-cancel race — cancelling before the timer fires
// suppresses delivery; cancelling after delivery has already landed fails.
// ---------------------------------------------------------------------

struct RecordingDelivery {
    fired: Arc<AtomicBool>,
}

#[async_trait]
impl DeliveryHandler for RecordingDelivery {
    async fn deliver(&self, _id: uuid::Uuid, _destination: &str, _payload: serde_json::Value) -> Result<(), HeroError> {
        self.fired.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn cancelling_before_the_timer_fires_suppresses_delivery() {
    let storage = Arc::new(InMemoryScheduledMessageStorage::new());
    let fired = Arc::new(AtomicBool::new(false));
    let delivery = Arc::new(RecordingDelivery { fired: fired.clone() });
    let scheduler = InMemoryScheduler::new(storage, delivery, Duration::from_millis(50));

    let handle = scheduler
        .schedule("orders", "Reminder", serde_json::json!({}), When::After(Duration::from_millis(50)), 0)
        .await
        .unwrap();

    let cancelled = scheduler.cancel(handle.schedule_id).await.unwrap();
    assert!(cancelled);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!fired.load(Ordering::SeqCst));
}

#[tokio::test]
async fn cancelling_after_delivery_has_already_landed_fails() {
    let storage = Arc::new(InMemoryScheduledMessageStorage::new());
    let fired = Arc::new(AtomicBool::new(false));
    let delivery = Arc::new(RecordingDelivery { fired: fired.clone() });
    let scheduler = InMemoryScheduler::new(storage, delivery, Duration::from_millis(20));

    let handle = scheduler
        .schedule("orders", "Reminder", serde_json::json!({}), When::After(Duration::from_millis(1)), 0)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(fired.load(Ordering::SeqCst));

    let cancelled = scheduler.cancel(handle.schedule_id).await.unwrap();
    assert!(!cancelled);
}

// ---------------------------------------------------------------------
// Scenario 6: circuit breaker opens on repeated failures and stops
// invoking the handler until it resets
// ---------------------------------------------------------------------

struct AlwaysFails;

#[async_trait]
impl CommandHandler<Reject> for AlwaysFails {
    async fn handle(&self, _command: Reject, _ctx: &ProcessingContext) -> Result<(), ProcessingErrorInfo> {
        Err(ProcessingErrorInfo::new(ErrorKind::Permanent, "down"))
    }
}

#[tokio::test]
async fn repeated_failures_open_the_circuit_and_short_circuit_further_dispatch() {
    let breaker = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: 2,
        ..CircuitBreakerConfig::default()
    }));
    let mut dispatcher = CommandDispatcher::new();
    dispatcher
        .register(AlwaysFails, pipeline::<Reject>("reject", 0, breaker.clone()))
        .unwrap();

    for _ in 0..2 {
        let result = dispatcher.dispatch(Reject, ProcessingContext::new("test", 0)).await.unwrap();
        assert!(matches!(result, ProcessingResult::Failure { .. }));
    }

    assert_eq!(breaker.state("reject"), Some(CircuitState::Open));

    let result = dispatcher.dispatch(Reject, ProcessingContext::new("test", 0)).await.unwrap();
    match result {
        ProcessingResult::Failure { error, .. } => assert_eq!(error.kind, ErrorKind::CircuitOpen),
        other => panic!("expected circuit-open failure, got {other:?}"),
    }
}

// ---------------------------------------------------------------------
// Scenario 7: a cancelled context propagates as an error instead of a
// normal failure result, and leaves health/breaker state untouched.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize)]
struct Shutdown;

impl Command for Shutdown {
    type Reply = ();
}

struct CancellationAwareHandler;

#[async_trait]
impl CommandHandler<Shutdown> for CancellationAwareHandler {
    async fn handle(&self, _command: Shutdown, ctx: &ProcessingContext) -> Result<(), ProcessingErrorInfo> {
        assert!(ctx.is_cancelled());
        Err(ProcessingErrorInfo::new(ErrorKind::Cancellation, "shutdown requested"))
    }
}

#[tokio::test]
async fn a_cancelled_context_propagates_as_an_error_and_leaves_health_and_breaker_untouched() {
    let breaker = Arc::new(CircuitBreakerRegistry::default());
    let health = Arc::new(HealthMonitor::new(Default::default()));
    let pipeline = Arc::new(Pipeline::<Shutdown, ()>::new(
        PipelineConfig {
            operation_name: "shutdown".to_string(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        },
        breaker.clone(),
        Arc::new(RetryPolicy::new(RetryConfig::default(), default_random())),
        health.clone(),
    ));

    let mut dispatcher = CommandDispatcher::new();
    dispatcher.register(CancellationAwareHandler, pipeline).unwrap();

    let ctx = ProcessingContext::new("test", 3);
    ctx.cancellation().cancel();

    let err = dispatcher.dispatch(Shutdown, ctx).await.unwrap_err();
    assert!(matches!(err, DispatchError::Escalated(_)));

    assert_eq!(breaker.state("shutdown"), Some(CircuitState::Closed));
    assert!(health.operation_health("shutdown").is_none());
}
