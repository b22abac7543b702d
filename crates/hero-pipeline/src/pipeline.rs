//! The per-item processing pipeline: instrumentation, validation,
//! deduplication, timeout, circuit breaker, retry, and error-handling/DLQ
//! routing wrapped around a terminal handler.
//!
//! `HttpMediator::mediate` (see `fc-router/src/mediator.rs`) runs these same
//! concerns as a sequential imperative function rather than a generic
//! middleware stack; this pipeline follows that shape, generalized from
//! HTTP mediation to an arbitrary typed handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hero_common::{
    ErrorKind, Envelope, ProcessingContext, ProcessingErrorInfo, ProcessingResult,
};
use hero_dlq::DeadLetterQueue;
use hero_resilience::{
    default_decision, CircuitBreakerRegistry, ErrorDecision, HealthMonitor, RetryPolicy,
    TransientClassifier,
};
use uuid::Uuid;

/// Rejects malformed messages with a terminal failure before anything else
/// runs.
pub trait Validator<T>: Send + Sync {
    fn validate(&self, payload: &T) -> std::result::Result<(), String>;
}

/// Consulted only in inbox-mode pipelines.
#[async_trait]
pub trait DedupCheck: Send + Sync {
    async fn is_duplicate(&self, message_id: Uuid) -> bool;
}

/// The user handler the pipeline ultimately dispatches to.
#[async_trait]
pub trait Handler<T, R>: Send + Sync {
    async fn handle(
        &self,
        envelope: &Envelope<T>,
        ctx: &ProcessingContext,
    ) -> std::result::Result<R, ProcessingErrorInfo>;
}

/// Returned when the error-handling stage decides to escalate (catastrophic
/// errors: OOM, stack overflow, access violation) — the pipeline rethrows to
/// the caller instead of swallowing the failure into a `ProcessingResult`.
#[derive(Debug, thiserror::Error)]
#[error("escalated: {0}")]
pub struct Escalated(pub ProcessingErrorInfo);

pub struct PipelineConfig {
    pub operation_name: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

pub struct Pipeline<T, R> {
    config: PipelineConfig,
    breaker: Arc<CircuitBreakerRegistry>,
    retry: Arc<RetryPolicy>,
    health: Arc<HealthMonitor>,
    dlq: Option<Arc<dyn DeadLetterQueue>>,
    validator: Option<Arc<dyn Validator<T>>>,
    dedup: Option<Arc<dyn DedupCheck>>,
    _marker: std::marker::PhantomData<fn() -> R>,
}

impl<T, R> Pipeline<T, R>
where
    T: Clone + Send + Sync + 'static + serde::Serialize,
    R: Send + 'static,
{
    pub fn new(
        config: PipelineConfig,
        breaker: Arc<CircuitBreakerRegistry>,
        retry: Arc<RetryPolicy>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            config,
            breaker,
            retry,
            health,
            dlq: None,
            validator: None,
            dedup: None,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_dlq(mut self, dlq: Arc<dyn DeadLetterQueue>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator<T>>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_dedup(mut self, dedup: Arc<dyn DedupCheck>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub async fn process(
        &self,
        envelope: Envelope<T>,
        ctx: ProcessingContext,
        handler: &dyn Handler<T, R>,
        component: &str,
    ) -> std::result::Result<ProcessingResult<R>, Escalated> {
        let span = tracing::info_span!(
            "pipeline.process",
            message_id = %envelope.message_id,
            component = %component,
            operation = %self.config.operation_name,
        );
        let _enter = span.enter();
        let start = std::time::Instant::now();

        if let Some(validator) = &self.validator {
            if let Err(reason) = validator.validate(&envelope.payload) {
                self.health
                    .record_failure(&self.config.operation_name, reason.clone(), start.elapsed());
                return Ok(ProcessingResult::failure(
                    envelope.message_id,
                    ProcessingErrorInfo::new(ErrorKind::Permanent, format!("invalid message: {reason}")),
                ));
            }
        }

        if let Some(dedup) = &self.dedup {
            if dedup.is_duplicate(envelope.message_id).await {
                return Ok(ProcessingResult::duplicate(envelope.message_id));
            }
        }

        let message_id = envelope.message_id;
        let payload_json = serde_json::to_value(&envelope.payload).unwrap_or(serde_json::Value::Null);

        let timed = tokio::time::timeout(
            self.config.timeout,
            self.run_guarded(envelope, ctx, handler),
        )
        .await;

        let outcome = match timed {
            Ok(inner) => inner,
            Err(_elapsed) => {
                self.breaker.record_failure(&self.config.operation_name);
                Err(ProcessingErrorInfo::new(ErrorKind::Transient, "operation timed out"))
            }
        };

        match outcome {
            Ok(payload) => {
                self.health.record_success(&self.config.operation_name, start.elapsed());
                Ok(ProcessingResult::success(message_id, Some(payload)))
            }
            Err(final_error) => {
                if final_error.kind != ErrorKind::Cancellation {
                    self.health.record_failure(
                        &self.config.operation_name,
                        final_error.message.clone(),
                        start.elapsed(),
                    );
                }
                self.route_failure(message_id, component, payload_json, final_error).await
            }
        }
    }

    /// Circuit breaker + retry + terminal handler invocation. Returns the
    /// last error seen once retries are exhausted or a non-transient error
    /// is hit.
    async fn run_guarded(
        &self,
        envelope: Envelope<T>,
        mut ctx: ProcessingContext,
        handler: &dyn Handler<T, R>,
    ) -> std::result::Result<R, ProcessingErrorInfo> {
        if !self.breaker.can_execute(&self.config.operation_name) {
            return Err(ProcessingErrorInfo::new(ErrorKind::CircuitOpen, "circuit open"));
        }

        let mut attempt = 0u32;
        loop {
            match handler.handle(&envelope, &ctx).await {
                Ok(value) => {
                    self.breaker.record_success(&self.config.operation_name);
                    return Ok(value);
                }
                Err(error) => {
                    let transient = TransientClassifier::is_transient(&error);
                    attempt += 1;
                    if transient && self.retry.budget_remaining(attempt - 1) {
                        ctx = ctx.with_failure_recorded(chrono::Utc::now());
                        let delay = self.retry.next_delay(attempt);
                        tracing::debug!(attempt, ?delay, "retrying after transient failure");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    if error.kind != ErrorKind::Cancellation {
                        self.breaker.record_failure(&self.config.operation_name);
                    }
                    return Err(error);
                }
            }
        }
    }

    async fn route_failure(
        &self,
        message_id: Uuid,
        component: &str,
        payload: serde_json::Value,
        error: ProcessingErrorInfo,
    ) -> std::result::Result<ProcessingResult<R>, Escalated> {
        let decision = default_decision(error.kind, &error.message, false, Duration::ZERO);
        match decision {
            ErrorDecision::Retry(_) => {
                // Only reachable if a future decision policy re-opens budget;
                // the default policy never returns Retry here since
                // retry_budget_remaining is always false at this point.
                Ok(ProcessingResult::failure(message_id, error))
            }
            ErrorDecision::SendToDeadLetter(reason) => {
                if let Some(dlq) = &self.dlq {
                    dlq.send(
                        message_id,
                        std::any::type_name::<T>().to_string(),
                        component.to_string(),
                        reason,
                        error.clone(),
                        payload,
                    )
                    .await;
                }
                Ok(ProcessingResult::failure(message_id, error))
            }
            ErrorDecision::Discard => {
                tracing::info!(%message_id, "discarding message per error policy");
                Ok(ProcessingResult::failure(message_id, error))
            }
            ErrorDecision::Escalate => Err(Escalated(error)),
        }
    }
}
