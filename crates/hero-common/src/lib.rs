//! Core message model shared by every HeroMessaging crate: envelopes,
//! processing context, processing results, and the clock/random
//! abstractions the rest of the workspace is built against.

pub mod logging;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ============================================================================
// Envelope
// ============================================================================

/// The three message shapes the dispatcher routes.
///
/// Commands have at most one handler and an optional reply; queries have
/// exactly one handler and a mandatory reply; events fan out to zero or
/// more handlers and never reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Command,
    Query,
    Event,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Command => write!(f, "command"),
            MessageKind::Query => write!(f, "query"),
            MessageKind::Event => write!(f, "event"),
        }
    }
}

/// The transport-facing container for a typed payload.
///
/// `T` is the concrete command/query/event type; dispatch resolves handlers
/// by `T`'s `TypeId` (see `hero-dispatch`). The envelope itself is
/// payload-agnostic so pipelines, the outbox, and the scheduler can move it
/// around without knowing `T`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub kind: MessageKind,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(kind: MessageKind, payload: T) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            correlation_id: None,
            causation_id: None,
            metadata: HashMap::new(),
            kind,
            payload,
        }
    }

    pub fn command(payload: T) -> Self {
        Self::new(MessageKind::Command, payload)
    }

    pub fn query(payload: T) -> Self {
        Self::new(MessageKind::Query, payload)
    }

    pub fn event(payload: T) -> Self {
        Self::new(MessageKind::Event, payload)
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            message_id: self.message_id,
            timestamp: self.timestamp,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            metadata: self.metadata,
            kind: self.kind,
            payload: f(self.payload),
        }
    }
}

// ============================================================================
// Processing context
// ============================================================================

/// Request-scoped state threaded through the pipeline. Mutations go through
/// the `with_*` builders so a stage can hand a derived context downstream
/// without aliasing the caller's copy.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub component: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub first_failure_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, serde_json::Value>,
    cancellation: CancellationToken,
}

impl ProcessingContext {
    pub fn new(component: impl Into<String>, max_retries: u32) -> Self {
        Self {
            component: component.into(),
            retry_count: 0,
            max_retries,
            first_failure_at: None,
            last_failure_at: None,
            metadata: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Returns a context advanced by one retry, recording failure times.
    pub fn with_failure_recorded(&self, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.retry_count += 1;
        if next.first_failure_at.is_none() {
            next.first_failure_at = Some(at);
        }
        next.last_failure_at = Some(at);
        next
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Processing result
// ============================================================================

/// Outcome of running one message through a pipeline.
#[derive(Debug, Clone)]
pub enum ProcessingResult<T> {
    Success {
        payload: Option<T>,
        message_id: Uuid,
        /// Set by the deduplication stage when an inbox short-circuit fired.
        duplicate: bool,
    },
    Failure {
        error: ProcessingErrorInfo,
        message_id: Uuid,
    },
}

impl<T> ProcessingResult<T> {
    pub fn success(message_id: Uuid, payload: Option<T>) -> Self {
        ProcessingResult::Success {
            payload,
            message_id,
            duplicate: false,
        }
    }

    pub fn duplicate(message_id: Uuid) -> Self {
        ProcessingResult::Success {
            payload: None,
            message_id,
            duplicate: true,
        }
    }

    pub fn failure(message_id: Uuid, error: ProcessingErrorInfo) -> Self {
        ProcessingResult::Failure { error, message_id }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessingResult::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ProcessingResult::Failure { .. })
    }

    pub fn message_id(&self) -> Uuid {
        match self {
            ProcessingResult::Success { message_id, .. } => *message_id,
            ProcessingResult::Failure { message_id, .. } => *message_id,
        }
    }
}

/// Lightweight, serializable description of a pipeline failure — enough to
/// record in the DLQ or in metrics without carrying a live error trait
/// object around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub inner: Option<Box<ProcessingErrorInfo>>,
}

impl ProcessingErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            inner: None,
        }
    }

    pub fn with_inner(mut self, inner: ProcessingErrorInfo) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    /// Walks the `inner` chain looking for a transient cause.
    pub fn has_transient_cause(&self) -> bool {
        self.kind == ErrorKind::Transient
            || self.inner.as_ref().is_some_and(|i| i.has_transient_cause())
    }
}

impl fmt::Display for ProcessingErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// The error taxonomy driving retry/escalate/discard/dead-letter routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Duplicate,
    CircuitOpen,
    Catastrophic,
    Cancellation,
}

// ============================================================================
// Batch result
// ============================================================================

/// Aggregates N per-item results in original submission order.
#[derive(Debug, Clone)]
pub struct BatchResult<T> {
    results: Vec<ProcessingResult<T>>,
}

impl<T> BatchResult<T> {
    pub fn new(results: Vec<ProcessingResult<T>>) -> Self {
        Self { results }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn successes(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.is_failure()).count()
    }

    pub fn get(&self, index: usize) -> Option<&ProcessingResult<T>> {
        self.results.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessingResult<T>> {
        self.results.iter()
    }

    pub fn into_inner(self) -> Vec<ProcessingResult<T>> {
        self.results
    }

    /// Vacuous truth: an empty batch is both all-succeeded and all-failed.
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.is_success())
    }

    pub fn any_succeeded(&self) -> bool {
        self.results.iter().any(|r| r.is_success())
    }

    pub fn all_failed(&self) -> bool {
        self.results.iter().all(|r| r.is_failure())
    }
}

impl<T> std::ops::Index<usize> for BatchResult<T> {
    type Output = ProcessingResult<T>;
    fn index(&self, index: usize) -> &Self::Output {
        &self.results[index]
    }
}

// ============================================================================
// Circuit breaker / saga shared state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed
    }
}

/// Minimal correlated-state coordination with optimistic concurrency, per
/// Minimal saga bookkeeping: current state plus an optimistic version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaState<S> {
    pub correlation_id: String,
    pub current_state: S,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("concurrency conflict: expected version {expected}, actual {actual}")]
pub struct ConcurrencyError {
    pub expected: u64,
    pub actual: u64,
}

// ============================================================================
// Clock / random injection (Design Notes: no process-wide statics)
// ============================================================================

/// Injected time source so tests can advance virtual time instead of
/// sleeping on the wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Injected jitter source for retry backoff, so tests are deterministic.
pub trait RandomSource: Send + Sync {
    /// A value in `[0, 1)`.
    fn unit(&self) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRng;

impl RandomSource for ThreadRng {
    fn unit(&self) -> f64 {
        use rand::Rng;
        rand::thread_rng().r#gen::<f64>()
    }
}

pub fn default_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

pub fn default_random() -> Arc<dyn RandomSource> {
    Arc::new(ThreadRng)
}

// ============================================================================
// Crate-wide error taxonomy
// ============================================================================

/// Top-level error type for crates that don't need a narrower enum of their
/// own. Each variant maps to an [`ErrorKind`] via [`HeroError::kind`] so the
/// resilience and retry layers can classify failures without string
/// matching.
#[derive(Debug, thiserror::Error)]
pub enum HeroError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("pool error: {0}")]
    Pool(String),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("circuit open for operation '{0}'")]
    CircuitOpen(String),

    #[error("duplicate message {0}")]
    Duplicate(Uuid),

    #[error("shutdown in progress")]
    ShutdownInProgress,
}

impl HeroError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeroError::Transport(_) | HeroError::Pool(_) | HeroError::Storage(_) => {
                ErrorKind::Transient
            }
            HeroError::Dispatch(_) | HeroError::Config(_) | HeroError::Serialization(_) => {
                ErrorKind::Permanent
            }
            HeroError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            HeroError::Duplicate(_) => ErrorKind::Duplicate,
            HeroError::ShutdownInProgress => ErrorKind::Cancellation,
        }
    }
}

pub type Result<T> = std::result::Result<T, HeroError>;
