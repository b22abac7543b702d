//! Transactional outbox: durable staging for messages produced inside a
//! business transaction, published asynchronously with retry and a
//! crash-recovery sweep for entries stuck mid-publish.

mod model;
mod processor;
mod recovery;
mod storage;

pub use model::{OutboxEntry, OutboxStatus};
pub use processor::{OutboxMetricsSnapshot, OutboxProcessor, OutboxProcessorConfig, OutboxPublisher};
pub use recovery::{RecoveryConfig, RecoveryTask};
pub use storage::{InMemoryOutboxStorage, OutboxStorage};
