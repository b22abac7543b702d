//! The processing pipeline and batch accumulator (spec components B and J).
//! Grounded on `fc-router/src/mediator.rs` (sequential resilience
//! decorators) and `fc-outbox/src/buffer.rs` (the batch accumulator shape).

pub mod accumulator;
pub mod batch;
pub mod pipeline;

pub use accumulator::{AccumulatorConfig, AccumulatorFullError, BatchAccumulator, Emitted};
pub use batch::{BatchPipeline, BatchPipelineConfig};
pub use pipeline::{DedupCheck, Escalated, Handler, Pipeline, PipelineConfig, Validator};
