//! The inbox processor: `process_incoming`'s open-transaction / dedup-check
//! / add / dispatch / mark-outcome contract, plus the deduplication-rate
//! metric.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hero_common::{Envelope, ProcessingContext, ProcessingErrorInfo, ProcessingResult};
use hero_pipeline::{Escalated, Handler, Pipeline};

use crate::storage::InboxStorage;

#[derive(Debug, Clone, Copy, Default)]
pub struct InboxMetricsSnapshot {
    pub processed: u64,
    pub duplicates: u64,
    pub failed: u64,
}

impl InboxMetricsSnapshot {
    /// `duplicates / (processed + duplicates)`, per the processor's
    /// deduplication-rate metric. Zero when nothing has been seen yet.
    pub fn deduplication_rate(&self) -> f64 {
        let denom = self.processed + self.duplicates;
        if denom == 0 {
            0.0
        } else {
            self.duplicates as f64 / denom as f64
        }
    }
}

pub struct InboxProcessor<T, R> {
    storage: Arc<dyn InboxStorage>,
    pipeline: Arc<Pipeline<T, R>>,
    handler: Arc<dyn Handler<T, R>>,
    dedup_window: Option<Duration>,
    processed: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicU64,
}

impl<T, R> InboxProcessor<T, R>
where
    T: Clone + Send + Sync + 'static + serde::Serialize,
    R: Send + 'static,
{
    pub fn new(
        storage: Arc<dyn InboxStorage>,
        pipeline: Arc<Pipeline<T, R>>,
        handler: Arc<dyn Handler<T, R>>,
        dedup_window: Option<Duration>,
    ) -> Self {
        Self {
            storage,
            pipeline,
            handler,
            dedup_window,
            processed: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn metrics(&self) -> InboxMetricsSnapshot {
        InboxMetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// `true` when the message was freshly processed, `false` when it was a
    /// duplicate. Failures propagate as an error after the inbox entry has
    /// been marked `Failed`.
    pub async fn process_incoming(
        &self,
        envelope: Envelope<T>,
        ctx: ProcessingContext,
    ) -> Result<bool, ProcessingErrorInfo> {
        let message_id = envelope.message_id;

        let is_duplicate = self
            .storage
            .is_duplicate(message_id, self.dedup_window)
            .await
            .map_err(|err| ProcessingErrorInfo::new(err.kind(), err.to_string()))?;
        if is_duplicate {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }

        self.storage
            .add(message_id)
            .await
            .map_err(|err| ProcessingErrorInfo::new(err.kind(), err.to_string()))?;

        let outcome = self
            .pipeline
            .process(envelope, ctx, self.handler.as_ref(), "inbox")
            .await;

        match outcome {
            Ok(ProcessingResult::Success { .. }) => {
                self.storage
                    .mark_processed(message_id)
                    .await
                    .map_err(|err| ProcessingErrorInfo::new(err.kind(), err.to_string()))?;
                self.processed.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Ok(ProcessingResult::Failure { error, .. }) => {
                self.storage
                    .mark_failed(message_id, error.message.clone())
                    .await
                    .map_err(|err| ProcessingErrorInfo::new(err.kind(), err.to_string()))?;
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(error)
            }
            Err(Escalated(error)) => {
                self.storage
                    .mark_failed(message_id, error.message.clone())
                    .await
                    .map_err(|err| ProcessingErrorInfo::new(err.kind(), err.to_string()))?;
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(error)
            }
        }
    }
}
