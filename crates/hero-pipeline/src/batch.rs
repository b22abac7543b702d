//! Batch pipeline: runs a slice of envelopes through the same per-item
//! stage chain, either strictly sequential or with bounded parallelism,
//! preserving result ordering by original index.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use hero_common::{BatchResult, Envelope, ProcessingContext, ProcessingResult};

use crate::pipeline::{Escalated, Handler, Pipeline};

#[derive(Debug, Clone, Copy)]
pub struct BatchPipelineConfig {
    pub max_parallelism: usize,
    pub continue_on_failure: bool,
}

impl Default for BatchPipelineConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 1,
            continue_on_failure: true,
        }
    }
}

pub struct BatchPipeline<T, R> {
    pipeline: Arc<Pipeline<T, R>>,
    config: BatchPipelineConfig,
}

impl<T, R> BatchPipeline<T, R>
where
    T: Clone + Send + Sync + 'static + serde::Serialize,
    R: Send + 'static,
{
    pub fn new(pipeline: Arc<Pipeline<T, R>>, config: BatchPipelineConfig) -> Self {
        Self { pipeline, config }
    }

    /// `len(envelopes) == len(contexts)`. Returns per-index outcomes; a
    /// single `Escalated` abandons the whole batch since it is meant to
    /// propagate to the caller.
    pub async fn process(
        &self,
        envelopes: Vec<Envelope<T>>,
        contexts: Vec<ProcessingContext>,
        handler: &(dyn Handler<T, R> + Sync),
        component: &str,
    ) -> std::result::Result<BatchResult<R>, Escalated> {
        assert_eq!(envelopes.len(), contexts.len());

        if self.config.max_parallelism <= 1 {
            return self.process_sequential(envelopes, contexts, handler, component).await;
        }
        self.process_parallel(envelopes, contexts, handler, component).await
    }

    async fn process_sequential(
        &self,
        envelopes: Vec<Envelope<T>>,
        contexts: Vec<ProcessingContext>,
        handler: &(dyn Handler<T, R> + Sync),
        component: &str,
    ) -> std::result::Result<BatchResult<R>, Escalated> {
        let mut results = Vec::with_capacity(envelopes.len());
        for (envelope, ctx) in envelopes.into_iter().zip(contexts.into_iter()) {
            let result = self.pipeline.process(envelope, ctx, handler, component).await?;
            let failed = result.is_failure();
            results.push(result);
            if failed && !self.config.continue_on_failure {
                break;
            }
        }
        Ok(BatchResult::new(results))
    }

    /// Up to `max_parallelism` items in flight; results are reassembled in
    /// original-index order regardless of completion order.
    async fn process_parallel(
        &self,
        envelopes: Vec<Envelope<T>>,
        contexts: Vec<ProcessingContext>,
        handler: &(dyn Handler<T, R> + Sync),
        component: &str,
    ) -> std::result::Result<BatchResult<R>, Escalated> {
        let concurrency = self.config.max_parallelism.max(1);
        let mut results = Vec::with_capacity(envelopes.len());
        let mut pending = stream::iter(envelopes.into_iter().zip(contexts))
            .map(|(envelope, ctx)| self.pipeline.process(envelope, ctx, handler, component))
            .buffered(concurrency);

        while let Some(item) = pending.next().await {
            results.push(item?);
        }
        Ok(BatchResult::new(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use async_trait::async_trait;
    use hero_common::ProcessingErrorInfo;
    use hero_resilience::{CircuitBreakerRegistry, HealthMonitor, HealthMonitorConfig, RetryPolicy, RetryConfig};
    use std::time::Duration;

    struct EchoHandler;

    #[async_trait]
    impl Handler<i32, i32> for EchoHandler {
        async fn handle(
            &self,
            envelope: &Envelope<i32>,
            _ctx: &ProcessingContext,
        ) -> std::result::Result<i32, ProcessingErrorInfo> {
            Ok(envelope.payload)
        }
    }

    fn test_pipeline() -> Arc<Pipeline<i32, i32>> {
        Arc::new(Pipeline::new(
            PipelineConfig {
                operation_name: "batch-test".into(),
                timeout: Duration::from_secs(1),
                max_retries: 3,
            },
            Arc::new(CircuitBreakerRegistry::default()),
            Arc::new(RetryPolicy::new(RetryConfig::default(), hero_common::default_random())),
            Arc::new(HealthMonitor::new(HealthMonitorConfig::default())),
        ))
    }

    #[tokio::test]
    async fn sequential_preserves_order() {
        let pipeline = test_pipeline();
        let batch = BatchPipeline::new(pipeline, BatchPipelineConfig { max_parallelism: 1, continue_on_failure: true });
        let envelopes: Vec<_> = (0..5).map(Envelope::command).collect();
        let contexts: Vec<_> = (0..5).map(|_| ProcessingContext::new("test", 3)).collect();
        let handler = EchoHandler;
        let result = batch.process(envelopes, contexts, &handler, "test").await.unwrap();
        assert_eq!(result.total(), 5);
        for i in 0..5 {
            match &result[i] {
                ProcessingResult::Success { payload: Some(v), .. } => assert_eq!(*v, i as i32),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn parallel_reassembles_by_index() {
        let pipeline = test_pipeline();
        let batch = BatchPipeline::new(pipeline, BatchPipelineConfig { max_parallelism: 4, continue_on_failure: true });
        let envelopes: Vec<_> = (0..8).map(Envelope::command).collect();
        let contexts: Vec<_> = (0..8).map(|_| ProcessingContext::new("test", 3)).collect();
        let handler = EchoHandler;
        let result = batch.process(envelopes, contexts, &handler, "test").await.unwrap();
        assert_eq!(result.total(), 8);
        for i in 0..8 {
            match &result[i] {
                ProcessingResult::Success { payload: Some(v), .. } => assert_eq!(*v, i as i32),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }
}
