//! Command dispatch: exactly one handler per concrete command type,
//! invoked through the resilience pipeline.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use hero_common::{Envelope, ProcessingContext, ProcessingErrorInfo, ProcessingResult};
use hero_pipeline::{Handler, Pipeline};

pub trait Command: Clone + Send + Sync + serde::Serialize + 'static {
    type Reply: Send + 'static;
}

#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    async fn handle(&self, command: C, ctx: &ProcessingContext) -> Result<C::Reply, ProcessingErrorInfo>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler registered for command type")]
    NoHandler,
    #[error("a handler is already registered for this command type")]
    AmbiguousHandler,
    #[error("pipeline escalated: {0}")]
    Escalated(#[from] hero_pipeline::Escalated),
    #[error("query failed: {0}")]
    QueryFailed(hero_common::ProcessingErrorInfo),
}

struct PipelineAdapter<H, C: Command> {
    handler: Arc<H>,
    _marker: std::marker::PhantomData<C>,
}

#[async_trait]
impl<H, C> Handler<C, C::Reply> for PipelineAdapter<H, C>
where
    H: CommandHandler<C>,
    C: Command,
{
    async fn handle(
        &self,
        envelope: &Envelope<C>,
        ctx: &ProcessingContext,
    ) -> Result<C::Reply, ProcessingErrorInfo> {
        self.handler.handle(envelope.payload.clone(), ctx).await
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

trait ErasedCommandEntry: Send + Sync {
    fn dispatch<'a>(
        &'a self,
        command: Box<dyn Any + Send>,
        ctx: ProcessingContext,
    ) -> BoxFuture<'a, Result<Box<dyn Any + Send>, DispatchError>>;
}

struct CommandEntry<H, C: Command> {
    pipeline: Arc<Pipeline<C, C::Reply>>,
    adapter: PipelineAdapter<H, C>,
}

impl<H, C> ErasedCommandEntry for CommandEntry<H, C>
where
    H: CommandHandler<C> + 'static,
    C: Command,
{
    fn dispatch<'a>(
        &'a self,
        command: Box<dyn Any + Send>,
        ctx: ProcessingContext,
    ) -> BoxFuture<'a, Result<Box<dyn Any + Send>, DispatchError>> {
        Box::pin(async move {
            let command = *command
                .downcast::<C>()
                .unwrap_or_else(|_| panic!("command type matched registry key but downcast failed"));
            let envelope = Envelope::command(command);
            let result = self
                .pipeline
                .process(envelope, ctx, &self.adapter, "command-dispatch")
                .await?;
            Ok(Box::new(result) as Box<dyn Any + Send>)
        })
    }
}

/// Resolves and invokes exactly one handler per concrete command type.
pub struct CommandDispatcher {
    entries: DashMap<TypeId, Arc<dyn ErasedCommandEntry>>,
    names: HashMap<TypeId, &'static str>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            names: HashMap::new(),
        }
    }

    pub fn register<C, H>(
        &mut self,
        handler: H,
        pipeline: Arc<Pipeline<C, C::Reply>>,
    ) -> Result<(), DispatchError>
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        let type_id = TypeId::of::<C>();
        if self.entries.contains_key(&type_id) {
            return Err(DispatchError::AmbiguousHandler);
        }
        let entry = CommandEntry {
            pipeline,
            adapter: PipelineAdapter {
                handler: Arc::new(handler),
                _marker: std::marker::PhantomData,
            },
        };
        self.entries.insert(type_id, Arc::new(entry));
        self.names.insert(type_id, std::any::type_name::<C>());
        Ok(())
    }

    pub async fn dispatch<C: Command>(
        &self,
        command: C,
        ctx: ProcessingContext,
    ) -> Result<ProcessingResult<C::Reply>, DispatchError> {
        let type_id = TypeId::of::<C>();
        let entry = self
            .entries
            .get(&type_id)
            .ok_or(DispatchError::NoHandler)?
            .clone();
        let boxed = entry.dispatch(Box::new(command), ctx).await?;
        Ok(*boxed
            .downcast::<ProcessingResult<C::Reply>>()
            .unwrap_or_else(|_| panic!("dispatch returned mismatched reply type")))
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hero_resilience::{CircuitBreakerRegistry, HealthMonitor, RetryConfig, RetryPolicy};
    use hero_pipeline::{Pipeline, PipelineConfig};
    use std::time::Duration;

    #[derive(Debug, Clone, serde::Serialize)]
    struct Increment(u32);

    impl Command for Increment {
        type Reply = u32;
    }

    struct IncrementHandler;

    #[async_trait]
    impl CommandHandler<Increment> for IncrementHandler {
        async fn handle(
            &self,
            command: Increment,
            _ctx: &ProcessingContext,
        ) -> Result<u32, ProcessingErrorInfo> {
            Ok(command.0 + 1)
        }
    }

    #[derive(Debug, Clone, serde::Serialize)]
    struct Noop;

    impl Command for Noop {
        type Reply = ();
    }

    fn test_pipeline<C: Command>(name: &str) -> Arc<Pipeline<C, C::Reply>> {
        Arc::new(Pipeline::new(
            PipelineConfig {
                operation_name: name.to_string(),
                timeout: Duration::from_secs(5),
                max_retries: 0,
            },
            Arc::new(CircuitBreakerRegistry::default()),
            Arc::new(RetryPolicy::new(RetryConfig::default(), hero_common::default_random())),
            Arc::new(HealthMonitor::new(Default::default())),
        ))
    }

    #[tokio::test]
    async fn dispatches_registered_command_to_its_handler() {
        let mut dispatcher = CommandDispatcher::new();
        dispatcher
            .register(IncrementHandler, test_pipeline::<Increment>("increment"))
            .unwrap();

        let result = dispatcher
            .dispatch(Increment(41), ProcessingContext::new("test", 0))
            .await
            .unwrap();

        match result {
            ProcessingResult::Success { payload, .. } => assert_eq!(payload, Some(42)),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_without_registration_errors() {
        let dispatcher = CommandDispatcher::new();
        let err = dispatcher
            .dispatch(Noop, ProcessingContext::new("test", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoHandler));
    }

    #[tokio::test]
    async fn registering_same_command_type_twice_is_ambiguous() {
        let mut dispatcher = CommandDispatcher::new();
        dispatcher
            .register(IncrementHandler, test_pipeline::<Increment>("increment"))
            .unwrap();
        let err = dispatcher
            .register(IncrementHandler, test_pipeline::<Increment>("increment"))
            .unwrap_err();
        assert!(matches!(err, DispatchError::AmbiguousHandler));
    }
}
