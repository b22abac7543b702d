//! Event dispatch: zero or more handlers per concrete event type, invoked
//! sequentially or concurrently with a configurable failure policy.

use std::any::{Any, TypeId};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use hero_common::{Envelope, ProcessingContext, ProcessingErrorInfo, ProcessingResult};
use hero_pipeline::{Handler, Pipeline};

pub trait Event: Clone + Send + Sync + serde::Serialize + 'static {}

#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    async fn handle(&self, event: E, ctx: &ProcessingContext) -> Result<(), ProcessingErrorInfo>;
}

struct EventAdapter<H, E: Event> {
    handler: Arc<H>,
    _marker: std::marker::PhantomData<E>,
}

#[async_trait]
impl<H, E> Handler<E, ()> for EventAdapter<H, E>
where
    H: EventHandler<E>,
    E: Event,
{
    async fn handle(&self, envelope: &Envelope<E>, ctx: &ProcessingContext) -> Result<(), ProcessingErrorInfo> {
        self.handler.handle(envelope.payload.clone(), ctx).await
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

trait ErasedEventEntry: Send + Sync {
    fn dispatch<'a>(
        &'a self,
        event: Box<dyn Any + Send + Sync>,
        ctx: ProcessingContext,
    ) -> BoxFuture<'a, ProcessingResult<()>>;
}

struct EventEntry<H, E: Event> {
    pipeline: Arc<Pipeline<E, ()>>,
    adapter: EventAdapter<H, E>,
}

impl<H, E> ErasedEventEntry for EventEntry<H, E>
where
    H: EventHandler<E> + 'static,
    E: Event,
{
    fn dispatch<'a>(
        &'a self,
        event: Box<dyn Any + Send + Sync>,
        ctx: ProcessingContext,
    ) -> BoxFuture<'a, ProcessingResult<()>> {
        Box::pin(async move {
            let event = *(event as Box<dyn Any>)
                .downcast::<E>()
                .unwrap_or_else(|_| panic!("event type matched registry key but downcast failed"));
            let envelope = Envelope::event(event);
            match self.pipeline.process(envelope, ctx, &self.adapter, "event-dispatch").await {
                Ok(result) => result,
                Err(escalated) => ProcessingResult::failure(uuid::Uuid::nil(), escalated.0),
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDispatchMode {
    Sequential,
    Concurrent,
}

#[derive(Debug, Clone, Copy)]
pub struct EventDispatchConfig {
    pub mode: EventDispatchMode,
    /// Default "continue on failure"; set false for "stop on first failure".
    pub continue_on_failure: bool,
}

impl Default for EventDispatchConfig {
    fn default() -> Self {
        Self {
            mode: EventDispatchMode::Sequential,
            continue_on_failure: true,
        }
    }
}

pub struct EventDispatcher {
    handlers: DashMap<TypeId, Vec<Arc<dyn ErasedEventEntry>>>,
    config: EventDispatchConfig,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(EventDispatchConfig::default())
    }
}

impl EventDispatcher {
    pub fn new(config: EventDispatchConfig) -> Self {
        Self {
            handlers: DashMap::new(),
            config,
        }
    }

    pub fn register<E, H>(&self, handler: H, pipeline: Arc<Pipeline<E, ()>>)
    where
        E: Event,
        H: EventHandler<E> + 'static,
    {
        let entry = EventEntry {
            pipeline,
            adapter: EventAdapter {
                handler: Arc::new(handler),
                _marker: std::marker::PhantomData,
            },
        };
        self.handlers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Arc::new(entry));
    }

    pub async fn dispatch<E: Event>(
        &self,
        event: E,
        ctx: ProcessingContext,
    ) -> Vec<ProcessingResult<()>> {
        let handlers = match self.handlers.get(&TypeId::of::<E>()) {
            Some(handlers) => handlers.clone(),
            None => return Vec::new(),
        };

        match self.config.mode {
            EventDispatchMode::Sequential => {
                let mut results = Vec::with_capacity(handlers.len());
                for handler in handlers.iter() {
                    let boxed: Box<dyn Any + Send + Sync> = Box::new(event.clone());
                    let result = handler.dispatch(boxed, ctx.clone()).await;
                    let failed = result.is_failure();
                    results.push(result);
                    if failed && !self.config.continue_on_failure {
                        break;
                    }
                }
                results
            }
            EventDispatchMode::Concurrent => {
                let futures = handlers.iter().map(|handler| {
                    let boxed: Box<dyn Any + Send + Sync> = Box::new(event.clone());
                    handler.dispatch(boxed, ctx.clone())
                });
                join_all(futures).await
            }
        }
    }
}
