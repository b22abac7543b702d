//! Query dispatch: exactly one handler per concrete query type, invoked
//! through the resilience pipeline with a singleflight result cache in
//! front of it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use hero_common::{Envelope, ProcessingContext, ProcessingErrorInfo, ProcessingResult};
use hero_pipeline::{Handler, Pipeline};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::command::DispatchError;

pub trait Query: Clone + Send + Sync + serde::Serialize + 'static {
    type Reply: Clone + Send + Sync + 'static;
}

#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    async fn handle(&self, query: Q, ctx: &ProcessingContext) -> Result<Q::Reply, ProcessingErrorInfo>;
}

struct QueryAdapter<H, Q: Query> {
    handler: Arc<H>,
    _marker: std::marker::PhantomData<Q>,
}

#[async_trait]
impl<H, Q> Handler<Q, Q::Reply> for QueryAdapter<H, Q>
where
    H: QueryHandler<Q>,
    Q: Query,
{
    async fn handle(
        &self,
        envelope: &Envelope<Q>,
        ctx: &ProcessingContext,
    ) -> Result<Q::Reply, ProcessingErrorInfo> {
        self.handler.handle(envelope.payload.clone(), ctx).await
    }
}

fn fingerprint_for<Q: Query>(query: &Q) -> String {
    let mut hasher = Sha256::new();
    hasher.update(std::any::type_name::<Q>().as_bytes());
    if let Ok(json) = serde_json::to_vec(query) {
        hasher.update(&json);
    }
    hex::encode(hasher.finalize())
}

struct CacheSlot {
    value: Option<Arc<dyn Any + Send + Sync>>,
    expires_at: Option<Instant>,
}

/// At-most-one concurrent build per fingerprint: the per-fingerprint mutex
/// is held for the whole build, so racing callers simply queue on the lock
/// instead of each re-running the handler.
#[derive(Debug, Clone, Copy)]
pub struct QueryCacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(30),
        }
    }
}

pub struct QueryCache {
    slots: DashMap<String, Arc<Mutex<CacheSlot>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    config: QueryCacheConfig,
}

impl QueryCache {
    pub fn new(config: QueryCacheConfig) -> Self {
        Self {
            slots: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            config,
        }
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn invalidate(&self, fingerprint: &str) {
        self.slots.remove(fingerprint);
    }

    pub fn invalidate_all(&self) {
        self.slots.clear();
    }

    async fn get_or_build<F, Fut>(
        &self,
        fingerprint: String,
        build: F,
    ) -> Result<Arc<dyn Any + Send + Sync>, DispatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn Any + Send + Sync>, DispatchError>>,
    {
        if !self.config.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return build().await;
        }

        let slot = self
            .slots
            .entry(fingerprint)
            .or_insert_with(|| {
                Arc::new(Mutex::new(CacheSlot {
                    value: None,
                    expires_at: None,
                }))
            })
            .clone();
        let mut guard = slot.lock().await;

        if let Some(value) = &guard.value {
            let still_fresh = guard.expires_at.is_some_and(|exp| Instant::now() < exp);
            if still_fresh {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = build().await?;
        guard.value = Some(value.clone());
        guard.expires_at = Some(Instant::now() + self.config.ttl);
        Ok(value)
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

trait ErasedQueryEntry: Send + Sync {
    fn dispatch<'a>(
        &'a self,
        query: Box<dyn Any + Send>,
        ctx: ProcessingContext,
        cache: &'a QueryCache,
    ) -> BoxFuture<'a, Result<Box<dyn Any + Send>, DispatchError>>;
}

struct QueryEntry<H, Q: Query> {
    pipeline: Arc<Pipeline<Q, Q::Reply>>,
    adapter: QueryAdapter<H, Q>,
}

impl<H, Q> ErasedQueryEntry for QueryEntry<H, Q>
where
    H: QueryHandler<Q> + 'static,
    Q: Query,
{
    fn dispatch<'a>(
        &'a self,
        query: Box<dyn Any + Send>,
        ctx: ProcessingContext,
        cache: &'a QueryCache,
    ) -> BoxFuture<'a, Result<Box<dyn Any + Send>, DispatchError>> {
        Box::pin(async move {
            let query = *query
                .downcast::<Q>()
                .unwrap_or_else(|_| panic!("query type matched registry key but downcast failed"));
            let fingerprint = fingerprint_for(&query);
            let pipeline = &self.pipeline;
            let adapter = &self.adapter;

            let built = cache
                .get_or_build(fingerprint, move || async move {
                    let envelope = Envelope::query(query);
                    let result = pipeline
                        .process(envelope, ctx, adapter, "query-dispatch")
                        .await?;
                    match result {
                        ProcessingResult::Success {
                            payload: Some(reply),
                            ..
                        } => Ok(Arc::new(reply) as Arc<dyn Any + Send + Sync>),
                        ProcessingResult::Success { payload: None, .. } => {
                            Err(DispatchError::NoHandler)
                        }
                        ProcessingResult::Failure { error, .. } => {
                            Err(DispatchError::QueryFailed(error))
                        }
                    }
                })
                .await?;

            let reply = built
                .downcast::<Q::Reply>()
                .unwrap_or_else(|_| panic!("cached query reply type mismatch"));
            Ok(Box::new(ProcessingResult::success(Uuid::new_v4(), Some((*reply).clone())))
                as Box<dyn Any + Send>)
        })
    }
}

/// Resolves and invokes exactly one handler per concrete query type, with a
/// shared singleflight cache in front of every registered query.
pub struct QueryDispatcher {
    entries: DashMap<TypeId, Arc<dyn ErasedQueryEntry>>,
    names: HashMap<TypeId, &'static str>,
    cache: QueryCache,
}

impl Default for QueryDispatcher {
    fn default() -> Self {
        Self::new(QueryCacheConfig::default())
    }
}

impl QueryDispatcher {
    pub fn new(cache_config: QueryCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            names: HashMap::new(),
            cache: QueryCache::new(cache_config),
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        self.cache.hit_rate()
    }

    pub fn invalidate<Q: Query>(&self, query: &Q) {
        self.cache.invalidate(&fingerprint_for(query));
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn register<Q, H>(
        &mut self,
        handler: H,
        pipeline: Arc<Pipeline<Q, Q::Reply>>,
    ) -> Result<(), DispatchError>
    where
        Q: Query,
        H: QueryHandler<Q> + 'static,
    {
        let type_id = TypeId::of::<Q>();
        if self.entries.contains_key(&type_id) {
            return Err(DispatchError::AmbiguousHandler);
        }
        let entry = QueryEntry {
            pipeline,
            adapter: QueryAdapter {
                handler: Arc::new(handler),
                _marker: std::marker::PhantomData,
            },
        };
        self.entries.insert(type_id, Arc::new(entry));
        self.names.insert(type_id, std::any::type_name::<Q>());
        Ok(())
    }

    pub async fn dispatch<Q: Query>(
        &self,
        query: Q,
        ctx: ProcessingContext,
    ) -> Result<ProcessingResult<Q::Reply>, DispatchError> {
        let type_id = TypeId::of::<Q>();
        let entry = self
            .entries
            .get(&type_id)
            .ok_or(DispatchError::NoHandler)?
            .clone();
        let boxed = entry
            .dispatch(Box::new(query), ctx, &self.cache)
            .await?;
        Ok(*boxed
            .downcast::<ProcessingResult<Q::Reply>>()
            .unwrap_or_else(|_| panic!("dispatch returned mismatched reply type")))
    }
}
