//! Generic connection pool: acquire-with-backoff, RAII release, a
//! health-check loop that evicts dead connections and trims idle ones
//! while preserving `min_pool_size`.
//!
//! The worker-dispatch pool in `fc-router/src/pool.rs` isn't a connection
//! pool (it routes messages to per-group workers), but its two load-bearing
//! techniques carry over directly: a `DashMap`-style id-keyed map for O(1)
//! concurrent removal, and atomic counters shared with background tasks
//! instead of re-deriving counts from the map on every read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hero_common::HeroError;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[async_trait]
pub trait ConnectionFactory<C>: Send + Sync
where
    C: Send + 'static,
{
    async fn create(&self) -> Result<C, HeroError>;
    async fn check_health(&self, conn: &C) -> bool;
    async fn close(&self, conn: C);
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub max_acquire_attempts: u32,
    pub acquire_retry_delay: Duration,
    pub health_check_interval: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: 1,
            max_pool_size: 10,
            max_acquire_attempts: 5,
            acquire_retry_delay: Duration::from_millis(50),
            health_check_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
}

struct Slot<C> {
    conn: Option<C>,
    in_use: bool,
    last_used: Instant,
}

pub struct ConnectionPool<C: Send + 'static> {
    factory: Arc<dyn ConnectionFactory<C>>,
    config: PoolConfig,
    slots: Mutex<HashMap<Uuid, Slot<C>>>,
    active: AtomicU32,
    cancellation: CancellationToken,
}

/// Returned by `acquire`; releases the connection back to the pool on drop.
pub struct PoolGuard<C: Send + 'static> {
    pool: Arc<ConnectionPool<C>>,
    id: Uuid,
    conn: Option<C>,
}

impl<C: Send + 'static> std::ops::Deref for PoolGuard<C> {
    type Target = C;
    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection taken before guard dropped")
    }
}

impl<C: Send + 'static> std::ops::DerefMut for PoolGuard<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection taken before guard dropped")
    }
}

impl<C: Send + 'static> Drop for PoolGuard<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(self.id, conn);
        }
    }
}

impl<C: Send + 'static> ConnectionPool<C> {
    pub fn new(factory: Arc<dyn ConnectionFactory<C>>, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            factory,
            config,
            slots: Mutex::new(HashMap::new()),
            active: AtomicU32::new(0),
            cancellation: CancellationToken::new(),
        })
    }

    pub async fn acquire(self: &Arc<Self>) -> Result<PoolGuard<C>, HeroError> {
        for attempt in 0..self.config.max_acquire_attempts {
            if let Some((id, conn)) = self.take_idle() {
                self.active.fetch_add(1, Ordering::SeqCst);
                return Ok(PoolGuard { pool: self.clone(), id, conn: Some(conn) });
            }

            if self.slots.lock().len() < self.config.max_pool_size {
                match self.factory.create().await {
                    Ok(conn) => {
                        let id = Uuid::new_v4();
                        self.slots.lock().insert(
                            id,
                            Slot { conn: None, in_use: true, last_used: Instant::now() },
                        );
                        self.active.fetch_add(1, Ordering::SeqCst);
                        return Ok(PoolGuard { pool: self.clone(), id, conn: Some(conn) });
                    }
                    Err(err) => {
                        tracing::warn!(%err, attempt, "failed to create pooled connection");
                    }
                }
            } else {
                tokio::time::sleep(self.config.acquire_retry_delay).await;
            }
        }
        Err(HeroError::Pool("pool exhausted".to_string()))
    }

    fn take_idle(&self) -> Option<(Uuid, C)> {
        let mut slots = self.slots.lock();
        let id = slots.iter().find(|(_, s)| !s.in_use && s.conn.is_some()).map(|(id, _)| *id)?;
        let slot = slots.get_mut(&id)?;
        slot.in_use = true;
        slot.last_used = Instant::now();
        slot.conn.take().map(|conn| (id, conn))
    }

    fn release(&self, id: Uuid, conn: C) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&id) {
            slot.conn = Some(conn);
            slot.in_use = false;
            slot.last_used = Instant::now();
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.slots.lock();
        let total = slots.len();
        let active = slots.values().filter(|s| s.in_use).count();
        PoolStats { total, active, idle: total - active }
    }

    /// Spawns the periodic health-check loop: evicts unhealthy idle
    /// connections outright, then trims idle-too-long healthy ones while
    /// keeping at least `min_pool_size` connections total.
    pub fn start_health_checks(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(pool.config.health_check_interval) => {}
                    _ = pool.cancellation.cancelled() => break,
                }
                pool.run_health_check().await;
            }
        })
    }

    pub fn stop_health_checks(&self) {
        self.cancellation.cancel();
    }

    async fn run_health_check(&self) {
        let idle_ids: Vec<Uuid> = {
            let slots = self.slots.lock();
            slots.iter().filter(|(_, s)| !s.in_use && s.conn.is_some()).map(|(id, _)| *id).collect()
        };

        for id in idle_ids {
            let conn = {
                let mut slots = self.slots.lock();
                match slots.get_mut(&id) {
                    Some(slot) if !slot.in_use => slot.conn.take(),
                    _ => None,
                }
            };
            let Some(conn) = conn else { continue };

            if !self.factory.check_health(&conn).await {
                tracing::warn!(%id, "pooled connection failed health check, evicting");
                self.factory.close(conn).await;
                self.slots.lock().remove(&id);
                continue;
            }

            let should_trim = {
                let slots = self.slots.lock();
                slots.len() > self.config.min_pool_size
                    && slots.get(&id).map(|s| s.last_used.elapsed() >= self.config.idle_timeout).unwrap_or(false)
            };
            if should_trim {
                tracing::debug!(%id, "closing idle pooled connection past idle_timeout");
                self.factory.close(conn).await;
                self.slots.lock().remove(&id);
            } else {
                let mut slots = self.slots.lock();
                if let Some(slot) = slots.get_mut(&id) {
                    slot.conn = Some(conn);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct CountingFactory {
        created: AtomicU32,
        healthy: AtomicBool,
    }

    #[async_trait]
    impl ConnectionFactory<u32> for CountingFactory {
        async fn create(&self) -> Result<u32, HeroError> {
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        async fn check_health(&self, _conn: &u32) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        async fn close(&self, _conn: u32) {}
    }

    #[tokio::test]
    async fn acquire_creates_up_to_max_then_reuses_released_connections() {
        let factory = Arc::new(CountingFactory { created: AtomicU32::new(0), healthy: AtomicBool::new(true) });
        let pool = ConnectionPool::new(factory.clone(), PoolConfig { max_pool_size: 1, ..PoolConfig::default() });

        let guard = pool.acquire().await.unwrap();
        assert_eq!(*guard, 0);
        drop(guard);

        let guard2 = pool.acquire().await.unwrap();
        assert_eq!(*guard2, 0);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn acquire_beyond_max_pool_size_eventually_exhausts() {
        let factory = Arc::new(CountingFactory { created: AtomicU32::new(0), healthy: AtomicBool::new(true) });
        let pool = ConnectionPool::new(
            factory,
            PoolConfig {
                max_pool_size: 1,
                max_acquire_attempts: 2,
                acquire_retry_delay: Duration::from_millis(1),
                ..PoolConfig::default()
            },
        );

        let _held = pool.acquire().await.unwrap();
        let result = pool.acquire().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn health_check_evicts_unhealthy_idle_connections() {
        let factory = Arc::new(CountingFactory { created: AtomicU32::new(0), healthy: AtomicBool::new(true) });
        let pool = ConnectionPool::new(factory.clone(), PoolConfig { max_pool_size: 2, min_pool_size: 0, ..PoolConfig::default() });

        let guard = pool.acquire().await.unwrap();
        drop(guard);
        assert_eq!(pool.stats().total, 1);

        factory.healthy.store(false, Ordering::SeqCst);
        pool.run_health_check().await;
        assert_eq!(pool.stats().total, 0);
    }
}
