//! Per-connection channel pool: a bounded set of long-lived channels with
//! lifetime-based expiry, plus temporary overflow channels for bursts past
//! `max_channels` that are opened and closed without ever entering the pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hero_common::HeroError;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::connection_pool::PoolStats;

#[async_trait]
pub trait ChannelFactory<Ch>: Send + Sync
where
    Ch: Send + 'static,
{
    async fn open(&self) -> Result<Ch, HeroError>;
    async fn close(&self, channel: Ch);
}

#[derive(Debug, Clone)]
pub struct ChannelPoolConfig {
    pub max_channels: usize,
    pub channel_lifetime: Duration,
}

impl Default for ChannelPoolConfig {
    fn default() -> Self {
        Self { max_channels: 16, channel_lifetime: Duration::from_secs(600) }
    }
}

struct Slot<Ch> {
    channel: Option<Ch>,
    in_use: bool,
    opened_at: Instant,
}

pub struct ChannelPool<Ch: Send + 'static> {
    factory: Arc<dyn ChannelFactory<Ch>>,
    config: ChannelPoolConfig,
    slots: Mutex<HashMap<Uuid, Slot<Ch>>>,
}

/// Releases a pooled channel back to the pool on drop; a temporary
/// (non-pooled) overflow channel is closed instead, via a detached task
/// since `Drop` cannot be `async`.
pub struct ChannelGuard<Ch: Send + 'static> {
    pool: Arc<ChannelPool<Ch>>,
    id: Option<Uuid>,
    channel: Option<Ch>,
}

impl<Ch: Send + 'static> std::ops::Deref for ChannelGuard<Ch> {
    type Target = Ch;
    fn deref(&self) -> &Ch {
        self.channel.as_ref().expect("channel taken before guard dropped")
    }
}

impl<Ch: Send + 'static> std::ops::DerefMut for ChannelGuard<Ch> {
    fn deref_mut(&mut self) -> &mut Ch {
        self.channel.as_mut().expect("channel taken before guard dropped")
    }
}

impl<Ch: Send + 'static> Drop for ChannelGuard<Ch> {
    fn drop(&mut self) {
        let Some(channel) = self.channel.take() else { return };
        match self.id.take() {
            Some(id) => self.pool.release(id, channel),
            None => {
                let factory = self.pool.factory.clone();
                tokio::spawn(async move {
                    factory.close(channel).await;
                });
            }
        }
    }
}

impl<Ch: Send + 'static> ChannelPool<Ch> {
    pub fn new(factory: Arc<dyn ChannelFactory<Ch>>, config: ChannelPoolConfig) -> Arc<Self> {
        Arc::new(Self { factory, config, slots: Mutex::new(HashMap::new()) })
    }

    pub async fn acquire(self: &Arc<Self>) -> Result<ChannelGuard<Ch>, HeroError> {
        if let Some((id, channel)) = self.take_idle() {
            return Ok(ChannelGuard { pool: self.clone(), id: Some(id), channel: Some(channel) });
        }

        if self.slots.lock().len() < self.config.max_channels {
            let channel = self.factory.open().await?;
            let id = Uuid::new_v4();
            self.slots.lock().insert(id, Slot { channel: None, in_use: true, opened_at: Instant::now() });
            return Ok(ChannelGuard { pool: self.clone(), id: Some(id), channel: Some(channel) });
        }

        tracing::debug!("channel pool full, opening a temporary overflow channel");
        let channel = self.factory.open().await?;
        Ok(ChannelGuard { pool: self.clone(), id: None, channel: Some(channel) })
    }

    fn take_idle(&self) -> Option<(Uuid, Ch)> {
        let mut slots = self.slots.lock();
        let now = Instant::now();
        let expired: Vec<Uuid> = slots
            .iter()
            .filter(|(_, s)| !s.in_use && now.duration_since(s.opened_at) >= self.config.channel_lifetime)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(slot) = slots.remove(&id) {
                if let Some(channel) = slot.channel {
                    let factory = self.factory.clone();
                    tokio::spawn(async move { factory.close(channel).await });
                }
            }
        }

        let id = slots.iter().find(|(_, s)| !s.in_use && s.channel.is_some()).map(|(id, _)| *id)?;
        let slot = slots.get_mut(&id)?;
        slot.in_use = true;
        slot.channel.take().map(|channel| (id, channel))
    }

    fn release(&self, id: Uuid, channel: Ch) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&id) {
            slot.channel = Some(channel);
            slot.in_use = false;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.slots.lock();
        let total = slots.len();
        let active = slots.values().filter(|s| s.in_use).count();
        PoolStats { total, active, idle: total - active }
    }
}
