//! The abstract transport seam: `Send`/`Publish`/`Consume`/`GetHealth`, plus
//! the `Consumer`/`MessageContext` surface handlers see. Concrete broker
//! wire formats sit outside this crate's scope; `memory.rs` is the only
//! concrete implementation, used for development and as the reference
//! behavior every real adapter must match.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hero_common::{Envelope, HeroError};
use serde_json::Value;

#[derive(Debug, Clone, Copy)]
pub struct ConsumeOptions {
    pub max_in_flight: u32,
    pub visibility_timeout: Duration,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self { max_in_flight: 10, visibility_timeout: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransportHealth {
    pub healthy: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConsumerMetrics {
    pub received: u64,
    pub acknowledged: u64,
    pub rejected: u64,
    pub deferred: u64,
    pub dead_lettered: u64,
}

/// Callback surface a handler uses to commit the outcome of one delivery.
/// Exactly one of these should be called per delivery; whichever succeeds
/// first is the commitment point.
#[async_trait]
pub trait MessageContext: Send + Sync {
    async fn acknowledge(&self) -> Result<(), HeroError>;
    async fn reject(&self, requeue: bool) -> Result<(), HeroError>;
    async fn defer(&self, delay: Duration) -> Result<(), HeroError>;
    async fn dead_letter(&self, reason: String) -> Result<(), HeroError>;
}

#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope<Value>, ctx: Arc<dyn MessageContext>);
}

#[async_trait]
pub trait Consumer: Send + Sync {
    async fn start(&self) -> Result<(), HeroError>;
    async fn stop(&self);
    fn is_active(&self) -> bool;
    fn get_metrics(&self) -> ConsumerMetrics;
}

#[async_trait]
pub trait MessageTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Point-to-point send to one destination (command/outbox delivery).
    async fn send(&self, envelope: Envelope<Value>, destination: &str) -> Result<(), HeroError>;

    /// Fan-out publish to a topic (event delivery).
    async fn publish(&self, envelope: Envelope<Value>, topic: &str) -> Result<(), HeroError>;

    /// Starts consuming `source`, dispatching each delivery to `handler`.
    async fn consume(
        &self,
        source: &str,
        handler: Arc<dyn ConsumerHandler>,
        options: ConsumeOptions,
    ) -> Result<Arc<dyn Consumer>, HeroError>;

    async fn get_health(&self) -> TransportHealth;
}
