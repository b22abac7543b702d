//! The seam both scheduler variants call through at delivery time. Kept
//! narrow (destination + raw payload) so this crate doesn't need to depend
//! on `hero-dispatch`; callers adapt their own `ScheduledDelivery` into
//! this trait.

use async_trait::async_trait;
use hero_common::HeroError;
use uuid::Uuid;

#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn deliver(&self, id: Uuid, destination: &str, payload: serde_json::Value) -> Result<(), HeroError>;

    /// Owns the retry/DLQ policy for a failed delivery. The default does
    /// nothing beyond what the caller already recorded via `MarkFailed`.
    async fn handle_delivery_failure(&self, _id: Uuid, _err: &HeroError) {}
}
