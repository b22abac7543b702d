//! Adapts a `MessageTransport` to the narrow publish seams `hero-outbox`
//! and `hero-scheduler` depend on, so neither crate needs to know this
//! crate exists.

use std::sync::Arc;

use async_trait::async_trait;
use hero_common::{Envelope, HeroError, MessageKind};
use hero_outbox::OutboxPublisher;
use hero_scheduler::DeliveryHandler;
use serde_json::Value;
use uuid::Uuid;

use crate::transport::MessageTransport;

pub struct TransportOutboxPublisher {
    transport: Arc<dyn MessageTransport>,
}

impl TransportOutboxPublisher {
    pub fn new(transport: Arc<dyn MessageTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl OutboxPublisher for TransportOutboxPublisher {
    async fn publish(&self, destination: &str, message_id: Uuid, payload: Value) -> Result<(), HeroError> {
        let mut envelope = Envelope::new(MessageKind::Event, payload);
        envelope.message_id = message_id;
        self.transport.send(envelope, destination).await
    }
}

pub struct TransportDeliveryHandler {
    transport: Arc<dyn MessageTransport>,
}

impl TransportDeliveryHandler {
    pub fn new(transport: Arc<dyn MessageTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl DeliveryHandler for TransportDeliveryHandler {
    async fn deliver(&self, id: Uuid, destination: &str, payload: Value) -> Result<(), HeroError> {
        let mut envelope = Envelope::new(MessageKind::Command, payload);
        envelope.message_id = id;
        self.transport.send(envelope, destination).await
    }

    async fn handle_delivery_failure(&self, id: Uuid, err: &HeroError) {
        tracing::error!(%id, %err, "scheduled delivery failed");
    }
}
