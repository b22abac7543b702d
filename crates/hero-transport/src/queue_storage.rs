//! Enqueue-only adapter bridging a transport destination to
//! `hero-dispatch::Enqueuer`, the narrow seam the scheduler's
//! `DeliveryRoute::Queue` variant dispatches through.

use async_trait::async_trait;
use hero_common::{Envelope, ErrorKind, MessageKind, ProcessingErrorInfo};
use hero_dispatch::{DispatchError, Enqueuer};
use hero_pipeline::Escalated;
use serde_json::Value;
use std::sync::Arc;

use crate::transport::MessageTransport;

pub struct TransportEnqueuer {
    transport: Arc<dyn MessageTransport>,
}

impl TransportEnqueuer {
    pub fn new(transport: Arc<dyn MessageTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Enqueuer for TransportEnqueuer {
    async fn enqueue(&self, queue: &str, payload: Value) -> Result<(), DispatchError> {
        let envelope = Envelope::new(MessageKind::Command, payload);
        self.transport.send(envelope, queue).await.map_err(|err| {
            DispatchError::Escalated(Escalated(ProcessingErrorInfo::new(
                ErrorKind::Transient,
                err.to_string(),
            )))
        })
    }
}
