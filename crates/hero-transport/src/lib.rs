//! The pluggable transport layer: the abstract `MessageTransport` seam,
//! an in-memory reference implementation, wire serialization, and the
//! adapters that let the outbox, scheduler, and dispatcher use a
//! transport without depending on this crate directly.
//!
//! Concrete broker wire protocols (AMQP framing, HTTP webhook signing,
//! and the like) are external collaborators this crate does not implement;
//! only the abstract interface and its in-memory reference behavior live
//! here.

mod adapters;
mod memory;
mod queue_storage;
mod serializer;
mod transport;

pub use adapters::{TransportDeliveryHandler, TransportOutboxPublisher};
pub use memory::InMemoryTransport;
pub use queue_storage::TransportEnqueuer;
pub use serializer::{JsonSerializer, Serializer};
pub use transport::{
    ConsumeOptions, Consumer, ConsumerHandler, ConsumerMetrics, MessageContext, MessageTransport,
    TransportHealth,
};
