//! Wire (de)serialization of envelopes. Concrete byte formats beyond JSON
//! are out of this crate's scope; `JsonSerializer` is the one serializer
//! every adapter in this workspace uses.

use hero_common::{Envelope, HeroError};
use serde_json::Value;

pub trait Serializer: Send + Sync {
    fn serialize(&self, envelope: &Envelope<Value>) -> Result<Vec<u8>, HeroError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope<Value>, HeroError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, envelope: &Envelope<Value>) -> Result<Vec<u8>, HeroError> {
        serde_json::to_vec(envelope).map_err(|err| HeroError::Serialization(err.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope<Value>, HeroError> {
        serde_json::from_slice(bytes).map_err(|err| HeroError::Serialization(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hero_common::MessageKind;

    #[test]
    fn round_trips_an_envelope_through_json() {
        let serializer = JsonSerializer;
        let envelope = Envelope::new(MessageKind::Event, serde_json::json!({"a": 1}));
        let bytes = serializer.serialize(&envelope).unwrap();
        let decoded = serializer.deserialize(&bytes).unwrap();
        assert_eq!(decoded.message_id, envelope.message_id);
        assert_eq!(decoded.payload, envelope.payload);
    }
}
