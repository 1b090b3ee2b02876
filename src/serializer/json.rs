use super::{Serializer, WireMessage};
use crate::error::{Result, TransportError};
use crate::protocol::SerializerKind;

/// `application/json` wire serializer.
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn kind(&self) -> SerializerKind {
        SerializerKind::Json
    }

    fn encode(&self, message: &WireMessage) -> Result<Vec<u8>> {
        serde_json::to_vec(message)
            .map_err(|e| TransportError::InvalidMessage(format!("json encode failed: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<WireMessage> {
        serde_json::from_slice(bytes)
            .map_err(|e| TransportError::InvalidMessage(format!("json decode failed: {e}")))
    }
}
