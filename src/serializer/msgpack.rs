use super::{Serializer, WireMessage};
use crate::error::{Result, TransportError};
use crate::protocol::SerializerKind;

/// `application/msgpack` wire serializer — the legacy default (V1) and the
/// default for new V3 clients.
pub struct MsgPackSerializer;

impl Serializer for MsgPackSerializer {
    fn kind(&self) -> SerializerKind {
        SerializerKind::MsgPack
    }

    fn encode(&self, message: &WireMessage) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(message)
            .map_err(|e| TransportError::InvalidMessage(format!("msgpack encode failed: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<WireMessage> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| TransportError::InvalidMessage(format!("msgpack decode failed: {e}")))
    }
}
