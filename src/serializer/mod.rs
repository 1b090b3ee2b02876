//! Serializer abstraction bridging the wire envelope's `content-type`
//! negotiation to a concrete encode/decode implementation.
//!
//! The in-memory representation is `serde_json::Value` / `Map` for both
//! directions: it is serde's own generic data model, not a JSON-specific
//! type, so `rmp-serde` encodes it exactly as it would any other
//! `Serialize` implementor.

mod json;
mod msgpack;

pub use json::JsonSerializer;
pub use msgpack::MsgPackSerializer;

use crate::error::Result;
use crate::protocol::SerializerKind;
use serde_json::Value;

/// Wire struct shared by every serializer: the `(request_id, meta, body)`
/// triple from the data model, one level below the envelope.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WireMessage {
    pub request_id: i64,
    pub meta: serde_json::Map<String, Value>,
    pub body: Value,
}

/// Encodes and decodes [`WireMessage`] payloads for one `content-type`.
pub trait Serializer: Send + Sync {
    fn kind(&self) -> SerializerKind;
    fn encode(&self, message: &WireMessage) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<WireMessage>;
}

/// Returns the built-in [`Serializer`] for a negotiated wire kind.
pub fn for_kind(kind: SerializerKind) -> Box<dyn Serializer> {
    match kind {
        SerializerKind::MsgPack => Box::new(MsgPackSerializer),
        SerializerKind::Json => Box::new(JsonSerializer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WireMessage {
        let mut meta = serde_json::Map::new();
        meta.insert("app".into(), Value::from(52));
        WireMessage {
            request_id: 27,
            meta,
            body: serde_json::json!({"test": "payload"}),
        }
    }

    #[test]
    fn json_round_trips() {
        let s = for_kind(SerializerKind::Json);
        let encoded = s.encode(&sample()).expect("encode");
        let decoded = s.decode(&encoded).expect("decode");
        assert_eq!(decoded.request_id, 27);
        assert_eq!(decoded.body, sample().body);
    }

    #[test]
    fn msgpack_round_trips() {
        let s = for_kind(SerializerKind::MsgPack);
        let encoded = s.encode(&sample()).expect("encode");
        let decoded = s.decode(&encoded).expect("decode");
        assert_eq!(decoded.request_id, 27);
        assert_eq!(decoded.body, sample().body);
    }
}
