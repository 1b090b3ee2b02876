//! Wire envelope: protocol version negotiation, header parsing, and chunk
//! header bookkeeping.
//!
//! One Redis list entry is a byte string consisting of an optional header
//! region followed by the serialized message payload. Three envelope shapes
//! are recognized on receive, grounded exactly on the original transport's
//! test suite (`original_source/tests/unit/.../test_core.py`):
//!
//! - V1: bare payload, always MsgPack.
//! - V2: `content-type:<mime>;` then payload. Whitespace around `:` and `;`
//!   is tolerated.
//! - V3: `pysoa-redis/3//` magic, then zero or more `key:value;` headers in
//!   any order, then payload.

use crate::error::{Result, TransportError};

pub const V3_MAGIC: &str = "pysoa-redis/3//";

/// Negotiated envelope version for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V1 = 1,
    V2 = 2,
    V3 = 3,
}

impl ProtocolVersion {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn supports_chunking(self) -> bool {
        matches!(self, ProtocolVersion::V3)
    }

    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            1 => Ok(ProtocolVersion::V1),
            2 => Ok(ProtocolVersion::V2),
            3 => Ok(ProtocolVersion::V3),
            other => Err(TransportError::InvalidMessage(format!(
                "unsupported protocol_version {other}"
            ))),
        }
    }
}

/// Wire serializer selected via the `content-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerializerKind {
    MsgPack,
    Json,
}

impl SerializerKind {
    pub fn mime(self) -> &'static str {
        match self {
            SerializerKind::MsgPack => "application/msgpack",
            SerializerKind::Json => "application/json",
        }
    }

    pub fn from_mime(mime: &str) -> Result<Self> {
        match mime.trim() {
            "application/msgpack" => Ok(SerializerKind::MsgPack),
            "application/json" => Ok(SerializerKind::Json),
            other => Err(TransportError::InvalidMessage(format!(
                "unrecognized content-type {other:?}"
            ))),
        }
    }
}

/// `chunk-count` / `chunk-id` pair carried in a V3 envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub count: u32,
    pub id: u32,
}

/// Result of splitting one Redis list entry into envelope metadata and
/// the remaining payload bytes (payload is returned as a subslice, callers
/// own the input buffer's lifetime).
#[derive(Debug, Clone)]
pub struct DecodedEnvelope<'a> {
    pub protocol_version: ProtocolVersion,
    pub serializer: SerializerKind,
    pub chunk: Option<ChunkInfo>,
    pub payload: &'a [u8],
}

fn is_header_key_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// Scans forward from `start` for a `key:value;` header. Returns
/// `(key, value, bytes_consumed)` on match, or `None` if the bytes at
/// `start` don't look like a header (i.e. the payload has begun).
fn scan_header(bytes: &[u8], start: usize) -> Option<(String, String, usize)> {
    // Header keys are short ASCII tokens; search only a bounded window so an
    // arbitrary binary payload can't be mistaken for a dangling header.
    const MAX_HEADER_LEN: usize = 256;
    let window_end = (start + MAX_HEADER_LEN).min(bytes.len());
    let window = bytes.get(start..window_end)?;

    let colon = window.iter().position(|&b| b == b':')?;
    let key_raw = window.get(..colon)?;
    if key_raw.is_empty() || !key_raw.iter().all(|&b| is_header_key_byte(b) || b == b' ') {
        return None;
    }
    let semi_rel = window.get(colon + 1..)?.iter().position(|&b| b == b';')?;
    let semi = colon + 1 + semi_rel;
    let value_raw = window.get(colon + 1..semi)?;

    let key = std::str::from_utf8(key_raw).ok()?.trim().to_ascii_lowercase();
    let value = std::str::from_utf8(value_raw).ok()?.trim().to_string();
    Some((key, value, start + semi + 1))
}

/// Parses the `key:value;` header region starting at `start`, stopping at
/// the first byte sequence that doesn't parse as a header (that is the
/// start of the payload).
fn parse_headers(bytes: &[u8], mut pos: usize) -> (Vec<(String, String)>, usize) {
    let mut headers = Vec::new();
    while let Some((key, value, next)) = scan_header(bytes, pos) {
        headers.push((key, value));
        pos = next;
    }
    (headers, pos)
}

/// Decodes the envelope of one Redis list entry.
pub fn decode_envelope(bytes: &[u8]) -> Result<DecodedEnvelope<'_>> {
    if let Some(rest) = bytes.strip_prefix(V3_MAGIC.as_bytes()) {
        let offset = bytes.len() - rest.len();
        let (headers, payload_start) = parse_headers(bytes, offset);

        let mut content_type = None;
        let mut chunk_count = None;
        let mut chunk_id = None;
        for (key, value) in headers {
            match key.as_str() {
                "content-type" => content_type = Some(value),
                "chunk-count" => {
                    chunk_count = Some(value.parse::<u32>().map_err(|_| {
                        TransportError::InvalidMessage(format!("invalid chunk-count {value:?}"))
                    })?);
                }
                "chunk-id" => {
                    chunk_id = Some(value.parse::<u32>().map_err(|_| {
                        TransportError::InvalidMessage(format!("invalid chunk-id {value:?}"))
                    })?);
                }
                unknown => {
                    tracing::debug!(header = unknown, value, "ignoring unknown V3 header");
                }
            }
        }

        let serializer = match content_type {
            Some(mime) => SerializerKind::from_mime(&mime)?,
            None => SerializerKind::MsgPack,
        };

        let chunk = match (chunk_count, chunk_id) {
            (Some(count), Some(id)) => Some(ChunkInfo { count, id }),
            (Some(_), None) => {
                return Err(TransportError::InvalidMessage(
                    "chunked message missing chunk ID".into(),
                ));
            }
            (None, Some(_)) => {
                return Err(TransportError::InvalidMessage(
                    "chunked message missing chunk headers".into(),
                ));
            }
            (None, None) => None,
        };

        let payload = bytes
            .get(payload_start..)
            .ok_or_else(|| TransportError::InvalidMessage("truncated envelope".into()))?;

        return Ok(DecodedEnvelope {
            protocol_version: ProtocolVersion::V3,
            serializer,
            chunk,
            payload,
        });
    }

    if let Some((key, value, payload_start)) = scan_header(bytes, 0) {
        if key == "content-type" {
            let serializer = SerializerKind::from_mime(&value)?;
            let payload = bytes
                .get(payload_start..)
                .ok_or_else(|| TransportError::InvalidMessage("truncated envelope".into()))?;
            return Ok(DecodedEnvelope {
                protocol_version: ProtocolVersion::V2,
                serializer,
                chunk: None,
                payload,
            });
        }
    }

    Ok(DecodedEnvelope {
        protocol_version: ProtocolVersion::V1,
        serializer: SerializerKind::MsgPack,
        chunk: None,
        payload: bytes,
    })
}

/// Builds one Redis list entry from envelope metadata and a serialized
/// payload.
pub fn encode_envelope(
    version: ProtocolVersion,
    serializer: SerializerKind,
    chunk: Option<ChunkInfo>,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 64);
    match version {
        ProtocolVersion::V1 => {}
        ProtocolVersion::V2 => {
            out.extend_from_slice(b"content-type:");
            out.extend_from_slice(serializer.mime().as_bytes());
            out.push(b';');
        }
        ProtocolVersion::V3 => {
            out.extend_from_slice(V3_MAGIC.as_bytes());
            out.extend_from_slice(b"content-type:");
            out.extend_from_slice(serializer.mime().as_bytes());
            out.push(b';');
            if let Some(chunk) = chunk {
                out.extend_from_slice(format!("chunk-count:{};", chunk.count).as_bytes());
                out.extend_from_slice(format!("chunk-id:{};", chunk.id).as_bytes());
            }
        }
    }
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_is_bare_payload() {
        let decoded = decode_envelope(b"\x93\x01\x80\x80").expect("decode");
        assert_eq!(decoded.protocol_version, ProtocolVersion::V1);
        assert_eq!(decoded.serializer, SerializerKind::MsgPack);
        assert!(decoded.chunk.is_none());
        assert_eq!(decoded.payload, b"\x93\x01\x80\x80");
    }

    #[test]
    fn v2_tolerates_whitespace() {
        let mut bytes = b"content-type : application/json ;".to_vec();
        bytes.extend_from_slice(b"{}");
        let decoded = decode_envelope(&bytes).expect("decode");
        assert_eq!(decoded.protocol_version, ProtocolVersion::V2);
        assert_eq!(decoded.serializer, SerializerKind::Json);
        assert_eq!(decoded.payload, b"{}");
    }

    #[test]
    fn v3_round_trip_without_chunking() {
        let encoded = encode_envelope(ProtocolVersion::V3, SerializerKind::MsgPack, None, b"abc");
        let decoded = decode_envelope(&encoded).expect("decode");
        assert_eq!(decoded.protocol_version, ProtocolVersion::V3);
        assert_eq!(decoded.serializer, SerializerKind::MsgPack);
        assert!(decoded.chunk.is_none());
        assert_eq!(decoded.payload, b"abc");
    }

    #[test]
    fn v3_round_trip_with_chunking() {
        let chunk = ChunkInfo { count: 3, id: 2 };
        let encoded =
            encode_envelope(ProtocolVersion::V3, SerializerKind::Json, Some(chunk), b"xyz");
        let decoded = decode_envelope(&encoded).expect("decode");
        assert_eq!(decoded.chunk, Some(chunk));
        assert_eq!(decoded.payload, b"xyz");
    }

    #[test]
    fn v3_chunk_count_without_chunk_id_is_an_error() {
        let mut bytes = V3_MAGIC.as_bytes().to_vec();
        bytes.extend_from_slice(b"content-type:application/json;chunk-count:3;");
        bytes.extend_from_slice(b"{}");
        let err = decode_envelope(&bytes).unwrap_err();
        assert!(err.to_string().contains("missing chunk ID"));
    }

    #[test]
    fn v3_unknown_header_is_ignored() {
        let mut bytes = V3_MAGIC.as_bytes().to_vec();
        bytes.extend_from_slice(b"content-type:application/msgpack;future-field:xyz;");
        bytes.extend_from_slice(b"payload");
        let decoded = decode_envelope(&bytes).expect("decode");
        assert_eq!(decoded.payload, b"payload");
    }
}
