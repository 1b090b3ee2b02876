//! Transport core: envelope encode/decode, chunking, expiry, and the
//! send-retry / receive-reassembly loops shared by the client and server
//! transports.
//!
//! The Python original specializes one class via inheritance into a client
//! core and a server core so that only the server gets chunking behavior.
//! Here that's a compile-time distinction instead: [`RedisTransportCore::new_client`]
//! and [`RedisTransportCore::new_server`] take different config types, so
//! passing a chunk threshold to a client is a type error, not a runtime one.

use crate::backend::{backoff_duration, get_connection, RedisBackend, RoundRobinCursor};
use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::metrics::{timed, timed_async, Metrics};
use crate::protocol::{self, ChunkInfo, ProtocolVersion, SerializerKind};
use crate::queue::redis_key;
use crate::serializer::{self, WireMessage};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const EXPIRY_META_KEY: &str = "__expiry__";
const PROTOCOL_VERSION_META_KEY: &str = "protocol_version";
const SERIALIZER_META_KEY: &str = "serializer";

/// Whether a core may chunk outbound sends. Only a [`Role::Server`] core may;
/// a [`Role::Client`] core rejects chunked configuration at construction and
/// rejects chunked inbound requests at receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Client,
    Server,
}

/// Outcome of one [`RedisTransportCore::receive_message`] call. A timeout —
/// whether from an empty queue or a discarded expired message — is routine
/// control flow, not an error; see `crate::error` for why this lives outside
/// [`TransportError`].
#[derive(Debug)]
pub enum ReceiveOutcome {
    Message {
        request_id: i64,
        meta: Map<String, Value>,
        body: Value,
    },
    Timeout,
}

/// Client/server-shared envelope, chunking, expiry, and retry logic over one
/// [`RedisBackend`].
pub struct RedisTransportCore {
    role: Role,
    backend: Arc<dyn RedisBackend>,
    cursor: RoundRobinCursor,
    config: TransportConfig,
    pub metrics: Metrics,
}

impl RedisTransportCore {
    /// Builds a core for a client transport. Clients may not chunk; any
    /// `chunk_messages_larger_than_bytes` present in `config` is ignored,
    /// matching "the transport refuses to configure chunking on a
    /// client-side core."
    pub fn new_client(backend: Arc<dyn RedisBackend>, mut config: TransportConfig) -> Self {
        config.chunk_messages_larger_than_bytes = None;
        RedisTransportCore {
            role: Role::Client,
            backend,
            cursor: RoundRobinCursor::new(),
            config,
            metrics: Metrics::new(),
        }
    }

    /// Builds a core for a server transport. If `chunk_messages_larger_than_bytes`
    /// is set it must be `>= 102_400`, and `maximum_message_size_in_bytes`
    /// must be at least 5x that value.
    pub fn new_server(backend: Arc<dyn RedisBackend>, config: TransportConfig) -> Result<Self> {
        if let Some(chunk_threshold) = config.chunk_messages_larger_than_bytes {
            if chunk_threshold < 102_400 {
                return Err(TransportError::Configuration(
                    "chunk_messages_larger_than_bytes must be >= 102400".into(),
                ));
            }
            if config.maximum_message_size_in_bytes < 5 * chunk_threshold {
                return Err(TransportError::Configuration(
                    "maximum_message_size_in_bytes must be at least 5 times larger than \
                     chunk_messages_larger_than_bytes"
                        .into(),
                ));
            }
        }
        Ok(RedisTransportCore {
            role: Role::Server,
            backend,
            cursor: RoundRobinCursor::new(),
            config,
            metrics: Metrics::new(),
        })
    }

    fn now_secs() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    /// Encodes, chunks if necessary, and sends `(request_id, meta, body)` to
    /// `queue_name`, retrying with backoff while the destination queue is
    /// at capacity.
    pub async fn send_message(
        &self,
        queue_name: &str,
        request_id: i64,
        mut meta: Map<String, Value>,
        body: Value,
        expiry_override: Option<Duration>,
    ) -> Result<()> {
        let expiry = expiry_override.unwrap_or_else(|| self.config.message_expiry());
        meta.insert(
            EXPIRY_META_KEY.to_string(),
            Value::from(Self::now_secs() + expiry.as_secs_f64()),
        );

        let protocol_version = match meta.get(PROTOCOL_VERSION_META_KEY) {
            Some(Value::Number(n)) => {
                ProtocolVersion::from_i64(n.as_i64().unwrap_or(self.config.protocol_version as i64))?
            }
            _ => ProtocolVersion::from_i64(self.config.protocol_version as i64)?,
        };
        let serializer_kind = match meta.get(SERIALIZER_META_KEY).and_then(Value::as_str) {
            Some(mime) => SerializerKind::from_mime(mime)?,
            None => SerializerKind::MsgPack,
        };

        meta.remove(PROTOCOL_VERSION_META_KEY);
        meta.remove(SERIALIZER_META_KEY);

        let wire = WireMessage { request_id, meta, body };
        let serializer = serializer::for_kind(serializer_kind);
        let payload = timed("send.serialize", || serializer.encode(&wire))?;

        let whole_envelope = protocol::encode_envelope(protocol_version, serializer_kind, None, &payload);

        let chunk_threshold = if self.role == Role::Server {
            self.config.chunk_messages_larger_than_bytes
        } else {
            None
        };

        let needs_chunking = chunk_threshold.is_some_and(|t| whole_envelope.len() > t);

        if !needs_chunking {
            if whole_envelope.len() > self.config.maximum_message_size_in_bytes {
                self.metrics.incr("send.error.message_too_large");
                return Err(TransportError::MessageTooLarge(format!(
                    "message of {} bytes exceeds maximum message size in bytes of {}",
                    whole_envelope.len(),
                    self.config.maximum_message_size_in_bytes
                )));
            }
            if let Some(advisory) = self.config.log_messages_larger_than_bytes {
                if whole_envelope.len() > advisory {
                    tracing::warn!(
                        queue = queue_name,
                        bytes = whole_envelope.len(),
                        "outbound message exceeds advisory size threshold"
                    );
                }
            }
            return self.send_part(queue_name, &whole_envelope).await;
        }

        if !protocol_version.supports_chunking() {
            self.metrics.incr("send.error.message_too_large");
            return Err(TransportError::MessageTooLarge(
                "message requires chunking but client does not support chunking".into(),
            ));
        }

        let chunk_size = chunk_threshold.unwrap_or(usize::MAX);
        let chunk_count = payload.len().div_ceil(chunk_size).max(1) as u32;

        if whole_envelope.len() > self.config.maximum_message_size_in_bytes {
            self.metrics.incr("send.error.message_too_large");
            return Err(TransportError::MessageTooLarge(format!(
                "message of {} bytes exceeds maximum message size in bytes of {} even after chunking",
                whole_envelope.len(),
                self.config.maximum_message_size_in_bytes
            )));
        }

        for id in 1..=chunk_count {
            let start = (id as usize - 1) * chunk_size;
            let end = (start + chunk_size).min(payload.len());
            let slice = payload
                .get(start..end)
                .ok_or_else(|| TransportError::InvalidMessage("chunk slice out of range".into()))?;
            let envelope = protocol::encode_envelope(
                protocol_version,
                serializer_kind,
                Some(ChunkInfo { count: chunk_count, id }),
                slice,
            );
            self.send_part(queue_name, &envelope).await?;
        }

        Ok(())
    }

    async fn send_part(&self, queue_name: &str, part: &[u8]) -> Result<()> {
        let key = redis_key(queue_name);
        let conn = timed_async(
            "send.get_redis_connection",
            get_connection(self.backend.as_ref(), &self.cursor, &key),
        )
        .await?;

        for attempt in 0..=self.config.queue_full_retries {
            let result = timed_async(
                "send.send_message_to_redis_queue",
                conn.send_to_queue(
                    &key,
                    part,
                    self.config.message_expiry_in_seconds,
                    self.config.queue_capacity,
                ),
            )
            .await;

            match result {
                Ok(()) => return Ok(()),
                Err(TransportError::SendError(message)) if message.contains("was full") => {
                    if attempt > 0 {
                        self.metrics.incr("send.queue_full_retry");
                        self.metrics.incr(&format!("send.queue_full_retry.retry_{attempt}"));
                    }
                    if attempt >= self.config.queue_full_retries {
                        self.metrics.incr("send.error.redis_queue_full");
                        return Err(TransportError::SendError(format!(
                            "queue {queue_name} was full after {attempt} retries"
                        )));
                    }
                    tracing::debug!(queue = queue_name, attempt, "queue full, backing off");
                    tokio::time::sleep(backoff_duration(attempt)).await;
                }
                Err(other) => {
                    self.metrics.incr("send.error.unknown");
                    return Err(other);
                }
            }
        }
        unreachable!("loop always returns")
    }

    /// Receives and (if necessary) reassembles one logical message from
    /// `queue_name`, or a [`ReceiveOutcome::Timeout`] if nothing arrived (or
    /// an arrived message had already expired).
    pub async fn receive_message(
        &self,
        queue_name: &str,
        timeout_override: Option<Duration>,
    ) -> Result<ReceiveOutcome> {
        let key = redis_key(queue_name);
        let timeout = timeout_override.unwrap_or_else(|| self.config.receive_timeout());

        let conn = get_connection(self.backend.as_ref(), &self.cursor, &key).await?;
        let Some(first) = conn.blpop(&key, timeout).await? else {
            return Ok(ReceiveOutcome::Timeout);
        };

        let decoded = protocol::decode_envelope(&first)?;

        let (serializer_kind, protocol_version, payload) = if let Some(chunk) = decoded.chunk {
            if self.role == Role::Server {
                return Err(TransportError::InvalidMessage(
                    "Unsupported chunked request: requests may not be chunked".into(),
                ));
            }
            if chunk.id != 1 {
                return Err(TransportError::InvalidMessage(
                    "missing chunk ID: first received chunk was not chunk-id 1".into(),
                ));
            }
            let mut bytes = decoded.payload.to_vec();
            for expected_id in 2..=chunk.count {
                let Some(next) = conn.blpop(&key, timeout).await? else {
                    return Ok(ReceiveOutcome::Timeout);
                };
                let next_decoded = protocol::decode_envelope(&next)?;
                let Some(next_chunk) = next_decoded.chunk else {
                    return Err(TransportError::InvalidMessage(
                        "missing chunk headers on subsequent chunk".into(),
                    ));
                };
                if next_chunk.count != chunk.count {
                    return Err(TransportError::InvalidMessage(
                        "different chunk count between chunks of one message".into(),
                    ));
                }
                if next_chunk.id != expected_id {
                    return Err(TransportError::InvalidMessage(format!(
                        "incorrect chunk ID: expected {expected_id}, got {}",
                        next_chunk.id
                    )));
                }
                bytes.extend_from_slice(next_decoded.payload);
            }
            (decoded.serializer, decoded.protocol_version, bytes)
        } else {
            (decoded.serializer, decoded.protocol_version, decoded.payload.to_vec())
        };

        let serializer = serializer::for_kind(serializer_kind);
        let wire = serializer.decode(&payload)?;
        let WireMessage { request_id, mut meta, body } = wire;

        if let Some(expiry) = meta.get(EXPIRY_META_KEY).and_then(Value::as_f64) {
            if expiry < Self::now_secs() {
                tracing::debug!(queue = queue_name, request_id, "discarding expired message");
                return Ok(ReceiveOutcome::Timeout);
            }
        }

        meta.insert(
            PROTOCOL_VERSION_META_KEY.to_string(),
            Value::from(protocol_version.as_i64()),
        );
        meta.insert(
            SERIALIZER_META_KEY.to_string(),
            Value::from(serializer_kind.mime()),
        );

        Ok(ReceiveOutcome::Message { request_id, meta, body })
    }
}

