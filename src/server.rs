//! Server-side transport: reads from the service's shared inbound queue and
//! replies to whichever queue the request named in `reply_to`.

use crate::backend::RedisBackend;
use crate::config::TransportConfig;
use crate::core::{ReceiveOutcome, RedisTransportCore};
use crate::error::{Result, TransportError};
use crate::queue::service_queue;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Server-side transport for one service. One instance per server process;
/// a worker loop drives it with plain async calls rather than owning an OS
/// thread itself.
pub struct ServerTransport {
    service_name: String,
    core: RedisTransportCore,
}

impl ServerTransport {
    /// Builds a server transport. `config.chunk_messages_larger_than_bytes`,
    /// if set, must be `>= 102_400`, and `maximum_message_size_in_bytes` must
    /// be at least 5x the chunk threshold.
    pub fn new(service_name: impl Into<String>, backend: Arc<dyn RedisBackend>, config: TransportConfig) -> Result<Self> {
        Ok(ServerTransport {
            service_name: service_name.into(),
            core: RedisTransportCore::new_server(backend, config)?,
        })
    }

    /// Reads the next request from the service's shared inbound queue. The
    /// returned `meta` is guaranteed by well-behaved clients to contain
    /// `reply_to`, but that is the client's contract, not something this
    /// call itself enforces.
    pub async fn receive_request_message(&self, timeout: Option<Duration>) -> Result<ReceiveOutcome> {
        self.core
            .receive_message(&service_queue(&self.service_name), timeout)
            .await
    }

    /// Sends a response to the queue named by `meta.reply_to`, chunking if
    /// the encoded reply exceeds the configured threshold. Echoes the
    /// protocol version negotiated on the original request since `meta` is
    /// expected to still carry it from `receive_request_message`.
    pub async fn send_response_message(&self, request_id: i64, meta: Map<String, Value>, body: Value) -> Result<()> {
        let reply_to = meta
            .get("reply_to")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::InvalidMessage("response meta is missing reply_to".into()))?
            .to_string();

        self.core.send_message(&reply_to, request_id, meta, body, None).await
    }
}
