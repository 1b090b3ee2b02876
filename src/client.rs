//! Client-side transport: owns the per-process client id and per-thread
//! reply queue, and tracks outstanding requests so a client idle of pending
//! requests can skip the receive call entirely.

use crate::backend::RedisBackend;
use crate::config::TransportConfig;
use crate::core::{ReceiveOutcome, RedisTransportCore};
use crate::error::Result;
use crate::queue::{reply_queue, service_queue};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static THREAD_COUNTER: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Short hex id assigned once per OS thread the first time it touches a
    /// `ClientTransport`, realizing the "explicit instance state plus a
    /// thread-local table" design called for in place of the original's
    /// thread-local context object.
    static THREAD_ID: String = format!("{:x}", THREAD_COUNTER.fetch_add(1, Ordering::Relaxed));
}

fn current_thread_id() -> String {
    THREAD_ID.with(std::clone::Clone::clone)
}

/// Outcome of [`ClientTransport::receive_response_message`].
#[derive(Debug)]
pub enum ClientReceiveOutcome {
    Message {
        request_id: i64,
        meta: Map<String, Value>,
        body: Value,
    },
    Timeout,
    /// No requests are outstanding; the caller has nothing left to wait for.
    NoMoreExpected,
}

/// Client-side transport for one service, shared across threads of one
/// client process.
pub struct ClientTransport {
    service_name: String,
    client_id: String,
    outstanding: AtomicI64,
    core: RedisTransportCore,
}

impl ClientTransport {
    pub fn new(service_name: impl Into<String>, backend: Arc<dyn RedisBackend>, config: TransportConfig) -> Self {
        ClientTransport {
            service_name: service_name.into(),
            client_id: uuid::Uuid::new_v4().simple().to_string(),
            outstanding: AtomicI64::new(0),
            core: RedisTransportCore::new_client(backend, config),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Reply queue name for the *calling* thread.
    pub fn reply_queue_name(&self) -> String {
        reply_queue(&self.service_name, &self.client_id, &current_thread_id())
    }

    pub fn requests_outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Stamps `meta.reply_to` for the calling thread, then sends to the
    /// service's shared inbound queue.
    pub async fn send_request_message(
        &self,
        request_id: i64,
        mut meta: Map<String, Value>,
        body: Value,
        expiry: Option<Duration>,
    ) -> Result<()> {
        meta.insert("reply_to".to_string(), Value::from(self.reply_queue_name()));
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        self.core
            .send_message(&service_queue(&self.service_name), request_id, meta, body, expiry)
            .await
    }

    /// Receives a response from the calling thread's reply queue. Returns
    /// [`ClientReceiveOutcome::NoMoreExpected`] without touching Redis if no
    /// request from this thread is outstanding.
    pub async fn receive_response_message(&self, timeout: Option<Duration>) -> Result<ClientReceiveOutcome> {
        if self.outstanding.load(Ordering::Relaxed) <= 0 {
            return Ok(ClientReceiveOutcome::NoMoreExpected);
        }

        match self.core.receive_message(&self.reply_queue_name(), timeout).await? {
            ReceiveOutcome::Message { request_id, meta, body } => {
                self.outstanding.fetch_sub(1, Ordering::Relaxed);
                Ok(ClientReceiveOutcome::Message { request_id, meta, body })
            }
            ReceiveOutcome::Timeout => Ok(ClientReceiveOutcome::Timeout),
        }
    }
}
