//! Typed configuration for backends and transport cores.
//!
//! This is the transport's own constructor surface, not the RPC framework's
//! dotted-path settings loader (that stays out of scope). Fields mirror the
//! recognized configuration options one-to-one; `from_env` is a convenience
//! for the common case of pointing at a Redis host list via environment
//! variables, the same `REDIS_URL`-from-env convenience a Redis-backed
//! constructor typically offers.

use crate::backend::{RedisBackend, SentinelBackend, StandardBackend};
use crate::error::Result;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

fn default_message_expiry() -> u64 {
    60
}

fn default_queue_capacity() -> u64 {
    10_000
}

fn default_queue_full_retries() -> u32 {
    10
}

fn default_receive_timeout() -> u64 {
    5
}

fn default_client_message_size_cap() -> usize {
    102_400
}

fn default_protocol_version() -> u8 {
    3
}

/// Shared options for both client and server transport cores.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_message_expiry")]
    pub message_expiry_in_seconds: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: u64,

    #[serde(default = "default_queue_full_retries")]
    pub queue_full_retries: u32,

    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_in_seconds: u64,

    #[serde(default = "default_client_message_size_cap")]
    pub maximum_message_size_in_bytes: usize,

    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,

    /// Server-only: payloads larger than this are split into chunks. Must
    /// be `>= 102_400` when set, and `maximum_message_size_in_bytes` must
    /// be at least 5x this value (checked at [`ServerTransport`] construction,
    /// see `crate::server`).
    #[serde(default)]
    pub chunk_messages_larger_than_bytes: Option<usize>,

    /// Advisory threshold below the hard cap: oversized messages are logged
    /// rather than rejected. Supplements `maximum_message_size_in_bytes`.
    #[serde(default)]
    pub log_messages_larger_than_bytes: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            message_expiry_in_seconds: default_message_expiry(),
            queue_capacity: default_queue_capacity(),
            queue_full_retries: default_queue_full_retries(),
            receive_timeout_in_seconds: default_receive_timeout(),
            maximum_message_size_in_bytes: default_client_message_size_cap(),
            protocol_version: default_protocol_version(),
            chunk_messages_larger_than_bytes: None,
            log_messages_larger_than_bytes: None,
        }
    }
}

impl TransportConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_in_seconds)
    }

    pub fn message_expiry(&self) -> Duration {
        Duration::from_secs(self.message_expiry_in_seconds)
    }
}

/// Which Redis topology a backend speaks to.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend_type", rename_all = "snake_case")]
pub enum BackendConfig {
    Standard {
        hosts: Vec<String>,
    },
    Sentinel {
        sentinel_hosts: Vec<String>,
        #[serde(default)]
        sentinel_services: Option<Vec<String>>,
        #[serde(default = "default_sentinel_failover_retries")]
        sentinel_failover_retries: u32,
        /// How often a cached master address is allowed to go stale before
        /// being re-queried against Sentinel. `None` means "every lookup."
        #[serde(default)]
        sentinel_refresh_interval: Option<Duration>,
    },
}

fn default_sentinel_failover_retries() -> u32 {
    2
}

impl BackendConfig {
    /// Connects the backend this config describes: an eager
    /// `StandardBackend::connect` for the static host-ring case, or a
    /// `SentinelBackend::new` discovery round for the HA case.
    pub async fn connect(self) -> Result<Arc<dyn RedisBackend>> {
        match self {
            BackendConfig::Standard { hosts } => Ok(Arc::new(StandardBackend::connect(&hosts).await?)),
            BackendConfig::Sentinel {
                sentinel_hosts,
                sentinel_services,
                sentinel_failover_retries,
                sentinel_refresh_interval,
            } => Ok(Arc::new(
                SentinelBackend::new(
                    sentinel_hosts,
                    sentinel_services,
                    sentinel_failover_retries,
                    sentinel_refresh_interval,
                )
                .await?,
            )),
        }
    }
}

impl TransportConfig {
    /// Builds a config from environment variables, falling back to defaults
    /// for anything unset. Recognizes `PYSOA_QUEUE_CAPACITY`,
    /// `PYSOA_QUEUE_FULL_RETRIES`, `PYSOA_RECEIVE_TIMEOUT_SECONDS`, and
    /// `PYSOA_MESSAGE_EXPIRY_SECONDS`.
    pub fn from_env() -> Self {
        let mut config = TransportConfig::default();
        if let Ok(v) = std::env::var("PYSOA_QUEUE_CAPACITY") {
            if let Ok(parsed) = v.parse() {
                config.queue_capacity = parsed;
            }
        }
        if let Ok(v) = std::env::var("PYSOA_QUEUE_FULL_RETRIES") {
            if let Ok(parsed) = v.parse() {
                config.queue_full_retries = parsed;
            }
        }
        if let Ok(v) = std::env::var("PYSOA_RECEIVE_TIMEOUT_SECONDS") {
            if let Ok(parsed) = v.parse() {
                config.receive_timeout_in_seconds = parsed;
            }
        }
        if let Ok(v) = std::env::var("PYSOA_MESSAGE_EXPIRY_SECONDS") {
            if let Ok(parsed) = v.parse() {
                config.message_expiry_in_seconds = parsed;
            }
        }
        config
    }
}
