use super::{QueueConnection, RedisBackend, RedisConnection};
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::Arc;

/// Backend over a static list of standalone Redis masters.
///
/// Connections are constructed eagerly from the host list at `connect()`
/// time rather than lazily dialing on first use.
pub struct StandardBackend {
    connections: Vec<Arc<dyn QueueConnection>>,
}

impl StandardBackend {
    /// Connects to every host in `hosts` (Redis URLs, e.g.
    /// `redis://127.0.0.1:6379/0`). A caller passing a single bare string
    /// instead of a list would have it silently iterate as characters in the
    /// original Python transport; that footgun doesn't exist in a typed
    /// `Vec<String>` parameter, but a one-element host list is still worth
    /// flagging since it is almost always a misconfiguration rather than an
    /// intentional single-shard deployment.
    pub async fn connect(hosts: &[String]) -> Result<Self> {
        if hosts.is_empty() {
            return Err(TransportError::Configuration(
                "standard backend requires at least one host".into(),
            ));
        }
        if hosts.len() == 1 {
            tracing::warn!(
                host = %hosts[0],
                "standard backend configured with a single host; confirm this isn't a \
                 stringly-typed host list that was meant to contain more than one shard"
            );
        }

        let mut connections: Vec<Arc<dyn QueueConnection>> = Vec::with_capacity(hosts.len());
        for host in hosts {
            let client = redis::Client::open(host.as_str()).map_err(|e| {
                TransportError::CannotGetConnection(format!("invalid redis URL {host}: {e}"))
            })?;
            let manager: ConnectionManager = ConnectionManager::new(client).await.map_err(|e| {
                TransportError::CannotGetConnection(format!("connecting to {host}: {e}"))
            })?;
            connections.push(Arc::new(RedisConnection::new(manager)));
        }

        Ok(StandardBackend { connections })
    }
}

#[async_trait]
impl RedisBackend for StandardBackend {
    fn ring_size(&self) -> usize {
        self.connections.len()
    }

    async fn connection_for_index(&self, index: usize) -> Result<Arc<dyn QueueConnection>> {
        self.connections
            .get(index)
            .cloned()
            .ok_or_else(|| TransportError::CannotGetConnection(format!("shard index {index} out of range")))
    }
}
