use super::{backoff_duration, QueueConnection, RedisBackend, RedisConnection};
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// One cached master connection plus when it was last resolved, so a
/// `sentinel_refresh_interval` can force a re-query even when the cached
/// connection hasn't failed outright.
struct CachedMaster {
    connection: Arc<dyn QueueConnection>,
    resolved_at: Instant,
}

/// True if a master resolved at `resolved_at` is still usable given
/// `refresh_interval`. `None` means "reuse until it fails outright."
fn is_cache_fresh(resolved_at: Instant, refresh_interval: Option<Duration>) -> bool {
    refresh_interval.is_none_or(|interval| resolved_at.elapsed() < interval)
}

/// The Sentinel protocol calls `SentinelBackend` needs: discovering the set
/// of monitored masters and resolving one by name. Split out from
/// `SentinelBackend` itself so tests can drive the failover-retry and
/// cache-reset logic against a scripted fake instead of a live Sentinel
/// deployment, the same seam `QueueConnection` gives the Standard backend.
#[async_trait]
trait SentinelClient: Send + Sync {
    async fn discover_services(&self) -> Result<Vec<String>>;
    async fn resolve_master(&self, service: &str) -> Result<Arc<dyn QueueConnection>>;
}

struct RealSentinelClient {
    sentinel_urls: Vec<String>,
}

#[async_trait]
impl SentinelClient for RealSentinelClient {
    async fn discover_services(&self) -> Result<Vec<String>> {
        for host in &self.sentinel_urls {
            let Ok(client) = redis::Client::open(host.as_str()) else {
                continue;
            };
            let Ok(mut conn) = client.get_multiplexed_async_connection().await else {
                continue;
            };
            let reply: redis::RedisResult<Vec<HashMap<String, String>>> = redis::cmd("SENTINEL")
                .arg("MASTERS")
                .query_async(&mut conn)
                .await;
            if let Ok(masters) = reply {
                let names: Vec<String> = masters
                    .into_iter()
                    .filter_map(|entry| entry.get("name").cloned())
                    .collect();
                if !names.is_empty() {
                    return Ok(names);
                }
            }
        }
        Err(TransportError::CannotGetConnection(
            "no sentinel host answered SENTINEL MASTERS".into(),
        ))
    }

    async fn resolve_master(&self, service: &str) -> Result<Arc<dyn QueueConnection>> {
        for host in &self.sentinel_urls {
            let Ok(client) = redis::Client::open(host.as_str()) else {
                continue;
            };
            let Ok(mut conn) = client.get_multiplexed_async_connection().await else {
                continue;
            };
            let addr: redis::RedisResult<(String, u16)> = redis::cmd("SENTINEL")
                .arg("get-master-addr-by-name")
                .arg(service)
                .query_async(&mut conn)
                .await;
            let Ok((master_host, master_port)) = addr else {
                continue;
            };
            let url = format!("redis://{master_host}:{master_port}");
            let Ok(master_client) = redis::Client::open(url.as_str()) else {
                continue;
            };
            if let Ok(manager) = ConnectionManager::new(master_client).await {
                return Ok(Arc::new(RedisConnection::new(manager)));
            }
        }
        Err(TransportError::CannotGetConnection(format!(
            "MasterNotFound for service {service}"
        )))
    }
}

/// Backend over a Sentinel-managed HA cluster with master failover.
///
/// Master connections are cached per service name behind an [`RwLock`]; a
/// `MasterNotFound` resets the entire cache (not just the failing entry) and
/// the lookup is retried with the shared `(2^i + rand()) / 4.0` backoff,
/// matching the capacity-retry loop in [`crate::core::RedisTransportCore::send_message`].
pub struct SentinelBackend {
    client: Box<dyn SentinelClient>,
    services: Vec<String>,
    failover_retries: u32,
    /// How long a cached master may be reused before it's treated as stale
    /// and re-resolved against Sentinel. `None` means a cached entry is
    /// reused until it fails outright.
    refresh_interval: Option<Duration>,
    masters: RwLock<HashMap<String, CachedMaster>>,
}

impl SentinelBackend {
    /// Connects to a Sentinel cluster. If `services` is `None`, the set of
    /// monitored masters is discovered by polling every Sentinel host with
    /// `SENTINEL MASTERS` until one answers.
    pub async fn new(
        sentinel_hosts: Vec<String>,
        services: Option<Vec<String>>,
        failover_retries: u32,
        refresh_interval: Option<Duration>,
    ) -> Result<Self> {
        if sentinel_hosts.is_empty() {
            return Err(TransportError::Configuration(
                "sentinel backend requires at least one sentinel host".into(),
            ));
        }
        let client = RealSentinelClient { sentinel_urls: sentinel_hosts };
        Self::with_client(Box::new(client), services, failover_retries, refresh_interval).await
    }

    async fn with_client(
        client: Box<dyn SentinelClient>,
        services: Option<Vec<String>>,
        failover_retries: u32,
        refresh_interval: Option<Duration>,
    ) -> Result<Self> {
        let services = match services {
            Some(s) if !s.is_empty() => s,
            _ => client.discover_services().await?,
        };
        Ok(SentinelBackend {
            client,
            services,
            failover_retries,
            refresh_interval,
            masters: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl RedisBackend for SentinelBackend {
    fn ring_size(&self) -> usize {
        self.services.len()
    }

    async fn connection_for_index(&self, index: usize) -> Result<Arc<dyn QueueConnection>> {
        let service = self
            .services
            .get(index)
            .ok_or_else(|| TransportError::CannotGetConnection(format!("shard index {index} out of range")))?;

        if let Some(cached) = self.masters.read().await.get(service) {
            if is_cache_fresh(cached.resolved_at, self.refresh_interval) {
                return Ok(cached.connection.clone());
            }
        }

        let mut last_error = None;
        for attempt in 0..=self.failover_retries {
            match self.client.resolve_master(service).await {
                Ok(conn) => {
                    self.masters.write().await.insert(
                        service.clone(),
                        CachedMaster { connection: conn.clone(), resolved_at: Instant::now() },
                    );
                    return Ok(conn);
                }
                Err(e) => {
                    tracing::warn!(service, attempt, "MasterNotFound; resetting master cache");
                    self.masters.write().await.clear();
                    last_error = Some(e);
                    if attempt < self.failover_retries {
                        tokio::time::sleep(backoff_duration(attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::CannotGetConnection(format!("MasterNotFound for service {service}"))
        }))
    }
}
