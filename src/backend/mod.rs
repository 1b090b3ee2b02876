//! Backend client: "which Redis connection should this queue key use?"
//!
//! Both topologies share the same ring-routing rule and the same
//! capacity-enforcing script; only connection acquisition differs, which is
//! why this module defines the shared behavior as free functions over a
//! trait object rather than duplicating it per variant.
//!
//! [`QueueConnection`] is the seam that lets `core`/`client`/`server` run
//! against an in-memory fake in tests instead of a live Redis server: a real
//! [`RedisBackend`] hands back a connection wrapping `redis`'s
//! `ConnectionManager`, a test double hands back one backed by a plain
//! in-process queue.

mod sentinel;
mod standard;

pub use sentinel::SentinelBackend;
pub use standard::StandardBackend;

use crate::error::{Result, TransportError};
use crate::queue::is_response_queue;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

/// Number of consistent-hash buckets the response-queue ring is divided
/// into, matching the original's `& 0xfff`.
const HASH_BUCKETS: u32 = 4096;

/// One shard's connection, abstracted over the underlying Redis driver so
/// the send/receive paths in `core` can run against a fake in tests.
#[async_trait]
pub trait QueueConnection: Send + Sync {
    /// Blocking left-pop with a timeout; `Ok(None)` means the timeout
    /// elapsed with nothing to pop.
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Invokes the capacity-enforcing script: pushes `message` onto `key` if
    /// `LLEN(key) < capacity`, then refreshes the key's expiry. Returns a
    /// [`TransportError::SendError`] with `"was full"` in the message when
    /// at capacity.
    async fn send_to_queue(&self, key: &str, message: &[u8], expiry_seconds: u64, capacity: u64) -> Result<()>;
}

/// Abstracts over the Standard and Sentinel backend variants behind the
/// single connection-selection interface both the send and receive paths
/// depend on.
#[async_trait]
pub trait RedisBackend: Send + Sync {
    /// Number of shards (`N`) in this backend's ring. Must be `>= 1`.
    fn ring_size(&self) -> usize;

    /// Resolves a connection for shard `index`, `0 <= index < ring_size()`.
    async fn connection_for_index(&self, index: usize) -> Result<Arc<dyn QueueConnection>>;
}

/// Round-robin cursor shared by backend implementations for inbound
/// (non-response) queue routing.
#[derive(Debug, Default)]
pub struct RoundRobinCursor(AtomicUsize);

impl RoundRobinCursor {
    pub fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// Returns the next index in `[0, ring_size)`, advancing the cursor.
    pub fn next(&self, ring_size: usize) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed) % ring_size.max(1)
    }
}

/// Maps a response-queue key onto a stable shard index via CRC32 consistent
/// hashing into [`HASH_BUCKETS`] buckets, evenly divided across the ring.
pub fn consistent_hash_index(queue_key: &str, ring_size: usize) -> Result<usize> {
    if ring_size == 0 {
        return Err(TransportError::Configuration("ring_size must be >= 1".into()));
    }
    let bucket = crc32fast::hash(queue_key.as_bytes()) & (HASH_BUCKETS - 1);
    let buckets_per_shard = HASH_BUCKETS / ring_size as u32;
    let index = bucket / buckets_per_shard.max(1);
    Ok((index as usize).min(ring_size - 1))
}

/// Resolves the connection a `queue_key` should use: consistent-hashed if
/// it's a response queue (so every reply for one reply queue lands on the
/// same shard), otherwise the next round-robin shard.
pub async fn get_connection(
    backend: &dyn RedisBackend,
    cursor: &RoundRobinCursor,
    queue_key: &str,
) -> Result<Arc<dyn QueueConnection>> {
    let ring_size = backend.ring_size();
    if ring_size == 0 {
        return Err(TransportError::Configuration("ring_size must be >= 1".into()));
    }
    let index = if is_response_queue(queue_key) {
        consistent_hash_index(queue_key, ring_size)?
    } else {
        cursor.next(ring_size)
    };
    backend.connection_for_index(index).await
}

fn capacity_script() -> &'static redis::Script {
    static SCRIPT: OnceLock<redis::Script> = OnceLock::new();
    SCRIPT.get_or_init(|| {
        redis::Script::new(
            r#"
if redis.call('llen', KEYS[1]) >= tonumber(ARGV[2]) then
    return redis.error_reply('queue full')
end
redis.call('rpush', KEYS[1], ARGV[3])
redis.call('expire', KEYS[1], ARGV[1])
return 1
"#,
        )
    })
}

/// A [`QueueConnection`] backed by a real `redis::aio::ConnectionManager`.
///
/// `ConnectionManager` is itself a cheap `Clone` over a shared multiplexed
/// connection, so wrapping it behind a `&self` trait method (instead of
/// `&mut self`) just means cloning the handle before issuing a command —
/// the same pattern used elsewhere in this crate to share one manager
/// across concurrent callers.
pub struct RedisConnection(redis::aio::ConnectionManager);

impl RedisConnection {
    pub fn new(manager: redis::aio::ConnectionManager) -> Self {
        RedisConnection(manager)
    }
}

#[async_trait]
impl QueueConnection for RedisConnection {
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        use redis::AsyncCommands;
        let mut conn = self.0.clone();
        let reply: Option<(String, Vec<u8>)> = conn
            .blpop(key, timeout.as_secs_f64())
            .await
            .map_err(|e| TransportError::ReceiveError(format!("blpop on {key}: {e}")))?;
        Ok(reply.map(|(_, bytes)| bytes))
    }

    async fn send_to_queue(&self, key: &str, message: &[u8], expiry_seconds: u64, capacity: u64) -> Result<()> {
        let mut conn = self.0.clone();
        let result: redis::RedisResult<i64> = capacity_script()
            .key(key)
            .arg(expiry_seconds)
            .arg(capacity)
            .arg(message)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("queue full") => {
                Err(TransportError::SendError(format!("queue {key} was full")))
            }
            Err(e) => Err(TransportError::SendError(format!(
                "unexpected Redis response sending to {key}: {e}"
            ))),
        }
    }
}

/// Bounded exponential backoff with jitter: `(2^attempt + rand()) / 4.0`
/// seconds, shared by the queue-full retry loop and Sentinel failover.
pub fn backoff_duration(attempt: u32) -> Duration {
    let jitter: f64 = rand::random();
    let seconds = (2f64.powi(attempt as i32) + jitter) / 4.0;
    Duration::from_secs_f64(seconds)
}
