//! In-memory fake `RedisBackend` for deterministic, server-less tests of
//! retry, chunking, expiry, and thread-safety — the Rust analogue of the
//! original transport's `_FakeBackend`/`mockredis` test doubles.

use async_trait::async_trait;
use redis_gateway_transport::backend::{QueueConnection, RedisBackend};
use redis_gateway_transport::error::{Result, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct ShardState {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    /// Number of successful pushes per queue key, so tests can assert
    /// "exactly N `RPUSH`es happened" the way scenario 5 requires, without
    /// a real Redis to `LLEN`/`MONITOR` against.
    push_counts: HashMap<String, u64>,
}

#[derive(Default)]
struct Queues(Mutex<ShardState>);

/// One shard's worth of in-process FIFO queues, shared by every
/// `FakeConnection` handed out for that shard.
pub struct FakeConnection {
    queues: Arc<Queues>,
}

#[async_trait]
impl QueueConnection for FakeConnection {
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self
                .queues
                .0
                .lock()
                .expect("queue lock poisoned")
                .queues
                .get_mut(key)
                .and_then(VecDeque::pop_front)
            {
                return Ok(Some(item));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    async fn send_to_queue(&self, key: &str, message: &[u8], _expiry_seconds: u64, capacity: u64) -> Result<()> {
        let mut state = self.queues.0.lock().expect("queue lock poisoned");
        let len = state.queues.entry(key.to_string()).or_default().len();
        if len as u64 >= capacity {
            return Err(TransportError::SendError(format!("queue {key} was full")));
        }
        state.queues.get_mut(key).expect("just inserted").push_back(message.to_vec());
        *state.push_counts.entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

/// A `RedisBackend` over `shard_count` independent in-memory shards, routed
/// by the same consistent-hash / round-robin rule as a real backend.
pub struct FakeBackend {
    shards: Vec<Arc<Queues>>,
}

impl FakeBackend {
    pub fn new(shard_count: usize) -> Self {
        FakeBackend {
            shards: (0..shard_count.max(1)).map(|_| Arc::new(Queues::default())).collect(),
        }
    }

    pub fn single_shard() -> Self {
        Self::new(1)
    }

    /// Number of successful pushes observed for `queue_key` across shard 0
    /// (sufficient for the single-shard tests that use this).
    pub fn push_count(&self, queue_key: &str) -> u64 {
        self.shards[0]
            .0
            .lock()
            .expect("queue lock poisoned")
            .push_counts
            .get(queue_key)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RedisBackend for FakeBackend {
    fn ring_size(&self) -> usize {
        self.shards.len()
    }

    async fn connection_for_index(&self, index: usize) -> Result<Arc<dyn QueueConnection>> {
        let queues = self
            .shards
            .get(index)
            .cloned()
            .ok_or_else(|| TransportError::CannotGetConnection(format!("shard index {index} out of range")))?;
        Ok(Arc::new(FakeConnection { queues }))
    }
}
