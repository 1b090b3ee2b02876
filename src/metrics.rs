//! Lightweight counters and timers for the send/receive paths.
//!
//! No metrics-crate dependency is introduced here: counters are plain
//! atomics keyed by name in a [`DashMap`], the same concurrent-map idiom
//! this crate already reaches for in the Sentinel master cache, and timers
//! are logged as `tracing` events with a duration field rather than pushed
//! to an external recorder. A binary embedding this crate can subscribe to
//! `tracing` the same way it already does for request logs.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counter and timer sink for one transport instance.
#[derive(Debug, Default)]
pub struct Metrics {
    counters: DashMap<String, AtomicU64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the named counter by one, creating it at zero if absent.
    pub fn incr(&self, name: &str) {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Current value of a named counter (0 if never incremented).
    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Measures a closure's wall time and logs it as a `tracing` debug event
/// under `name`, using structured fields instead of string interpolation.
pub fn timed<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let result = f();
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    tracing::debug!(timer = name, elapsed_ms, "timer");
    result
}

/// `async` counterpart to [`timed`] for the connection-acquisition and
/// send-to-Redis steps, which are themselves futures.
pub async fn timed_async<T>(name: &'static str, fut: impl std::future::Future<Output = T>) -> T {
    let start = Instant::now();
    let result = fut.await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    tracing::debug!(timer = name, elapsed_ms, "timer");
    result
}
