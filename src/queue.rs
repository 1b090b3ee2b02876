//! Queue name construction and classification.
//!
//! Every Redis key this crate touches is a queue name prefixed with
//! `pysoa:`. That literal is part of the wire contract (servers and clients
//! from different processes must agree on the same Redis keys), not an
//! artifact of naming history, so it stays a constant rather than something
//! callers configure away.

/// Redis key prefix applied to every queue name.
pub const KEY_PREFIX: &str = "pysoa:";

/// Marker that distinguishes a response (reply) queue from a request queue.
pub const RESPONSE_QUEUE_MARKER: char = '!';

/// Builds the shared inbound queue name for a service.
pub fn service_queue(service_name: &str) -> String {
    format!("service.{service_name}")
}

/// Builds a per-client, per-thread reply queue name.
///
/// The trailing `!thread_id` both marks this as a response queue (see
/// [`is_response_queue`]) and guarantees that replies for one calling thread
/// never land in another thread's queue.
pub fn reply_queue(service_name: &str, client_id: &str, thread_id: &str) -> String {
    format!("service.{service_name}.{client_id}!{thread_id}")
}

/// True if `queue_name` is a response (reply) queue.
pub fn is_response_queue(queue_name: &str) -> bool {
    queue_name.contains(RESPONSE_QUEUE_MARKER)
}

/// Prefixes a queue name with the Redis key namespace.
pub fn redis_key(queue_name: &str) -> String {
    format!("{KEY_PREFIX}{queue_name}")
}
