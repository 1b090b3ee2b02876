//! Transport error kinds.
//!
//! Mirrors the error taxonomy a caller needs to react correctly: some kinds
//! are programmer bugs that should surface immediately, others are transient
//! and left to the caller's retry policy. [`ReceiveOutcome`] is deliberately
//! *not* an error variant here — a receive timeout (including a discarded
//! expired message) is expected, routine control flow for a polling server
//! loop, not a failure.

use thiserror::Error;

/// Errors raised by the transport's send and receive paths.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The message was malformed in a way unrelated to serialization: a null
    /// `request_id`, a response send missing `reply_to`, a chunked request,
    /// or malformed chunk headers. Indicates a caller bug; do not retry.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The message (or, for servers, even its largest possible chunk split)
    /// exceeds `maximum_message_size_in_bytes`.
    #[error("message too large: {0}")]
    MessageTooLarge(String),

    /// Sending failed: queue full after exhausting retries, an unexpected
    /// Redis response, or a connection error during send.
    #[error("failed to send message: {0}")]
    SendError(String),

    /// Receiving failed due to a connection error (distinct from a timeout).
    #[error("failed to receive message: {0}")]
    ReceiveError(String),

    /// Sentinel failover retries were exhausted, or a backend ring index was
    /// out of range.
    #[error("cannot get connection: {0}")]
    CannotGetConnection(String),

    /// A backend was misconfigured (bad ring size, malformed host list, etc).
    #[error("invalid backend configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
