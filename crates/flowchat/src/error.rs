//! Error taxonomy for chat node execution.

use thiserror::Error;

/// Errors surfaced by the executor, the response adapters and the detail
/// projection. Every variant propagates to the caller.
#[derive(Debug, Error)]
pub enum ChatNodeError {
    /// The model id is unknown, the node params are invalid, or an input
    /// file could not be read. No context is written.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The model client's invoke/stream call failed. No context is written.
    #[error("provider error: {0}")]
    Provider(String),

    /// The chunk stream failed after `forwarded` chunks had already been
    /// handed out. Those stay forwarded; the context commit is skipped.
    #[error("stream interrupted after {forwarded} chunk(s): {reason}")]
    SequenceConsumption { forwarded: usize, reason: String },

    /// Node context was read before it was committed. This is a caller bug.
    #[error("node context read before commit: {0}")]
    OrderingViolation(String),

    /// The response sink could not accept a fragment.
    #[error("failed to deliver response: {0}")]
    Delivery(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
