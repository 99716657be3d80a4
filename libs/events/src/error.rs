//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when encoding or decoding events.
#[derive(Debug, Error)]
pub enum EventError {
    /// Failed to serialize an event.
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The event kind string is not recognised.
    #[error("unknown event kind: {0}")]
    UnknownKind(String),
}
