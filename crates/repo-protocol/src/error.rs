//! Error types for the wire codecs.

use thiserror::Error;

/// Result type for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Malformed or unexpected wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bad multipart framing: {0}")]
    Multipart(String),

    #[error("bad HTTP framing: {0}")]
    HttpFraming(String),

    #[error("missing required {0}")]
    Missing(String),

    #[error("invalid header value for {name}: {value}")]
    InvalidHeader { name: String, value: String },

    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
