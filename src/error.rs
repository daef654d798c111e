//! Client-facing error taxonomy.

use std::io;
use std::time::Duration;

use repo_protocol::ProtocolError;

use crate::client::transport::TransportError;

/// Result type for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors surfaced by the repository client
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// A required parameter was missing or empty; no request was sent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The repository answered 404 for an artifact addressed by identity.
    #[error("No such artifact: {namespace}/{uuid}")]
    NoSuchArtifact { namespace: String, uuid: String },

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Malformed or unexpected response from the repository.
    #[error("Repository protocol error: {0}")]
    Protocol(String),

    #[error("Repository transport error: {0}")]
    Transport(#[from] TransportError),

    /// Any other non-2xx answer.
    #[error("Repository error {status}: {message}")]
    Remote { status: u16, message: String },

    /// The paging consumer waited longer than the queue timeout.
    #[error("Timed out after {0:?} waiting for the next page")]
    IteratorTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RepoError {
    pub fn invalid(what: impl Into<String>) -> Self {
        RepoError::InvalidArgument(what.into())
    }

    /// Whether this error reports a missing artifact.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NoSuchArtifact { .. })
    }
}

impl From<ProtocolError> for RepoError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => RepoError::Io(e),
            other => RepoError::Protocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            RepoError::Io(err.into())
        } else {
            RepoError::Protocol(format!("JSON decode error: {err}"))
        }
    }
}

/// Reject an empty required string parameter.
pub(crate) fn require(value: &str, name: &str) -> RepoResult<()> {
    if value.trim().is_empty() {
        return Err(RepoError::InvalidArgument(format!("{name} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_rejects_blank() {
        assert!(require("ns1", "namespace").is_ok());
        let err = require("  ", "namespace").unwrap_err();
        assert!(matches!(err, RepoError::InvalidArgument(ref m) if m == "namespace is required"));
    }

    #[test]
    fn test_protocol_errors_map_to_protocol_variant() {
        let err: RepoError = ProtocolError::Missing("artifactProps part".to_string()).into();
        assert!(matches!(err, RepoError::Protocol(_)));

        let err: RepoError = serde_json::from_str::<u32>("{").unwrap_err().into();
        assert!(matches!(err, RepoError::Protocol(_)));
    }
}
