use thiserror::Error;

use crate::utils::NodeId;

/// Setup problems. Fatal at the point of use and never retried.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Private key not loaded for {0}")]
    MissingPrivateKey(NodeId),

    #[error("No public key loaded for {0}")]
    UnknownSigner(NodeId),

    #[error("Public key for {0} does not match its private key")]
    KeyMismatch(NodeId),

    #[error("Required threshold must be > 0")]
    InvalidThreshold,

    #[error("Invalid key material in {path}: {reason}")]
    InvalidKey { path: String, reason: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Outcomes of waiting on a quorum round other than agreement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuorumError {
    #[error("Timed out waiting for consensus on {0}")]
    Timeout(String),

    #[error("Consensus cancelled for {0}")]
    Cancelled(String),

    #[error("await_consensus called before start_tracking for {0}")]
    NotTracked(String),
}

/// Transport, channel and pool failures. Surfaced as-is; no retries here.
#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("Peer {0} not found")]
    PeerNotFound(NodeId),

    #[error("Deadline exceeded waiting for {0}")]
    DeadlineExceeded(NodeId),

    #[error("Failed to send message to peer {0}")]
    SendError(NodeId),

    #[error("{0} pool is closed")]
    PoolClosed(&'static str),

    #[error("Task in {0} pool failed: {1}")]
    TaskFailed(&'static str, String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

#[derive(Debug, Error)]
pub enum ReplixError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Quorum error: {0}")]
    Quorum(#[from] QuorumError),

    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] InfrastructureError),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReplixError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ReplixError::Quorum(QuorumError::Timeout(_))
                | ReplixError::Infrastructure(InfrastructureError::DeadlineExceeded(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_and_cancel_are_distinct() {
        let timeout: ReplixError = QuorumError::Timeout("C1:1".into()).into();
        let cancelled: ReplixError = QuorumError::Cancelled("C1:1".into()).into();

        assert!(timeout.is_timeout());
        assert!(!cancelled.is_timeout());
        assert_eq!(cancelled.to_string(), "Quorum error: Consensus cancelled for C1:1");
    }

    #[test]
    fn test_unknown_signer_message() {
        let err = ConfigurationError::UnknownSigner(NodeId::from("n9"));
        assert_eq!(err.to_string(), "No public key loaded for n9");
    }
}
