//! Network error types and transport-error classification.

use thiserror::Error;

/// Network errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed by the remote end.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Handshake failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Invalid message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Message too large.
    #[error("Message too large: {size} bytes, max {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Too many peers.
    #[error("Too many peers: {count}, max {max}")]
    TooManyPeers { count: usize, max: usize },

    /// Remote client rejected by the client-id filter.
    #[error("Client filtered: {0}")]
    ClientFiltered(String),

    /// Peers disagree on the network id.
    #[error("NetworkId mismatch: local {local}, remote {remote}")]
    NetworkIdMismatch { local: u64, remote: u64 },

    /// Peers disagree on the genesis block.
    #[error("Genesis block mismatch")]
    GenesisMismatch,

    /// Timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The server is not in a state that allows the operation.
    #[error("Invalid server state: {0}")]
    InvalidState(String),

    /// Key material is unusable.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Consensus-layer failure while preparing network state.
    #[error("Consensus error: {0}")]
    Consensus(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Transport-error messages that are expected churn and never surfaced.
///
/// Built once as data; matching is a substring test against the rendered
/// error message.
pub const IGNORED_ERRORS: &[&str] = &[
    "EPIPE",
    "ECONNRESET",
    "ETIMEDOUT",
    "NetworkId mismatch",
    "Timeout error: ping",
    "Genesis block mismatch",
    "Handshake timed out",
    "Invalid address buffer",
    "Invalid MAC",
    "Invalid timestamp buffer",
    "Hash verification failed",
];

/// Whether a transport error is dropped rather than surfaced.
pub fn is_ignored_error(message: &str) -> bool {
    IGNORED_ERRORS.iter().any(|probe| message.contains(probe))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignored_classification() {
        assert!(is_ignored_error("read failed: ECONNRESET by peer"));
        assert!(is_ignored_error("Handshake timed out"));
        assert!(is_ignored_error(
            "Handshake failed: NetworkId mismatch: local 1, remote 5"
        ));
        assert!(is_ignored_error("Hash verification failed"));

        assert!(!is_ignored_error("unexpected"));
        assert!(!is_ignored_error("Client filtered: geth/v1.10"));
    }

    #[test]
    fn test_error_messages_hit_the_ignore_list() {
        let err = NetworkError::NetworkIdMismatch {
            local: 1,
            remote: 5,
        };
        assert!(is_ignored_error(&err.to_string()));

        let err = NetworkError::GenesisMismatch;
        assert!(is_ignored_error(&err.to_string()));

        let err = NetworkError::Timeout("Handshake timed out".to_string());
        assert!(is_ignored_error(&err.to_string()));
    }
}
