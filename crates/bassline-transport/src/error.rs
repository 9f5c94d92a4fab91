//! Transport errors

use bassline_core::{NetworkError, PeerId};

/// Result alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures of signaling and peer channel backends
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Negotiation with {peer} failed: {reason}")]
    NegotiationFailed { peer: PeerId, reason: String },

    #[error("Channel to {peer} is closed")]
    ChannelClosed { peer: PeerId },

    #[error("Peer unavailable: {peer}")]
    PeerUnavailable { peer: PeerId },

    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Signaling connection closed")]
    SignalingClosed,
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(error: serde_json::Error) -> Self {
        TransportError::Serialization(error.to_string())
    }
}

impl From<TransportError> for NetworkError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::ChannelClosed { peer } | TransportError::PeerUnavailable { peer } => {
                NetworkError::PeerUnavailable { peer_id: peer }
            }
            TransportError::Serialization(message) => NetworkError::Serialization(message),
            other => NetworkError::Transport(other.to_string()),
        }
    }
}
