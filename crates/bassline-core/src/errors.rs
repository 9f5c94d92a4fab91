//! Error taxonomy surfaced by the replication network
//!
//! Every failure a caller of the network facade can observe is a
//! [`NetworkError`]. RPC failures travel between peers as plain strings; the
//! well-known strings are mapped back to typed variants on receipt by
//! [`NetworkError::from_wire`].

use crate::identifiers::{ContactId, GroupId, PeerId, RequestId};
use serde::{Deserialize, Serialize};

const HOST_ONLY_MESSAGE: &str = "Only host can handle requests";
const UNKNOWN_METHOD_PREFIX: &str = "Unknown method: ";
const CONTACT_NOT_FOUND_PREFIX: &str = "Contact not found: ";
const GROUP_NOT_FOUND_PREFIX: &str = "Group not found: ";
const CONTACT_EXISTS_PREFIX: &str = "Contact already exists: ";

/// Result alias used across the network layers
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Network operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum NetworkError {
    /// The rendezvous server did not acknowledge in time
    #[error("Signaling server did not acknowledge {operation} within {timeout_ms}ms")]
    SignalingTimeout {
        /// Signaling operation that timed out
        operation: String,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },
    /// The rendezvous server rejected a join
    #[error("Room not found: {room_code}")]
    RoomNotFound {
        /// Room that was requested
        room_code: String,
    },
    /// Send to a disconnected or unknown peer
    #[error("Peer unavailable: {peer_id}")]
    PeerUnavailable {
        /// Peer that cannot be reached
        peer_id: PeerId,
    },
    /// A request received no response before its deadline
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Correlation id of the request
        request_id: RequestId,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },
    /// A non-host peer was asked to service a request
    #[error("Only host can handle requests")]
    HostOnlyOperation,
    /// RPC method not recognized by the host
    #[error("Unknown method: {method}")]
    UnknownMethod {
        /// Method name as received
        method: String,
    },
    /// A guest attempted a mutation with no live host peer
    #[error("Not connected to host")]
    NotConnectedToHost,
    /// Mutation referenced a contact that does not exist
    #[error("Contact not found: {contact_id}")]
    ContactNotFound {
        /// Missing contact
        contact_id: ContactId,
    },
    /// Mutation referenced a group that does not exist
    #[error("Group not found: {group_id}")]
    GroupNotFound {
        /// Missing group
        group_id: GroupId,
    },
    /// A contact id is already taken by another group
    #[error("Contact already exists: {contact_id}")]
    ContactExists {
        /// Conflicting contact
        contact_id: ContactId,
    },
    /// Host rejected a request for a reason without a typed variant
    #[error("Host rejected request: {0}")]
    Remote(String),
    /// Transport backend failure
    #[error("Transport error: {0}")]
    Transport(String),
    /// Encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Storage collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// The network instance was torn down
    #[error("Network instance terminated")]
    Terminated,
}

impl NetworkError {
    /// Stable short code for UI mapping
    pub fn code(&self) -> &'static str {
        match self {
            NetworkError::SignalingTimeout { .. } => "signaling_timeout",
            NetworkError::RoomNotFound { .. } => "room_not_found",
            NetworkError::PeerUnavailable { .. } => "peer_unavailable",
            NetworkError::RequestTimeout { .. } => "request_timeout",
            NetworkError::HostOnlyOperation => "host_only_operation",
            NetworkError::UnknownMethod { .. } => "unknown_method",
            NetworkError::NotConnectedToHost => "not_connected_to_host",
            NetworkError::ContactNotFound { .. } => "contact_not_found",
            NetworkError::GroupNotFound { .. } => "group_not_found",
            NetworkError::ContactExists { .. } => "contact_exists",
            NetworkError::Remote(_) => "remote",
            NetworkError::Transport(_) => "transport",
            NetworkError::Serialization(_) => "serialization",
            NetworkError::Storage(_) => "storage",
            NetworkError::Config(_) => "config",
            NetworkError::Terminated => "terminated",
        }
    }

    /// Error string placed in a `response` message
    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    /// Map an error string from a `response` back to a typed error
    pub fn from_wire(message: &str) -> Self {
        if message == HOST_ONLY_MESSAGE {
            return NetworkError::HostOnlyOperation;
        }
        if let Some(method) = message.strip_prefix(UNKNOWN_METHOD_PREFIX) {
            return NetworkError::UnknownMethod {
                method: method.to_string(),
            };
        }
        if let Some(id) = message.strip_prefix(CONTACT_NOT_FOUND_PREFIX) {
            return NetworkError::ContactNotFound {
                contact_id: ContactId::new(id),
            };
        }
        if let Some(id) = message.strip_prefix(GROUP_NOT_FOUND_PREFIX) {
            return NetworkError::GroupNotFound {
                group_id: GroupId::new(id),
            };
        }
        if let Some(id) = message.strip_prefix(CONTACT_EXISTS_PREFIX) {
            return NetworkError::ContactExists {
                contact_id: ContactId::new(id),
            };
        }
        NetworkError::Remote(message.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(error: serde_json::Error) -> Self {
        NetworkError::Serialization(error.to_string())
    }
}

impl From<StorageError> for NetworkError {
    fn from(error: StorageError) -> Self {
        NetworkError::Storage(error.to_string())
    }
}

/// Errors reported by a storage collaborator
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Backend could not be reached
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
    /// Stored record could not be encoded or decoded
    #[error("Storage serialization failed: {0}")]
    Serialization(String),
    /// Any other backend failure
    #[error("Storage operation failed: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashSet;

    #[test]
    fn host_only_error_round_trips_through_wire_string() {
        let wire = NetworkError::HostOnlyOperation.to_wire();
        assert_eq!(wire, "Only host can handle requests");
        assert_eq!(NetworkError::from_wire(&wire), NetworkError::HostOnlyOperation);
    }

    #[test]
    fn typed_errors_survive_the_wire() {
        let unknown = NetworkError::UnknownMethod {
            method: "explode".into(),
        };
        assert_eq!(NetworkError::from_wire(&unknown.to_wire()), unknown);

        let missing = NetworkError::ContactNotFound {
            contact_id: ContactId::new("c9"),
        };
        assert_eq!(NetworkError::from_wire(&missing.to_wire()), missing);

        let taken = NetworkError::ContactExists {
            contact_id: ContactId::new("dup"),
        };
        assert_eq!(taken.to_wire(), "Contact already exists: dup");
        assert_eq!(NetworkError::from_wire(&taken.to_wire()), taken);
    }

    #[test]
    fn unrecognized_wire_errors_become_remote() {
        assert_matches!(
            NetworkError::from_wire("disk on fire"),
            NetworkError::Remote(message) if message == "disk on fire"
        );
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = vec![
            NetworkError::SignalingTimeout {
                operation: "create-room".into(),
                timeout_ms: 5000,
            },
            NetworkError::RoomNotFound {
                room_code: "ABC123".into(),
            },
            NetworkError::PeerUnavailable {
                peer_id: PeerId::new("p"),
            },
            NetworkError::RequestTimeout {
                request_id: RequestId::new("r"),
                timeout_ms: 1,
            },
            NetworkError::HostOnlyOperation,
            NetworkError::UnknownMethod { method: "m".into() },
            NetworkError::NotConnectedToHost,
            NetworkError::ContactNotFound {
                contact_id: ContactId::new("c"),
            },
            NetworkError::GroupNotFound {
                group_id: GroupId::new("g"),
            },
            NetworkError::ContactExists {
                contact_id: ContactId::new("c"),
            },
            NetworkError::Remote("r".into()),
            NetworkError::Transport("t".into()),
            NetworkError::Serialization("s".into()),
            NetworkError::Storage("s".into()),
            NetworkError::Config("c".into()),
            NetworkError::Terminated,
        ];
        let codes: HashSet<_> = errors.iter().map(NetworkError::code).collect();
        assert_eq!(codes.len(), errors.len(), "All error codes should be unique");
    }
}
