//! Identifier types used across the replication protocol
//!
//! All identifiers are opaque strings on the wire. They are wrapped in newtypes so
//! a contact id can never be passed where a group id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier string
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random identifier
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "-{}"), Uuid::new_v4()))
            }

            /// Borrow the identifier string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier assigned to a peer by the rendezvous server
    PeerId,
    "peer"
);

string_id!(
    /// Identifier of a group (named mutable subgraph)
    GroupId,
    "group"
);

string_id!(
    /// Identifier of a contact; unique network-wide
    ContactId,
    "contact"
);

string_id!(
    /// Identifier of a wire between two contacts
    WireId,
    "wire"
);

string_id!(
    /// Short code naming a rendezvous room
    RoomCode,
    "room"
);

string_id!(
    /// Correlation id of an outgoing RPC request
    ///
    /// Built from the issuing peer id and a per-instance monotonic counter, so it is
    /// unique for the lifetime of one network instance.
    RequestId,
    "request"
);

impl RequestId {
    /// Build the correlation id for the `counter`-th request issued by `peer`
    pub fn for_peer(peer: &PeerId, counter: u64) -> Self {
        Self(format!("{peer}-{counter}"))
    }
}

impl GroupId {
    /// The well-known root group
    pub fn root() -> Self {
        Self::new(crate::ROOT_GROUP_ID)
    }

    /// Whether this is the well-known root group
    pub fn is_root(&self) -> bool {
        self.0 == crate::ROOT_GROUP_ID
    }
}
