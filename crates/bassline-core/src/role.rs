//! Peer roles within a room

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a peer holds for the lifetime of a room
///
/// The creator of a room is its host and holds the only authoritative copy of the
/// graph. Every peer that joins is a guest. Roles never migrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Created the room; services every mutation
    Host,
    /// Joined the room; forwards mutations to the host
    Guest,
}

impl Role {
    /// Whether this is the host role
    pub fn is_host(self) -> bool {
        matches!(self, Role::Host)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Guest => f.write_str("guest"),
        }
    }
}
