//! # Bassline Core - Layer 1: Graph Model and Merge Semantics
//!
//! Foundation types shared by every Bassline crate:
//! - Identifiers for peers, groups, contacts, wires and RPC requests
//! - The value/blend model (`accept-last` and `merge` contacts)
//! - The replicated graph (`Group`, `Contact`, `Wire`, `GroupState`)
//! - `Change`, the immutable unit of broadcast and replay
//! - The error taxonomy surfaced to callers of the network facade
//! - The storage collaborator interface used for opportunistic persistence
//!
//! Nothing in this crate performs I/O. Higher layers (`bassline-transport`,
//! `bassline-sync`, `bassline-network`) build the protocol on top of it.

#![forbid(unsafe_code)]

pub mod blend;
pub mod change;
pub mod errors;
pub mod graph;
pub mod identifiers;
pub mod role;
pub mod storage;

pub use blend::{canonical_json, join_json, BlendMode, GrowSet, Max, Min, Semilattice};
pub use change::{Change, ContactUpdates};
pub use errors::{NetworkError, NetworkResult, StorageError};
pub use graph::{Contact, Group, GroupState, NewContact, VersionedGroupState, Wire, WireType};
pub use identifiers::{ContactId, GroupId, PeerId, RequestId, RoomCode, WireId};
pub use role::Role;
pub use storage::{NoopStorage, StorageEffects};

/// Well-known identifier of the group every graph tree is rooted at.
pub const ROOT_GROUP_ID: &str = "root";
