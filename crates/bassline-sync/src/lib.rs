//! Bassline Sync
//!
//! The replication protocol spoken over peer data channels:
//!
//! - [`wire`]: `role-announce`, `state-request`, `state-sync`, `change`,
//!   `request`, `response` and `heartbeat` messages
//! - [`rpc`]: correlation of outgoing requests with their responses, with
//!   timeouts and per-peer rejection
//! - [`subscriptions`]: per-group change handlers
//! - [`engine`]: the [`ReplicationEngine`], which owns the authoritative graph on
//!   the host and the bootstrapped caches on guests
//!
//! Nothing here performs I/O. The engine consumes messages and local commands
//! and returns [`Effect`]s for the caller to execute.

#![forbid(unsafe_code)]

pub mod engine;
pub mod rpc;
pub mod subscriptions;
pub mod wire;

pub use engine::{Effect, EngineConfig, ReplicationEngine};
pub use rpc::{PendingRequests, RpcReply};
pub use subscriptions::{ChangeHandler, SubscriptionId, SubscriptionRegistry};
pub use wire::{DataMessage, Method, Mutation};
