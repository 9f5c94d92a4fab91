//! Bassline Network
//!
//! The facade UIs program against. A [`Network`] is built from a
//! [`NetworkConfig`], a signaling backend, a peer transport and an optional
//! storage collaborator, then either creates a room (host) or joins one
//! (guest):
//!
//! ```no_run
//! # async fn demo() -> bassline_core::NetworkResult<()> {
//! use bassline_core::{GroupId, NewContact};
//! use bassline_network::{Network, NetworkConfig};
//! use bassline_transport::{MemoryRendezvous, MemoryTransportHub};
//!
//! let rendezvous = MemoryRendezvous::new();
//! let hub = MemoryTransportHub::new();
//! let host = Network::builder(NetworkConfig::default())
//!     .signaling(rendezvous.clone())
//!     .transport(hub.transport())
//!     .create_room(None)
//!     .await?;
//! let id = host
//!     .add_contact(GroupId::root(), NewContact::new(serde_json::json!(5)))
//!     .await?;
//! # let _ = id;
//! # Ok(())
//! # }
//! ```
//!
//! All protocol state lives in one spawned event loop per instance; the handle
//! only sends it commands.

#![forbid(unsafe_code)]

pub mod config;
mod event_loop;
pub mod network;
pub mod status;

pub use config::NetworkConfig;
pub use network::{Network, NetworkBuilder, Subscription};
pub use status::{Connectivity, NetworkStatus};
