//! Peer connections
//!
//! [`PeerTransport`] backends turn opaque offer/answer/candidate blobs into an
//! ordered, reliable byte channel. [`PeerConnection`] tracks one remote peer on
//! top of such a channel and [`PeerConnectionManager`] owns them all.

mod connection;
mod manager;
mod memory;
mod tcp;
mod transport;

pub use connection::{ConnectionState, PeerConnection};
pub use manager::{ManagerEvent, PeerConnectionManager, PeerSummary};
pub use memory::{MemoryTransport, MemoryTransportHub};
pub use tcp::{TcpTransport, TcpTransportConfig};
pub use transport::{DataChannel, PeerTransport, TransportEvent};
