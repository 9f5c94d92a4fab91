//! Bassline Transport
//!
//! Connection bootstrap between peers of one room:
//! - **signaling**: rendezvous client (create/join room, relay opaque offer,
//!   answer and candidate envelopes) over a swappable [`SignalingConnector`]
//!   (WebSocket or in-memory)
//! - **peer**: one [`PeerConnection`] state machine per remote peer, driven by a
//!   swappable [`PeerTransport`] backend (in-memory or direct TCP), and the
//!   [`PeerConnectionManager`] that owns them
//!
//! The transport never interprets application payloads; it moves bytes.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

pub mod error;
pub mod peer;
pub mod signaling;

pub use error::{TransportError, TransportResult};
pub use peer::{
    ConnectionState, DataChannel, ManagerEvent, MemoryTransport, MemoryTransportHub,
    PeerConnection, PeerConnectionManager, PeerSummary, PeerTransport, TcpTransport,
    TcpTransportConfig, TransportEvent,
};
pub use signaling::{
    generate_room_code, MemoryRendezvous, RoomRegistry, Routed, SignalEvent, SignalMessage,
    SignalingClient, SignalingConnection, SignalingConnector, SignalingState, WebSocketConfig,
    WebSocketConnector,
};
