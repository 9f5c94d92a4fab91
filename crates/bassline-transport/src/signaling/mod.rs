//! Rendezvous signaling
//!
//! The signaling channel only bootstraps peer connections; application state
//! never travels over it.

mod client;
mod connector;
mod memory;
pub mod protocol;
mod rooms;
mod websocket;

pub use client::{generate_room_code, SignalEvent, SignalingClient, SignalingState};
pub use connector::{SignalingConnection, SignalingConnector};
pub use memory::MemoryRendezvous;
pub use protocol::{PeerJoinedData, SignalMessage};
pub use rooms::{RoomRegistry, Routed};
pub use websocket::{WebSocketConfig, WebSocketConnector};
