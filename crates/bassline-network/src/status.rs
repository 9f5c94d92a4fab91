//! Connectivity reporting for UIs

use bassline_core::{GroupId, PeerId, Role, RoomCode};
use bassline_transport::{PeerSummary, SignalingState};

/// Point-in-time view of a network instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStatus {
    /// Id assigned by the rendezvous server
    pub local_peer_id: Option<PeerId>,
    /// Role held in the room
    pub role: Role,
    /// Room joined or created
    pub room_code: Option<RoomCode>,
    /// Rendezvous connection state
    pub signaling: SignalingState,
    /// Host: reachable by guests. Guest: has a live host peer.
    pub connected: bool,
    /// A role-announcing host peer is connected
    pub host_connected: bool,
    /// Every known peer connection
    pub peers: Vec<PeerSummary>,
    /// Groups held locally (authoritative on the host, cached on a guest)
    pub groups: Vec<GroupId>,
    /// Requests awaiting a host response
    pub pending_requests: usize,
}

/// Compact connectivity summary published on every change
///
/// Watch it through [`Network::connectivity`](crate::Network::connectivity) to
/// drive "offline" and "connecting to host" indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    /// Role held in the room
    pub role: Role,
    /// Rendezvous connection state
    pub signaling: SignalingState,
    /// Same meaning as [`NetworkStatus::connected`]
    pub connected: bool,
    /// A role-announcing host peer is connected
    pub host_connected: bool,
    /// The root group is available locally
    pub root_synced: bool,
    /// Peers with an open channel
    pub connected_peers: usize,
}

impl Connectivity {
    /// Before the event loop has reported anything
    pub fn initial(role: Role) -> Self {
        Self {
            role,
            signaling: SignalingState::Disconnected,
            connected: false,
            host_connected: false,
            root_synced: false,
            connected_peers: 0,
        }
    }

    /// Mutations can be serviced and the root group is readable
    pub fn is_ready(&self) -> bool {
        match self.role {
            Role::Host => self.root_synced,
            Role::Guest => self.host_connected && self.root_synced,
        }
    }
}
