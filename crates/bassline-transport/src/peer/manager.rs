//! Peer connection manager
//!
//! Owns every [`PeerConnection`] of one network instance and the backend that
//! negotiates them. Signaling input goes in through the `on_*` methods; frames
//! that must be relayed back over signaling come out as [`SignalMessage`]s for
//! the caller to send. The host always makes the offer; guests only answer.

use super::connection::{ConnectionState, PeerConnection};
use super::transport::{PeerTransport, TransportEvent};
use crate::error::{TransportError, TransportResult};
use crate::signaling::SignalMessage;
use bassline_core::{PeerId, Role};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What the manager reports upward after handling a transport event
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    /// Channel to `peer` is open and the greeting has been sent
    Connected { peer: PeerId },
    /// Application frame from `peer`
    Message { peer: PeerId, data: Vec<u8> },
    /// `peer` is gone; anything addressed to it must be rejected
    Disconnected {
        peer: PeerId,
        state: ConnectionState,
    },
    /// Relay over signaling
    Signal(SignalMessage),
}

/// Snapshot of one peer for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    /// Remote peer
    pub peer_id: PeerId,
    /// Announced role, once known
    pub role: Option<Role>,
    /// Connection state
    pub state: ConnectionState,
    /// Time since anything was heard from the peer
    pub idle: Duration,
}

/// Every peer connection of one network instance
pub struct PeerConnectionManager {
    local_role: Role,
    transport: Box<dyn PeerTransport>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    peers: HashMap<PeerId, PeerConnection>,
    greeting: Option<Vec<u8>>,
}

impl PeerConnectionManager {
    /// Manager negotiating through `transport`
    pub fn new(local_role: Role, mut transport: Box<dyn PeerTransport>) -> Self {
        let events = transport.take_events();
        if events.is_none() {
            warn!(
                transport = transport.transport_type(),
                "Transport events already taken; channels will never open"
            );
        }
        Self {
            local_role,
            transport,
            events,
            peers: HashMap::new(),
            greeting: None,
        }
    }

    /// Role of this peer
    pub fn local_role(&self) -> Role {
        self.local_role
    }

    /// Bytes sent first on every newly opened channel
    pub fn set_greeting(&mut self, greeting: Vec<u8>) {
        self.greeting = Some(greeting);
    }

    /// Connection to `peer`, if tracked
    pub fn peer(&self, peer: &PeerId) -> Option<&PeerConnection> {
        self.peers.get(peer)
    }

    /// Whether the channel to `peer` is open
    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.peers.get(peer).is_some_and(PeerConnection::is_connected)
    }

    /// Peers with an open channel, sorted
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .peers
            .values()
            .filter(|p| p.is_connected())
            .map(|p| p.peer_id().clone())
            .collect();
        peers.sort();
        peers
    }

    /// Record the role `peer` announced
    pub fn set_remote_role(&mut self, peer: &PeerId, role: Role) {
        if let Some(connection) = self.peers.get_mut(peer) {
            connection.set_remote_role(role);
        }
    }

    /// Status snapshot of every tracked peer, sorted by id
    pub fn summaries(&self) -> Vec<PeerSummary> {
        let now = Instant::now();
        let mut summaries: Vec<PeerSummary> = self
            .peers
            .values()
            .map(|p| PeerSummary {
                peer_id: p.peer_id().clone(),
                role: p.remote_role(),
                state: p.state(),
                idle: now.saturating_duration_since(p.last_seen()),
            })
            .collect();
        summaries.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        summaries
    }

    /// Next backend event; pends forever when the backend has none
    pub async fn next_transport_event(&mut self) -> TransportEvent {
        match self.events.as_mut() {
            Some(events) => match events.recv().await {
                Some(event) => event,
                None => {
                    self.events = None;
                    std::future::pending().await
                }
            },
            None => std::future::pending().await,
        }
    }

    /// A peer entered the room
    pub async fn on_peer_joined(
        &mut self,
        peer: &PeerId,
        is_host: bool,
    ) -> TransportResult<Vec<SignalMessage>> {
        if self.peers.contains_key(peer) {
            return Ok(Vec::new());
        }
        if !self.local_role.is_host() && !is_host {
            debug!(peer = %peer, "Guest ignoring fellow guest");
            return Ok(Vec::new());
        }
        let mut connection = PeerConnection::new(peer.clone());
        if is_host {
            connection.set_remote_role(Role::Host);
        }
        self.peers.insert(peer.clone(), connection);

        if !self.local_role.is_host() {
            debug!(peer = %peer, "Waiting for offer");
            return Ok(Vec::new());
        }

        self.begin(peer);
        let offer = match self.transport.create_offer(peer).await {
            Ok(offer) => offer,
            Err(e) => {
                self.fail(peer);
                return Err(e);
            }
        };
        Ok(vec![SignalMessage::Offer {
            peer_id: None,
            target_peer_id: Some(peer.clone()),
            offer,
        }])
    }

    /// Offer relayed from `from`; returns the answer to relay back
    pub async fn on_offer(
        &mut self,
        from: &PeerId,
        offer: Value,
    ) -> TransportResult<Vec<SignalMessage>> {
        if self.local_role.is_host() {
            warn!(peer = %from, "Host ignoring unsolicited offer");
            return Ok(Vec::new());
        }
        self.peers
            .entry(from.clone())
            .or_insert_with(|| PeerConnection::new(from.clone()));
        self.begin(from);
        let answer = match self.transport.accept_offer(from, offer).await {
            Ok(answer) => answer,
            Err(e) => {
                self.fail(from);
                return Err(e);
            }
        };
        Ok(vec![SignalMessage::Answer {
            peer_id: None,
            target_peer_id: Some(from.clone()),
            answer,
        }])
    }

    /// Answer relayed from `from`
    pub async fn on_answer(&mut self, from: &PeerId, answer: Value) -> TransportResult<()> {
        if !self.peers.contains_key(from) {
            return Err(TransportError::PeerUnavailable { peer: from.clone() });
        }
        self.transport.accept_answer(from, answer).await
    }

    /// Candidate relayed from `from`
    pub async fn on_candidate(&mut self, from: &PeerId, candidate: Value) -> TransportResult<()> {
        if !self.peers.contains_key(from) {
            return Err(TransportError::PeerUnavailable { peer: from.clone() });
        }
        self.transport.add_candidate(from, candidate).await
    }

    /// A peer left the room
    pub async fn on_peer_left(&mut self, peer: &PeerId) -> Option<ManagerEvent> {
        self.transport.close(peer).await;
        let mut connection = self.peers.remove(peer)?;
        connection.close();
        Some(ManagerEvent::Disconnected {
            peer: peer.clone(),
            state: ConnectionState::Closed,
        })
    }

    /// Fold one backend event into peer state
    pub fn on_transport_event(&mut self, event: TransportEvent) -> Option<ManagerEvent> {
        match event {
            TransportEvent::LocalCandidate { peer, candidate } => {
                Some(ManagerEvent::Signal(SignalMessage::IceCandidate {
                    peer_id: None,
                    target_peer_id: Some(peer),
                    candidate,
                }))
            }
            TransportEvent::ChannelOpen { peer, channel } => {
                let connection = self
                    .peers
                    .entry(peer.clone())
                    .or_insert_with(|| PeerConnection::new(peer.clone()));
                match connection.open(channel, self.greeting.clone()) {
                    Ok(()) => Some(ManagerEvent::Connected { peer }),
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "Channel opened but unusable");
                        self.drop_peer(&peer, ConnectionState::Failed)
                    }
                }
            }
            TransportEvent::Message { peer, data } => match self.peers.get_mut(&peer) {
                Some(connection) => {
                    connection.touch();
                    Some(ManagerEvent::Message { peer, data })
                }
                None => {
                    debug!(peer = %peer, "Dropping message from unknown peer");
                    None
                }
            },
            TransportEvent::ChannelClosed { peer } => {
                self.drop_peer(&peer, ConnectionState::Closed)
            }
            TransportEvent::Failed { peer, reason } => {
                warn!(peer = %peer, %reason, "Peer transport failed");
                self.drop_peer(&peer, ConnectionState::Failed)
            }
        }
    }

    /// Send to one peer, queueing while its channel is still being negotiated
    pub fn send(&mut self, peer: &PeerId, bytes: Vec<u8>) -> TransportResult<()> {
        let connection = self
            .peers
            .get_mut(peer)
            .ok_or_else(|| TransportError::PeerUnavailable { peer: peer.clone() })?;
        connection.send(bytes)
    }

    /// Send to every connected peer; returns the peers that could not be reached
    pub fn broadcast(&mut self, bytes: &[u8]) -> Vec<PeerId> {
        let mut unreachable = Vec::new();
        for connection in self.peers.values_mut().filter(|p| p.is_connected()) {
            if let Err(e) = connection.send(bytes.to_vec()) {
                debug!(peer = %connection.peer_id(), error = %e, "Broadcast send failed");
                unreachable.push(connection.peer_id().clone());
            }
        }
        unreachable
    }

    /// Record liveness for `peer`
    pub fn touch(&mut self, peer: &PeerId) {
        if let Some(connection) = self.peers.get_mut(peer) {
            connection.touch();
        }
    }

    /// Fail every peer not heard from within `timeout`
    pub fn expire_stale(&mut self, timeout: Duration) -> Vec<ManagerEvent> {
        let now = Instant::now();
        let stale: Vec<PeerId> = self
            .peers
            .values()
            .filter(|p| p.is_stale(now, timeout))
            .map(|p| p.peer_id().clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|peer| {
                warn!(peer = %peer, timeout_ms = timeout.as_millis() as u64, "Peer timed out");
                self.drop_peer(&peer, ConnectionState::Failed)
            })
            .collect()
    }

    /// Close every connection without reporting events
    pub async fn close_all(&mut self) {
        for (peer, mut connection) in self.peers.drain() {
            self.transport.close(&peer).await;
            connection.close();
        }
        self.events = None;
        info!("All peer connections closed");
    }

    fn begin(&mut self, peer: &PeerId) {
        if let Some(connection) = self.peers.get_mut(peer) {
            connection.begin_negotiation();
        }
    }

    fn fail(&mut self, peer: &PeerId) {
        if let Some(mut connection) = self.peers.remove(peer) {
            connection.fail();
        }
    }

    fn drop_peer(&mut self, peer: &PeerId, state: ConnectionState) -> Option<ManagerEvent> {
        let mut connection = self.peers.remove(peer)?;
        match state {
            ConnectionState::Failed => connection.fail(),
            _ => connection.close(),
        }
        Some(ManagerEvent::Disconnected {
            peer: peer.clone(),
            state,
        })
    }
}

impl std::fmt::Debug for PeerConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnectionManager")
            .field("local_role", &self.local_role)
            .field("transport", &self.transport.transport_type())
            .field("peers", &self.peers.len())
            .finish()
    }
}
