//! Per-peer connection state machine

use super::transport::DataChannel;
use crate::error::{TransportError, TransportResult};
use bassline_core::{PeerId, Role};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// `new -> negotiating -> connected -> (closed | failed)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Known from signaling, no negotiation yet
    New,
    /// Offer or answer in flight
    Negotiating,
    /// Data channel open
    Connected,
    /// Closed by either side
    Closed,
    /// Negotiation or the channel failed
    Failed,
}

impl ConnectionState {
    /// Closed and failed connections never reopen
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One remote peer
///
/// Messages sent before the channel opens are queued and flushed in FIFO order
/// right after the greeting once it does.
#[derive(Debug)]
pub struct PeerConnection {
    peer_id: PeerId,
    state: ConnectionState,
    remote_role: Option<Role>,
    channel: Option<DataChannel>,
    queue: VecDeque<Vec<u8>>,
    last_seen: Instant,
}

impl PeerConnection {
    /// Fresh connection in the `new` state
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            state: ConnectionState::New,
            remote_role: None,
            channel: None,
            queue: VecDeque::new(),
            last_seen: Instant::now(),
        }
    }

    /// Remote peer
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the channel is open
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Role the remote announced, if any
    pub fn remote_role(&self) -> Option<Role> {
        self.remote_role
    }

    /// Record the remote's role
    pub fn set_remote_role(&mut self, role: Role) {
        self.remote_role = Some(role);
    }

    /// When the remote was last heard from
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Messages waiting for the channel to open
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Record inbound activity
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Whether nothing has been heard for longer than `timeout`
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    /// Move `new` to `negotiating`
    pub fn begin_negotiation(&mut self) {
        if self.state == ConnectionState::New {
            self.transition(ConnectionState::Negotiating);
        }
    }

    /// Attach the open channel, send `greeting` and flush the queue
    ///
    /// A failed send marks the connection failed; nothing stays queued.
    pub fn open(&mut self, channel: DataChannel, greeting: Option<Vec<u8>>) -> TransportResult<()> {
        if self.state.is_terminal() {
            return Err(TransportError::PeerUnavailable {
                peer: self.peer_id.clone(),
            });
        }
        let flushed = greeting
            .map_or(Ok(()), |greeting| channel.send(greeting))
            .and_then(|()| {
                self.queue
                    .iter()
                    .try_for_each(|bytes| channel.send(bytes.clone()))
            });
        if let Err(e) = flushed {
            self.fail();
            return Err(e);
        }
        self.queue.clear();
        self.channel = Some(channel);
        self.touch();
        self.transition(ConnectionState::Connected);
        Ok(())
    }

    /// Send now if connected, otherwise queue
    pub fn send(&mut self, bytes: Vec<u8>) -> TransportResult<()> {
        match (self.state, &self.channel) {
            (ConnectionState::Connected, Some(channel)) => channel.send(bytes),
            (ConnectionState::New | ConnectionState::Negotiating, _) => {
                self.queue.push_back(bytes);
                Ok(())
            }
            _ => Err(TransportError::PeerUnavailable {
                peer: self.peer_id.clone(),
            }),
        }
    }

    /// Drop the channel and any queued messages
    pub fn close(&mut self) {
        self.teardown(ConnectionState::Closed);
    }

    /// Drop the channel and any queued messages, marking the peer failed
    pub fn fail(&mut self) {
        self.teardown(ConnectionState::Failed);
    }

    fn teardown(&mut self, state: ConnectionState) {
        if self.state.is_terminal() {
            return;
        }
        self.channel = None;
        if !self.queue.is_empty() {
            debug!(peer = %self.peer_id, dropped = self.queue.len(), "Discarding queued messages");
            self.queue.clear();
        }
        self.transition(state);
    }

    fn transition(&mut self, next: ConnectionState) {
        info!(peer = %self.peer_id, from = %self.state, to = %next, "Peer connection state");
        self.state = next;
    }
}
