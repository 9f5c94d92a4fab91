//! In-process rendezvous server
//!
//! Every [`MemoryRendezvous::connect`] registers a client with a shared
//! [`RoomRegistry`] and spawns a task that routes its frames. Dropping the
//! client's outbound sender disconnects it and notifies the rest of its room.

use super::connector::{SignalingConnection, SignalingConnector};
use super::protocol::SignalMessage;
use super::rooms::{RoomRegistry, Routed};
use crate::error::TransportResult;
use async_trait::async_trait;
use bassline_core::{PeerId, RoomCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct RendezvousInner {
    registry: RoomRegistry,
    clients: HashMap<PeerId, mpsc::UnboundedSender<SignalMessage>>,
}

impl RendezvousInner {
    fn deliver(&self, routed: Vec<Routed>) {
        for Routed { to, message } in routed {
            match self.clients.get(&to) {
                Some(client) => {
                    trace!(peer = %to, kind = message.kind(), "Routing signaling frame");
                    let _ = client.send(message);
                }
                None => debug!(peer = %to, "Dropping frame for departed client"),
            }
        }
    }
}

/// Shared in-memory rendezvous; clone to hand the same server to many peers
#[derive(Debug, Clone, Default)]
pub struct MemoryRendezvous {
    inner: Arc<Mutex<RendezvousInner>>,
}

impl MemoryRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently connected clients
    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn room_count(&self) -> usize {
        self.inner.lock().registry.room_count()
    }

    /// Members of `room` with their host flag
    pub fn members(&self, room: &RoomCode) -> Vec<(PeerId, bool)> {
        self.inner.lock().registry.members(room)
    }

    /// Forcibly disconnect a client, as if its connection dropped
    pub fn kick(&self, peer: &PeerId) {
        let mut inner = self.inner.lock();
        inner.clients.remove(peer);
        let routed = inner.registry.disconnect(peer);
        inner.deliver(routed);
    }
}

#[async_trait]
impl SignalingConnector for MemoryRendezvous {
    async fn connect(&self) -> TransportResult<SignalingConnection> {
        let (to_server, mut from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();

        let peer = {
            let mut inner = self.inner.lock();
            let peer = inner.registry.register();
            inner.clients.insert(peer.clone(), to_client);
            peer
        };
        debug!(peer = %peer, "Memory rendezvous client connected");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(frame) = from_client.recv().await {
                let mut guard = inner.lock();
                if !guard.clients.contains_key(&peer) {
                    break;
                }
                let routed = guard.registry.handle(&peer, frame);
                guard.deliver(routed);
            }
            let mut guard = inner.lock();
            if guard.clients.remove(&peer).is_some() {
                let routed = guard.registry.disconnect(&peer);
                guard.deliver(routed);
            }
            debug!(peer = %peer, "Memory rendezvous client disconnected");
        });

        Ok(SignalingConnection {
            outbound: to_server,
            inbound: from_server,
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
