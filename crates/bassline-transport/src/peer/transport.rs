//! Peer transport seam

use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use bassline_core::PeerId;
use serde_json::Value;
use tokio::sync::mpsc;

/// Sending half of an open byte channel to one peer
///
/// Dropping the last clone closes the channel; the remote side then observes
/// [`TransportEvent::ChannelClosed`].
#[derive(Debug, Clone)]
pub struct DataChannel {
    peer: PeerId,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl DataChannel {
    pub fn new(peer: PeerId, tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { peer, tx }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Queue `bytes` for delivery in send order
    pub fn send(&self, bytes: Vec<u8>) -> TransportResult<()> {
        self.tx.send(bytes).map_err(|_| TransportError::ChannelClosed {
            peer: self.peer.clone(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Events a backend reports asynchronously
#[derive(Debug)]
pub enum TransportEvent {
    /// A connectivity hint to relay to `peer` over signaling
    LocalCandidate { peer: PeerId, candidate: Value },
    ChannelOpen { peer: PeerId, channel: DataChannel },
    Message { peer: PeerId, data: Vec<u8> },
    ChannelClosed { peer: PeerId },
    Failed { peer: PeerId, reason: String },
}

impl TransportEvent {
    pub fn peer(&self) -> &PeerId {
        match self {
            TransportEvent::LocalCandidate { peer, .. }
            | TransportEvent::ChannelOpen { peer, .. }
            | TransportEvent::Message { peer, .. }
            | TransportEvent::ChannelClosed { peer }
            | TransportEvent::Failed { peer, .. } => peer,
        }
    }
}

/// Negotiates direct channels from opaque signaling blobs
///
/// The offering side calls [`create_offer`](PeerTransport::create_offer) and later
/// [`accept_answer`](PeerTransport::accept_answer); the answering side calls
/// [`accept_offer`](PeerTransport::accept_offer). Both sides learn that the
/// channel is usable through [`TransportEvent::ChannelOpen`].
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Take the event stream; returns `None` after the first call
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    async fn create_offer(&self, remote: &PeerId) -> TransportResult<Value>;

    /// Accept an offer and produce the answer to relay back
    async fn accept_offer(&self, remote: &PeerId, offer: Value) -> TransportResult<Value>;

    async fn accept_answer(&self, remote: &PeerId, answer: Value) -> TransportResult<()>;

    async fn add_candidate(&self, remote: &PeerId, candidate: Value) -> TransportResult<()>;

    /// Abandon any negotiation with `remote`
    async fn close(&self, remote: &PeerId);

    /// Backend name for logs
    fn transport_type(&self) -> &'static str;
}
