//! In-memory peer transport
//!
//! Offers are tokens registered with a shared [`MemoryTransportHub`]; accepting
//! one wires two unbounded channels between the two transports.

use super::transport::{DataChannel, PeerTransport, TransportEvent};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use bassline_core::PeerId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct MemoryOffer {
    token: Uuid,
}

#[derive(Debug)]
struct PendingOffer {
    owner: Uuid,
    // The offerer's name for the answering peer
    answerer: PeerId,
    offerer_events: mpsc::UnboundedSender<TransportEvent>,
}

/// Shared switchboard for memory transports of one test or process
#[derive(Debug, Clone, Default)]
pub struct MemoryTransportHub {
    offers: Arc<Mutex<HashMap<Uuid, PendingOffer>>>,
}

impl MemoryTransportHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// New transport attached to this hub
    pub fn transport(&self) -> MemoryTransport {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        MemoryTransport {
            id: Uuid::new_v4(),
            hub: self.clone(),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Offers created but not yet accepted
    pub fn pending_offers(&self) -> usize {
        self.offers.lock().len()
    }
}

/// In-process [`PeerTransport`]
#[derive(Debug)]
pub struct MemoryTransport {
    id: Uuid,
    hub: MemoryTransportHub,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

fn pump(
    peer: PeerId,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            trace!(peer = %peer, bytes = data.len(), "Memory channel delivery");
            if events
                .send(TransportEvent::Message {
                    peer: peer.clone(),
                    data,
                })
                .is_err()
            {
                return;
            }
        }
        let _ = events.send(TransportEvent::ChannelClosed { peer });
    });
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    async fn create_offer(&self, remote: &PeerId) -> TransportResult<Value> {
        let token = Uuid::new_v4();
        self.hub.offers.lock().insert(
            token,
            PendingOffer {
                owner: self.id,
                answerer: remote.clone(),
                offerer_events: self.events_tx.clone(),
            },
        );
        debug!(peer = %remote, %token, "Memory offer created");
        Ok(serde_json::to_value(MemoryOffer { token })?)
    }

    async fn accept_offer(&self, remote: &PeerId, offer: Value) -> TransportResult<Value> {
        let MemoryOffer { token } = serde_json::from_value(offer)?;
        let pending = self.hub.offers.lock().remove(&token).ok_or_else(|| {
            TransportError::NegotiationFailed {
                peer: remote.clone(),
                reason: format!("unknown offer {token}"),
            }
        })?;

        let (to_offerer, offerer_inbox) = mpsc::unbounded_channel();
        let (to_answerer, answerer_inbox) = mpsc::unbounded_channel();
        pump(pending.answerer.clone(), offerer_inbox, pending.offerer_events.clone());
        pump(remote.clone(), answerer_inbox, self.events_tx.clone());

        // Local open first so it precedes anything the offerer sends.
        let _ = self.events_tx.send(TransportEvent::ChannelOpen {
            peer: remote.clone(),
            channel: DataChannel::new(remote.clone(), to_offerer),
        });
        let _ = pending.offerer_events.send(TransportEvent::ChannelOpen {
            peer: pending.answerer.clone(),
            channel: DataChannel::new(pending.answerer, to_answerer),
        });
        debug!(peer = %remote, %token, "Memory offer accepted");
        Ok(serde_json::to_value(MemoryOffer { token })?)
    }

    async fn accept_answer(&self, remote: &PeerId, _answer: Value) -> TransportResult<()> {
        trace!(peer = %remote, "Memory answer received");
        Ok(())
    }

    async fn add_candidate(&self, remote: &PeerId, _candidate: Value) -> TransportResult<()> {
        trace!(peer = %remote, "Memory transport ignores candidates");
        Ok(())
    }

    async fn close(&self, remote: &PeerId) {
        self.hub
            .offers
            .lock()
            .retain(|_, offer| !(offer.owner == self.id && &offer.answerer == remote));
    }

    fn transport_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn accepted_offer_opens_both_sides_and_preserves_order() {
        let hub = MemoryTransportHub::new();
        let mut host = hub.transport();
        let mut guest = hub.transport();
        let mut host_events = host.take_events().unwrap();
        let mut guest_events = guest.take_events().unwrap();
        let (host_id, guest_id) = (PeerId::new("host"), PeerId::new("guest"));

        let offer = host.create_offer(&guest_id).await.unwrap();
        let answer = guest.accept_offer(&host_id, offer).await.unwrap();
        host.accept_answer(&guest_id, answer).await.unwrap();
        assert_eq!(hub.pending_offers(), 0);

        let to_guest = assert_matches!(
            host_events.recv().await,
            Some(TransportEvent::ChannelOpen { peer, channel }) if peer == guest_id => channel
        );
        let _to_host = assert_matches!(
            guest_events.recv().await,
            Some(TransportEvent::ChannelOpen { peer, channel }) if peer == host_id => channel
        );

        for n in 0..3u8 {
            to_guest.send(vec![n]).unwrap();
        }
        for n in 0..3u8 {
            assert_matches!(
                guest_events.recv().await,
                Some(TransportEvent::Message { peer, data }) if peer == host_id && data == vec![n]
            );
        }

        drop(to_guest);
        assert_matches!(
            guest_events.recv().await,
            Some(TransportEvent::ChannelClosed { peer }) if peer == host_id
        );
    }

    #[tokio::test]
    async fn unknown_offer_fails_negotiation() {
        let hub = MemoryTransportHub::new();
        let guest = hub.transport();
        let result = guest
            .accept_offer(
                &PeerId::new("host"),
                serde_json::json!({"token": Uuid::new_v4()}),
            )
            .await;
        assert_matches!(result, Err(TransportError::NegotiationFailed { .. }));
    }

    #[tokio::test]
    async fn close_discards_pending_offer() {
        let hub = MemoryTransportHub::new();
        let host = hub.transport();
        host.create_offer(&PeerId::new("guest")).await.unwrap();
        host.close(&PeerId::new("guest")).await;
        assert_eq!(hub.pending_offers(), 0);
    }
}
