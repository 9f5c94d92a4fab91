//! Peer Bootstrap Tests
//!
//! Drives two signaling clients and two connection managers by hand through a
//! memory rendezvous until a data channel is open between them.

use assert_matches::assert_matches;
use bassline_core::{NetworkError, PeerId, Role, RoomCode};
use bassline_transport::{
    ConnectionState, ManagerEvent, MemoryRendezvous, MemoryTransportHub, PeerConnectionManager,
    SignalEvent, SignalingClient, SignalingState,
};
use std::time::Duration;

const ACK: Duration = Duration::from_secs(5);

// ============================================================================
// Helpers
// ============================================================================

async fn relay_until_connected(
    host: (&mut SignalingClient, &mut PeerConnectionManager),
    guest: (&mut SignalingClient, &mut PeerConnectionManager),
) -> (PeerId, PeerId) {
    let (host_signal, host_peers) = host;
    let (guest_signal, guest_peers) = guest;

    let guest_id = assert_matches!(
        host_signal.next_event().await,
        SignalEvent::PeerJoined { peer_id, is_host: false } => peer_id
    );
    let host_id = assert_matches!(
        guest_signal.next_event().await,
        SignalEvent::PeerJoined { peer_id, is_host: true } => peer_id
    );

    assert!(guest_peers.on_peer_joined(&host_id, true).await.unwrap().is_empty());
    for frame in host_peers.on_peer_joined(&guest_id, false).await.unwrap() {
        host_signal.send(frame).unwrap();
    }

    let offer = assert_matches!(
        guest_signal.next_event().await,
        SignalEvent::Offer { from, offer } if from == host_id => offer
    );
    for frame in guest_peers.on_offer(&host_id, offer).await.unwrap() {
        guest_signal.send(frame).unwrap();
    }
    let answer = assert_matches!(
        host_signal.next_event().await,
        SignalEvent::Answer { from, answer } if from == guest_id => answer
    );
    host_peers.on_answer(&guest_id, answer).await.unwrap();

    let event = host_peers.next_transport_event().await;
    assert_eq!(
        host_peers.on_transport_event(event),
        Some(ManagerEvent::Connected {
            peer: guest_id.clone()
        })
    );
    let event = guest_peers.next_transport_event().await;
    assert_eq!(
        guest_peers.on_transport_event(event),
        Some(ManagerEvent::Connected {
            peer: host_id.clone()
        })
    );
    (host_id, guest_id)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn host_offer_guest_answer_opens_channel_with_greeting_first() {
    let rendezvous = MemoryRendezvous::new();
    let hub = MemoryTransportHub::new();

    let mut host_signal = SignalingClient::connect(&rendezvous, ACK).await.unwrap();
    let code = host_signal
        .create_room(Some(RoomCode::new("ABC123")), 6)
        .await
        .unwrap();
    assert_eq!(host_signal.state(), SignalingState::RoomCreated);

    let mut guest_signal = SignalingClient::connect(&rendezvous, ACK).await.unwrap();
    guest_signal.join_room(&code).await.unwrap();

    let mut host_peers = PeerConnectionManager::new(Role::Host, Box::new(hub.transport()));
    let mut guest_peers = PeerConnectionManager::new(Role::Guest, Box::new(hub.transport()));
    host_peers.set_greeting(b"host-hello".to_vec());
    guest_peers.set_greeting(b"guest-hello".to_vec());

    let (host_id, guest_id) = relay_until_connected(
        (&mut host_signal, &mut host_peers),
        (&mut guest_signal, &mut guest_peers),
    )
    .await;

    host_peers.send(&guest_id, b"payload".to_vec()).unwrap();

    let event = guest_peers.next_transport_event().await;
    assert_eq!(
        guest_peers.on_transport_event(event),
        Some(ManagerEvent::Message {
            peer: host_id.clone(),
            data: b"host-hello".to_vec()
        })
    );
    let event = guest_peers.next_transport_event().await;
    assert_eq!(
        guest_peers.on_transport_event(event),
        Some(ManagerEvent::Message {
            peer: host_id.clone(),
            data: b"payload".to_vec()
        })
    );
    assert_eq!(guest_peers.peer(&host_id).unwrap().remote_role(), Some(Role::Host));
}

#[tokio::test]
async fn guest_departure_reaches_host_as_peer_left() {
    let rendezvous = MemoryRendezvous::new();
    let hub = MemoryTransportHub::new();

    let mut host_signal = SignalingClient::connect(&rendezvous, ACK).await.unwrap();
    let code = host_signal.create_room(None, 6).await.unwrap();
    assert_eq!(code.as_str().len(), 6);
    let mut guest_signal = SignalingClient::connect(&rendezvous, ACK).await.unwrap();
    guest_signal.join_room(&code).await.unwrap();

    let mut host_peers = PeerConnectionManager::new(Role::Host, Box::new(hub.transport()));
    let mut guest_peers = PeerConnectionManager::new(Role::Guest, Box::new(hub.transport()));
    let (_host_id, guest_id) = relay_until_connected(
        (&mut host_signal, &mut host_peers),
        (&mut guest_signal, &mut guest_peers),
    )
    .await;

    guest_signal.close();
    guest_peers.close_all().await;

    // Channel close and the rendezvous notice race; either way the peer goes away once.
    let mut disconnected = 0;
    let mut left = false;
    while !(left && disconnected == 1) {
        tokio::select! {
            event = host_signal.next_event() => {
                let peer = assert_matches!(event, SignalEvent::PeerLeft { peer_id } => peer_id);
                assert_eq!(peer, guest_id);
                left = true;
                if let Some(ManagerEvent::Disconnected { .. }) = host_peers.on_peer_left(&peer).await {
                    disconnected += 1;
                }
            }
            event = host_peers.next_transport_event() => {
                if let Some(ManagerEvent::Disconnected { peer, state }) = host_peers.on_transport_event(event) {
                    assert_eq!(peer, guest_id);
                    assert_eq!(state, ConnectionState::Closed);
                    disconnected += 1;
                }
            }
        }
    }
    assert!(host_peers.peer(&guest_id).is_none());
    assert!(host_peers.send(&guest_id, vec![1]).is_err());
}

#[tokio::test]
async fn joining_missing_room_reports_room_not_found() {
    let rendezvous = MemoryRendezvous::new();
    let mut client = SignalingClient::connect(&rendezvous, ACK).await.unwrap();
    let error = client.join_room(&RoomCode::new("ZZZ999")).await.unwrap_err();
    assert_eq!(
        error,
        NetworkError::RoomNotFound {
            room_code: "ZZZ999".to_string()
        }
    );
}

#[tokio::test]
async fn guests_only_track_the_host() {
    let hub = MemoryTransportHub::new();
    let mut guest_peers = PeerConnectionManager::new(Role::Guest, Box::new(hub.transport()));
    let host_id = PeerId::new("host");
    let other_guest = PeerId::new("other-guest");

    assert!(guest_peers
        .on_peer_joined(&other_guest, false)
        .await
        .unwrap()
        .is_empty());
    assert!(guest_peers.on_peer_joined(&host_id, true).await.unwrap().is_empty());

    assert!(guest_peers.peer(&other_guest).is_none());
    let tracked: Vec<PeerId> = guest_peers
        .summaries()
        .into_iter()
        .map(|s| s.peer_id)
        .collect();
    assert_eq!(tracked, vec![host_id]);
}
