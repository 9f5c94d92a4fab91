//! Signaling client
//!
//! Drives one rendezvous connection through
//! `disconnected -> connecting -> connected -> (room-created | room-joined) -> active`.
//! Frames that arrive while a room acknowledgement is awaited are buffered and
//! surfaced afterwards through [`SignalingClient::next_event`], in arrival order.

use super::connector::{SignalingConnection, SignalingConnector};
use super::protocol::SignalMessage;
use crate::error::{TransportError, TransportResult};
use bassline_core::{NetworkError, NetworkResult, PeerId, RoomCode};
use rand::Rng;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random room code of `len` characters from `A-Z0-9`
pub fn generate_room_code(len: usize) -> RoomCode {
    let mut rng = rand::thread_rng();
    let code: String = (0..len)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect();
    RoomCode::new(code)
}

/// Lifecycle of the rendezvous connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingState {
    Disconnected,
    Connecting,
    Connected,
    RoomCreated,
    RoomJoined,
    /// In a room with at least one other peer
    Active,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalingState::Disconnected => "disconnected",
            SignalingState::Connecting => "connecting",
            SignalingState::Connected => "connected",
            SignalingState::RoomCreated => "room-created",
            SignalingState::RoomJoined => "room-joined",
            SignalingState::Active => "active",
        };
        f.write_str(name)
    }
}

/// Room events surfaced to the peer layer
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    PeerJoined { peer_id: PeerId, is_host: bool },
    PeerLeft { peer_id: PeerId },
    Offer { from: PeerId, offer: Value },
    Answer { from: PeerId, answer: Value },
    IceCandidate { from: PeerId, candidate: Value },
    Error { message: String },
    /// The rendezvous connection closed; no further events follow
    Disconnected,
}

/// Client side of the rendezvous protocol
pub struct SignalingClient {
    state: SignalingState,
    outbound: Option<mpsc::UnboundedSender<SignalMessage>>,
    inbound: mpsc::UnboundedReceiver<SignalMessage>,
    backlog: VecDeque<SignalMessage>,
    local_peer_id: Option<PeerId>,
    room_code: Option<RoomCode>,
    ack_timeout: Duration,
}

impl SignalingClient {
    /// Open a rendezvous connection through `connector`
    pub async fn connect(
        connector: &dyn SignalingConnector,
        ack_timeout: Duration,
    ) -> NetworkResult<Self> {
        debug!(backend = connector.backend(), state = %SignalingState::Connecting, "Signaling state");
        let connection = match tokio::time::timeout(ack_timeout, connector.connect()).await {
            Ok(connection) => connection?,
            Err(_) => {
                return Err(NetworkError::SignalingTimeout {
                    operation: "connect".to_string(),
                    timeout_ms: ack_timeout.as_millis() as u64,
                })
            }
        };
        info!(backend = connector.backend(), "Signaling connected");
        Ok(Self::from_connection(connection, ack_timeout))
    }

    /// Wrap an already open connection
    pub fn from_connection(connection: SignalingConnection, ack_timeout: Duration) -> Self {
        Self {
            state: SignalingState::Connected,
            outbound: Some(connection.outbound),
            inbound: connection.inbound,
            backlog: VecDeque::new(),
            local_peer_id: None,
            room_code: None,
            ack_timeout,
        }
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    /// Id the rendezvous server assigned to this client, once in a room
    pub fn local_peer_id(&self) -> Option<&PeerId> {
        self.local_peer_id.as_ref()
    }

    pub fn room_code(&self) -> Option<&RoomCode> {
        self.room_code.as_ref()
    }

    /// Create a room, generating a code of `code_len` characters when none is given
    pub async fn create_room(
        &mut self,
        room_code: Option<RoomCode>,
        code_len: usize,
    ) -> NetworkResult<RoomCode> {
        let code = room_code.unwrap_or_else(|| generate_room_code(code_len));
        self.send(SignalMessage::CreateRoom {
            room_code: code.clone(),
        })?;

        let deadline = Instant::now() + self.ack_timeout;
        loop {
            match self.await_frame(deadline, "create-room").await? {
                SignalMessage::RoomCreated { room_code, peer_id } => {
                    self.enter_room(room_code.clone(), peer_id, SignalingState::RoomCreated);
                    return Ok(room_code);
                }
                SignalMessage::Error { message } => {
                    warn!(room = %code, %message, "Room creation rejected");
                    return Err(NetworkError::Transport(message));
                }
                other => self.backlog.push_back(other),
            }
        }
    }

    /// Join an existing room
    pub async fn join_room(&mut self, room_code: &RoomCode) -> NetworkResult<()> {
        self.send(SignalMessage::JoinRoom {
            room_code: room_code.clone(),
        })?;

        let deadline = Instant::now() + self.ack_timeout;
        loop {
            match self.await_frame(deadline, "join-room").await? {
                SignalMessage::RoomJoined { room_code, peer_id } => {
                    self.enter_room(room_code, peer_id, SignalingState::RoomJoined);
                    return Ok(());
                }
                SignalMessage::Error { message } => {
                    warn!(room = %room_code, %message, "Room join rejected");
                    return Err(NetworkError::RoomNotFound {
                        room_code: room_code.to_string(),
                    });
                }
                other => self.backlog.push_back(other),
            }
        }
    }

    /// Next room event
    ///
    /// Cancel safe. After [`SignalEvent::Disconnected`] has been returned once the
    /// future never resolves again.
    pub async fn next_event(&mut self) -> SignalEvent {
        loop {
            let frame = match self.backlog.pop_front() {
                Some(frame) => frame,
                None => {
                    if self.state == SignalingState::Disconnected {
                        return std::future::pending().await;
                    }
                    match self.inbound.recv().await {
                        Some(frame) => frame,
                        None => {
                            self.mark_disconnected();
                            return SignalEvent::Disconnected;
                        }
                    }
                }
            };
            if let Some(event) = self.translate(frame) {
                return event;
            }
        }
    }

    pub fn send_offer(&self, target: &PeerId, offer: Value) -> TransportResult<()> {
        self.send(SignalMessage::Offer {
            peer_id: None,
            target_peer_id: Some(target.clone()),
            offer,
        })
    }

    pub fn send_answer(&self, target: &PeerId, answer: Value) -> TransportResult<()> {
        self.send(SignalMessage::Answer {
            peer_id: None,
            target_peer_id: Some(target.clone()),
            answer,
        })
    }

    pub fn send_candidate(&self, target: &PeerId, candidate: Value) -> TransportResult<()> {
        self.send(SignalMessage::IceCandidate {
            peer_id: None,
            target_peer_id: Some(target.clone()),
            candidate,
        })
    }

    /// Send a raw frame to the rendezvous server
    pub fn send(&self, message: SignalMessage) -> TransportResult<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(TransportError::SignalingClosed)?;
        outbound
            .send(message)
            .map_err(|_| TransportError::SignalingClosed)
    }

    /// Close the rendezvous connection
    pub fn close(&mut self) {
        self.outbound = None;
        self.inbound.close();
        self.backlog.clear();
        self.mark_disconnected();
    }

    async fn await_frame(
        &mut self,
        deadline: Instant,
        operation: &str,
    ) -> NetworkResult<SignalMessage> {
        match timeout_at(deadline, self.inbound.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => {
                self.mark_disconnected();
                Err(TransportError::SignalingClosed.into())
            }
            Err(_) => Err(NetworkError::SignalingTimeout {
                operation: operation.to_string(),
                timeout_ms: self.ack_timeout.as_millis() as u64,
            }),
        }
    }

    fn enter_room(&mut self, room_code: RoomCode, peer_id: PeerId, state: SignalingState) {
        info!(room = %room_code, peer = %peer_id, state = %state, "Signaling state");
        self.room_code = Some(room_code);
        self.local_peer_id = Some(peer_id);
        self.state = state;
    }

    fn mark_disconnected(&mut self) {
        if self.state != SignalingState::Disconnected {
            info!(state = %SignalingState::Disconnected, "Signaling state");
            self.state = SignalingState::Disconnected;
        }
    }

    fn translate(&mut self, frame: SignalMessage) -> Option<SignalEvent> {
        let event = match frame {
            SignalMessage::PeerJoined { peer_id, data } => {
                if matches!(
                    self.state,
                    SignalingState::RoomCreated | SignalingState::RoomJoined
                ) {
                    info!(state = %SignalingState::Active, "Signaling state");
                    self.state = SignalingState::Active;
                }
                SignalEvent::PeerJoined {
                    peer_id,
                    is_host: data.is_host,
                }
            }
            SignalMessage::PeerLeft { peer_id } => SignalEvent::PeerLeft { peer_id },
            SignalMessage::Offer {
                peer_id: Some(from),
                offer,
                ..
            } => SignalEvent::Offer { from, offer },
            SignalMessage::Answer {
                peer_id: Some(from),
                answer,
                ..
            } => SignalEvent::Answer { from, answer },
            SignalMessage::IceCandidate {
                peer_id: Some(from),
                candidate,
                ..
            } => SignalEvent::IceCandidate { from, candidate },
            SignalMessage::Error { message } => SignalEvent::Error { message },
            other => {
                debug!(kind = other.kind(), "Dropping unexpected signaling frame");
                return None;
            }
        };
        Some(event)
    }
}

impl fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingClient")
            .field("state", &self.state)
            .field("local_peer_id", &self.local_peer_id)
            .field("room_code", &self.room_code)
            .field("backlog", &self.backlog.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::protocol::PeerJoinedData;

    fn client() -> (
        SignalingClient,
        mpsc::UnboundedReceiver<SignalMessage>,
        mpsc::UnboundedSender<SignalMessage>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let client = SignalingClient::from_connection(
            SignalingConnection {
                outbound: out_tx,
                inbound: in_rx,
            },
            Duration::from_secs(5),
        );
        (client, out_rx, in_tx)
    }

    #[test]
    fn room_codes_use_uppercase_alphanumerics() {
        let code = generate_room_code(6);
        assert_eq!(code.as_str().len(), 6);
        assert!(code
            .as_str()
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
    }

    #[tokio::test(start_paused = true)]
    async fn create_room_times_out_without_ack() {
        let (mut client, _server_rx, _server_tx) = client();
        let error = client
            .create_room(Some(RoomCode::new("ABC123")), 6)
            .await
            .unwrap_err();
        assert_eq!(
            error,
            NetworkError::SignalingTimeout {
                operation: "create-room".to_string(),
                timeout_ms: 5000
            }
        );
    }

    #[tokio::test]
    async fn join_rejection_maps_to_room_not_found() {
        let (mut client, _server_rx, server_tx) = client();
        server_tx
            .send(SignalMessage::Error {
                message: "Room not found".into(),
            })
            .unwrap();
        let error = client.join_room(&RoomCode::new("XYZ")).await.unwrap_err();
        assert_eq!(
            error,
            NetworkError::RoomNotFound {
                room_code: "XYZ".into()
            }
        );
    }

    #[tokio::test]
    async fn frames_before_ack_are_buffered_in_order() {
        let (mut client, _server_rx, server_tx) = client();
        server_tx
            .send(SignalMessage::PeerJoined {
                peer_id: PeerId::new("host"),
                data: PeerJoinedData { is_host: true },
            })
            .unwrap();
        server_tx
            .send(SignalMessage::RoomJoined {
                room_code: RoomCode::new("R"),
                peer_id: PeerId::new("me"),
            })
            .unwrap();

        client.join_room(&RoomCode::new("R")).await.unwrap();
        assert_eq!(client.state(), SignalingState::RoomJoined);
        assert_eq!(client.local_peer_id(), Some(&PeerId::new("me")));

        assert_eq!(
            client.next_event().await,
            SignalEvent::PeerJoined {
                peer_id: PeerId::new("host"),
                is_host: true
            }
        );
        assert_eq!(client.state(), SignalingState::Active);
    }

    #[tokio::test]
    async fn server_close_reports_disconnected() {
        let (mut client, _server_rx, server_tx) = client();
        drop(server_tx);
        assert_eq!(client.next_event().await, SignalEvent::Disconnected);
        assert_eq!(client.state(), SignalingState::Disconnected);
    }

    #[test]
    fn send_after_close_fails() {
        let (mut client, _server_rx, _server_tx) = client();
        client.close();
        assert_eq!(
            client.send_offer(&PeerId::new("p"), Value::Null),
            Err(TransportError::SignalingClosed)
        );
    }
}
