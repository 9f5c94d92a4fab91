//! Signaling wire protocol
//!
//! JSON frames exchanged with the rendezvous server. Connection descriptions and
//! candidates are opaque blobs; neither the client nor the server looks inside.

use bassline_core::{PeerId, RoomCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Extra data attached to `peer-joined`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerJoinedData {
    pub is_host: bool,
}

/// One signaling frame
///
/// Relay frames (`offer`, `answer`, `ice-candidate`) are sent with
/// `target_peer_id` set; the server forwards them with `peer_id` set to the
/// sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum SignalMessage {
    CreateRoom {
        room_code: RoomCode,
    },
    JoinRoom {
        room_code: RoomCode,
    },
    RoomCreated {
        room_code: RoomCode,
        peer_id: PeerId,
    },
    RoomJoined {
        room_code: RoomCode,
        peer_id: PeerId,
    },
    PeerJoined {
        peer_id: PeerId,
        #[serde(default)]
        data: PeerJoinedData,
    },
    PeerLeft {
        peer_id: PeerId,
    },
    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<PeerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_peer_id: Option<PeerId>,
        offer: Value,
    },
    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<PeerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_peer_id: Option<PeerId>,
        answer: Value,
    },
    IceCandidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<PeerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_peer_id: Option<PeerId>,
        candidate: Value,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

impl SignalMessage {
    /// Wire name of the frame type
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::CreateRoom { .. } => "create-room",
            SignalMessage::JoinRoom { .. } => "join-room",
            SignalMessage::RoomCreated { .. } => "room-created",
            SignalMessage::RoomJoined { .. } => "room-joined",
            SignalMessage::PeerJoined { .. } => "peer-joined",
            SignalMessage::PeerLeft { .. } => "peer-left",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice-candidate",
            SignalMessage::Error { .. } => "error",
        }
    }

    /// Relay target of an `offer`/`answer`/`ice-candidate` frame
    pub fn target(&self) -> Option<&PeerId> {
        match self {
            SignalMessage::Offer { target_peer_id, .. }
            | SignalMessage::Answer { target_peer_id, .. }
            | SignalMessage::IceCandidate { target_peer_id, .. } => target_peer_id.as_ref(),
            _ => None,
        }
    }

    /// Copy of a relay frame stamped with its sender, as forwarded by the server
    pub fn relayed_from(&self, sender: &PeerId) -> Option<SignalMessage> {
        let peer_id = Some(sender.clone());
        match self.clone() {
            SignalMessage::Offer { offer, .. } => Some(SignalMessage::Offer {
                peer_id,
                target_peer_id: None,
                offer,
            }),
            SignalMessage::Answer { answer, .. } => Some(SignalMessage::Answer {
                peer_id,
                target_peer_id: None,
                answer,
            }),
            SignalMessage::IceCandidate { candidate, .. } => Some(SignalMessage::IceCandidate {
                peer_id,
                target_peer_id: None,
                candidate,
            }),
            _ => None,
        }
    }
}
