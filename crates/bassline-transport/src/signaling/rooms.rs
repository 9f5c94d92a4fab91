//! Rendezvous room bookkeeping
//!
//! Pure state for a rendezvous server: which peers are in which room, who
//! created it, and where relay frames go. Servers (in-memory or WebSocket) feed
//! every inbound frame through [`RoomRegistry::handle`] and deliver the returned
//! [`Routed`] frames.

use super::protocol::{PeerJoinedData, SignalMessage};
use bassline_core::{PeerId, RoomCode};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// A frame addressed to one connected peer
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    pub to: PeerId,
    pub message: SignalMessage,
}

impl Routed {
    fn new(to: &PeerId, message: SignalMessage) -> Self {
        Self {
            to: to.clone(),
            message,
        }
    }
}

#[derive(Debug, Default)]
struct Room {
    // peer -> is_host
    members: BTreeMap<PeerId, bool>,
}

/// Room membership and relay routing for one rendezvous server
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomCode, Room>,
    membership: HashMap<PeerId, RoomCode>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a newly connected client
    pub fn register(&mut self) -> PeerId {
        PeerId::generate()
    }

    /// Number of open rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Members of a room with their host flag
    pub fn members(&self, room: &RoomCode) -> Vec<(PeerId, bool)> {
        self.rooms
            .get(room)
            .map(|r| r.members.iter().map(|(p, h)| (p.clone(), *h)).collect())
            .unwrap_or_default()
    }

    /// Process one frame sent by `from`
    pub fn handle(&mut self, from: &PeerId, message: SignalMessage) -> Vec<Routed> {
        match message {
            SignalMessage::CreateRoom { room_code } => self.create_room(from, room_code),
            SignalMessage::JoinRoom { room_code } => self.join_room(from, room_code),
            relay @ (SignalMessage::Offer { .. }
            | SignalMessage::Answer { .. }
            | SignalMessage::IceCandidate { .. }) => self.relay(from, &relay),
            other => {
                debug!(peer = %from, kind = other.kind(), "Ignoring client frame");
                Vec::new()
            }
        }
    }

    /// Remove a disconnected client and notify the rest of its room
    pub fn disconnect(&mut self, peer: &PeerId) -> Vec<Routed> {
        let Some(code) = self.membership.remove(peer) else {
            return Vec::new();
        };
        let Some(room) = self.rooms.get_mut(&code) else {
            return Vec::new();
        };
        room.members.remove(peer);
        let notices: Vec<Routed> = room
            .members
            .keys()
            .map(|other| {
                Routed::new(
                    other,
                    SignalMessage::PeerLeft {
                        peer_id: peer.clone(),
                    },
                )
            })
            .collect();
        if room.members.is_empty() {
            info!(room = %code, "Closing empty room");
            self.rooms.remove(&code);
        }
        notices
    }

    fn create_room(&mut self, from: &PeerId, code: RoomCode) -> Vec<Routed> {
        if self.rooms.contains_key(&code) {
            return vec![Routed::new(
                from,
                SignalMessage::Error {
                    message: format!("Room already exists: {code}"),
                },
            )];
        }
        let mut room = Room::default();
        room.members.insert(from.clone(), true);
        self.rooms.insert(code.clone(), room);
        self.membership.insert(from.clone(), code.clone());
        info!(room = %code, host = %from, "Room created");
        vec![Routed::new(
            from,
            SignalMessage::RoomCreated {
                room_code: code,
                peer_id: from.clone(),
            },
        )]
    }

    fn join_room(&mut self, from: &PeerId, code: RoomCode) -> Vec<Routed> {
        let Some(room) = self.rooms.get_mut(&code) else {
            return vec![Routed::new(
                from,
                SignalMessage::Error {
                    message: format!("Room not found: {code}"),
                },
            )];
        };

        let mut out = vec![Routed::new(
            from,
            SignalMessage::RoomJoined {
                room_code: code.clone(),
                peer_id: from.clone(),
            },
        )];
        for (member, is_host) in &room.members {
            out.push(Routed::new(
                member,
                SignalMessage::PeerJoined {
                    peer_id: from.clone(),
                    data: PeerJoinedData { is_host: false },
                },
            ));
            out.push(Routed::new(
                from,
                SignalMessage::PeerJoined {
                    peer_id: member.clone(),
                    data: PeerJoinedData { is_host: *is_host },
                },
            ));
        }
        room.members.insert(from.clone(), false);
        self.membership.insert(from.clone(), code.clone());
        info!(room = %code, peer = %from, "Peer joined room");
        out
    }

    fn relay(&mut self, from: &PeerId, frame: &SignalMessage) -> Vec<Routed> {
        let same_room = |target: &PeerId| {
            self.membership.get(from).is_some() && self.membership.get(from) == self.membership.get(target)
        };
        match (frame.target(), frame.relayed_from(from)) {
            (Some(target), Some(relayed)) if same_room(target) => {
                vec![Routed::new(target, relayed)]
            }
            (target, _) => vec![Routed::new(
                from,
                SignalMessage::Error {
                    message: format!(
                        "Peer not found: {}",
                        target.map(PeerId::as_str).unwrap_or("<none>")
                    ),
                },
            )],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room(code: &str) -> RoomCode {
        RoomCode::new(code)
    }

    #[test]
    fn joiner_learns_existing_members_and_they_learn_joiner() {
        let mut registry = RoomRegistry::new();
        let host = registry.register();
        let guest = registry.register();
        registry.handle(&host, SignalMessage::CreateRoom { room_code: room("ABC123") });

        let routed = registry.handle(&guest, SignalMessage::JoinRoom { room_code: room("ABC123") });

        assert!(routed.contains(&Routed::new(
            &guest,
            SignalMessage::RoomJoined {
                room_code: room("ABC123"),
                peer_id: guest.clone()
            }
        )));
        assert!(routed.contains(&Routed::new(
            &host,
            SignalMessage::PeerJoined {
                peer_id: guest.clone(),
                data: PeerJoinedData { is_host: false }
            }
        )));
        assert!(routed.contains(&Routed::new(
            &guest,
            SignalMessage::PeerJoined {
                peer_id: host.clone(),
                data: PeerJoinedData { is_host: true }
            }
        )));
    }

    #[test]
    fn joining_unknown_room_is_an_error() {
        let mut registry = RoomRegistry::new();
        let guest = registry.register();
        let routed = registry.handle(&guest, SignalMessage::JoinRoom { room_code: room("NOPE00") });
        assert_eq!(routed.len(), 1);
        assert!(matches!(routed[0].message, SignalMessage::Error { .. }));
    }

    #[test]
    fn duplicate_room_code_is_rejected() {
        let mut registry = RoomRegistry::new();
        let a = registry.register();
        let b = registry.register();
        registry.handle(&a, SignalMessage::CreateRoom { room_code: room("R") });
        let routed = registry.handle(&b, SignalMessage::CreateRoom { room_code: room("R") });
        assert!(matches!(routed[0].message, SignalMessage::Error { .. }));
    }

    #[test]
    fn relay_is_confined_to_room() {
        let mut registry = RoomRegistry::new();
        let host = registry.register();
        let guest = registry.register();
        let outsider = registry.register();
        registry.handle(&host, SignalMessage::CreateRoom { room_code: room("R1") });
        registry.handle(&guest, SignalMessage::JoinRoom { room_code: room("R1") });
        registry.handle(&outsider, SignalMessage::CreateRoom { room_code: room("R2") });

        let offer = SignalMessage::Offer {
            peer_id: None,
            target_peer_id: Some(guest.clone()),
            offer: json!({"sdp": 1}),
        };
        let routed = registry.handle(&host, offer.clone());
        assert_eq!(routed[0].to, guest);
        assert!(matches!(
            &routed[0].message,
            SignalMessage::Offer { peer_id: Some(p), .. } if *p == host
        ));

        let routed = registry.handle(&outsider, offer);
        assert_eq!(routed[0].to, outsider);
        assert!(matches!(routed[0].message, SignalMessage::Error { .. }));
    }

    #[test]
    fn disconnect_notifies_remaining_members_and_closes_empty_rooms() {
        let mut registry = RoomRegistry::new();
        let host = registry.register();
        let guest = registry.register();
        registry.handle(&host, SignalMessage::CreateRoom { room_code: room("R") });
        registry.handle(&guest, SignalMessage::JoinRoom { room_code: room("R") });

        let routed = registry.disconnect(&guest);
        assert_eq!(
            routed,
            vec![Routed::new(
                &host,
                SignalMessage::PeerLeft {
                    peer_id: guest.clone()
                }
            )]
        );
        assert!(registry.disconnect(&host).is_empty());
        assert_eq!(registry.room_count(), 0);
    }
}
