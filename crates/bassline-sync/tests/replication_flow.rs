//! Replication Flow Tests
//!
//! A host engine and guest engines wired together through an in-test message
//! queue, so ordering, loss and duplication can be controlled exactly.

use assert_matches::assert_matches;
use bassline_core::{
    Change, ContactId, GroupId, NetworkError, NetworkResult, NewContact, PeerId, Role, RoomCode,
};
use bassline_sync::{DataMessage, Effect, EngineConfig, Mutation, ReplicationEngine};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

// ============================================================================
// Harness
// ============================================================================

const ROOM: &str = "ABC123";

struct Room {
    host_id: PeerId,
    host: ReplicationEngine,
    guest_id: PeerId,
    guest: ReplicationEngine,
    // (from, to, message)
    wire: VecDeque<(PeerId, PeerId, DataMessage)>,
}

impl Room {
    fn new() -> Self {
        let host_id = PeerId::new("host");
        let guest_id = PeerId::new("guest");
        let mut host = ReplicationEngine::new(Role::Host, EngineConfig::default());
        host.set_identity(host_id.clone(), RoomCode::new(ROOM));
        let mut guest = ReplicationEngine::new(Role::Guest, EngineConfig::default());
        guest.set_identity(guest_id.clone(), RoomCode::new(ROOM));
        Self {
            host_id,
            host,
            guest_id,
            guest,
            wire: VecDeque::new(),
        }
    }

    /// Channel opens: both sides greet each other
    fn connect(&mut self) {
        let host_hello = self.host.role_announce().unwrap();
        let guest_hello = self.guest.role_announce().unwrap();
        self.wire
            .push_back((self.host_id.clone(), self.guest_id.clone(), host_hello));
        self.wire
            .push_back((self.guest_id.clone(), self.host_id.clone(), guest_hello));
        self.deliver_all();
    }

    fn route(&mut self, from: &PeerId, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { peer, message } => {
                    self.wire.push_back((from.clone(), peer, message))
                }
                Effect::Broadcast { message } => {
                    let to = if *from == self.host_id {
                        self.guest_id.clone()
                    } else {
                        self.host_id.clone()
                    };
                    self.wire.push_back((from.clone(), to, message));
                }
                _ => {}
            }
        }
    }

    fn deliver_one(&mut self) -> bool {
        let Some((from, to, message)) = self.wire.pop_front() else {
            return false;
        };
        let effects = if to == self.host_id {
            self.host.handle_message(&from, message)
        } else {
            self.guest.handle_message(&from, message)
        };
        self.route(&to, effects);
        true
    }

    fn deliver_all(&mut self) {
        while self.deliver_one() {}
    }

    fn host_run(&mut self, mutation: Mutation) -> NetworkResult<Value> {
        let (tx, mut rx) = oneshot::channel();
        let effects = self.host.submit(mutation, tx);
        let host_id = self.host_id.clone();
        self.route(&host_id, effects);
        rx.try_recv().unwrap()
    }

    fn guest_submit(&mut self, mutation: Mutation) -> oneshot::Receiver<NetworkResult<Value>> {
        let (tx, rx) = oneshot::channel();
        let effects = self.guest.submit(mutation, tx);
        let guest_id = self.guest_id.clone();
        self.route(&guest_id, effects);
        rx
    }

    fn guest_content(&self, contact: &str) -> Option<Value> {
        self.guest
            .state(&GroupId::root())?
            .state
            .contact(&ContactId::new(contact))
            .map(|c| c.content.clone())
    }
}

fn add(id: &str, content: Value) -> Mutation {
    Mutation::AddContact {
        group_id: GroupId::root(),
        contact: NewContact::merge(content).with_id(id),
    }
}

fn update(id: &str, content: Value) -> Mutation {
    Mutation::ScheduleUpdate {
        contact_id: ContactId::new(id),
        content,
    }
}

// ============================================================================
// Bootstrap and incremental changes
// ============================================================================

#[test]
fn guest_bootstraps_then_follows_changes() {
    let mut room = Room::new();
    room.host_run(add("c1", json!([1]))).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let (_, effects) = room.guest.subscribe(
        GroupId::root(),
        Arc::new(move |changes: &[Change]| sink.lock().unwrap().extend(changes.to_vec())),
    );
    assert!(effects.is_empty(), "no host yet, nothing to request");

    room.connect();
    assert_eq!(room.guest.host_peer(), Some(&room.host_id));
    assert_eq!(room.guest.version(&GroupId::root()), Some(1));
    assert_eq!(room.guest_content("c1"), Some(json!([1])));

    room.host_run(update("c1", json!([2]))).unwrap();
    room.deliver_all();
    assert_eq!(room.guest.version(&GroupId::root()), Some(2));
    assert_eq!(room.guest_content("c1"), Some(json!([1, 2])));

    let kinds: Vec<&str> = seen.lock().unwrap().iter().map(Change::kind).collect();
    assert_eq!(kinds, vec!["contact-added", "contact-updated"]);
}

#[test]
fn version_gap_triggers_resync_instead_of_out_of_order_apply() {
    let mut room = Room::new();
    room.connect();
    room.host_run(add("c1", json!([]))).unwrap();
    room.deliver_all();

    room.host_run(update("c1", json!(["a"]))).unwrap();
    room.host_run(update("c1", json!(["b"]))).unwrap();
    // Lose version 2.
    let lost = room.wire.pop_front().unwrap();
    assert_matches!(lost.2, DataMessage::Change { version: 2, .. });

    assert!(room.deliver_one());
    assert!(room.guest.state(&GroupId::root()).is_none(), "cache dropped on gap");
    assert_matches!(
        room.wire.front(),
        Some((_, _, DataMessage::StateRequest { group_id })) if group_id.is_root()
    );

    room.deliver_all();
    assert_eq!(room.guest.version(&GroupId::root()), Some(3));
    assert_eq!(room.guest_content("c1"), Some(json!(["a", "b"])));
}

#[test]
fn resync_reports_removals_missed_during_the_gap() {
    let mut room = Room::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    room.guest.subscribe(
        GroupId::root(),
        Arc::new(move |changes: &[Change]| sink.lock().unwrap().extend(changes.to_vec())),
    );
    room.connect();
    room.host_run(add("x", json!([1]))).unwrap();
    room.deliver_all();

    room.host_run(Mutation::RemoveContact {
        contact_id: ContactId::new("x"),
    })
    .unwrap();
    room.host_run(add("y", json!([2]))).unwrap();
    // Both broadcasts are lost.
    room.wire.clear();
    room.host_run(add("z", json!([3]))).unwrap();
    room.deliver_all();

    assert_eq!(room.guest.version(&GroupId::root()), Some(4));
    assert_eq!(room.guest_content("x"), None);
    let seen = seen.lock().unwrap();
    let removed: Vec<&str> = seen
        .iter()
        .filter_map(|c| match c {
            Change::ContactRemoved { contact_id, .. } => Some(contact_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(removed, vec!["x"]);
    let mut added: Vec<&str> = seen
        .iter()
        .filter_map(|c| match c {
            Change::ContactAdded { contact, .. } => Some(contact.id.as_str()),
            _ => None,
        })
        .collect();
    added.sort();
    assert_eq!(added, vec!["x", "y", "z"]);
}

#[test]
fn contact_ids_are_unique_across_groups() {
    let mut room = Room::new();
    room.host_run(Mutation::AddGroup {
        parent_id: GroupId::root(),
        group: bassline_core::Group::new("g", "G"),
    })
    .unwrap();
    room.host_run(add("dup", json!([1]))).unwrap();

    let result = room.host_run(Mutation::AddContact {
        group_id: GroupId::new("g"),
        contact: NewContact::new(json!(2)).with_id("dup"),
    });
    assert_eq!(
        result,
        Err(NetworkError::ContactExists {
            contact_id: ContactId::new("dup")
        })
    );
    let sub = room.host.state(&GroupId::new("g")).unwrap();
    assert!(sub.state.contact(&ContactId::new("dup")).is_none());
    assert_eq!(sub.version, 0);

    // Re-adding into the owning group still blends.
    room.host_run(add("dup", json!([2]))).unwrap();
    let root = room.host.state(&GroupId::root()).unwrap();
    assert_eq!(
        root.state.contact(&ContactId::new("dup")).unwrap().content,
        json!([1, 2])
    );

    // The guest sees the typed error too.
    room.connect();
    let mut reply = room.guest_submit(Mutation::AddContact {
        group_id: GroupId::new("g"),
        contact: NewContact::new(json!(3)).with_id("dup"),
    });
    room.deliver_all();
    assert_matches!(
        reply.try_recv().unwrap(),
        Err(NetworkError::ContactExists { contact_id }) if contact_id.as_str() == "dup"
    );
}

#[test]
fn duplicate_change_is_ignored() {
    let mut room = Room::new();
    room.connect();
    room.host_run(add("c1", json!(1))).unwrap();
    let duplicate = room.wire.front().cloned().unwrap();
    room.deliver_all();
    room.wire.push_back(duplicate);
    room.deliver_all();
    assert_eq!(room.guest.version(&GroupId::root()), Some(1));
}

#[test]
fn change_for_unbootstrapped_group_is_dropped_and_requested() {
    let mut room = Room::new();
    room.host_run(Mutation::AddGroup {
        parent_id: GroupId::root(),
        group: bassline_core::Group::new("g", "G"),
    })
    .unwrap();
    room.connect();

    let (_, effects) = room.guest.subscribe(GroupId::new("g"), Arc::new(|_: &[Change]| {}));
    // Hold back the bootstrap for "g" so the next change arrives first.
    assert_eq!(effects.len(), 1);

    room.host_run(Mutation::AddContact {
        group_id: GroupId::new("g"),
        contact: NewContact::new(json!("x")).with_id("gx"),
    })
    .unwrap();
    let change = room.wire.pop_front().unwrap();
    let effects = room.guest.handle_message(&change.0, change.2);
    assert!(effects.is_empty(), "already requested, nothing more to send");
    assert!(room.guest.state(&GroupId::new("g")).is_none());

    let guest_id = room.guest_id.clone();
    room.route(&guest_id, vec![Effect::Send {
        peer: room.host_id.clone(),
        message: DataMessage::StateRequest {
            group_id: GroupId::new("g"),
        },
    }]);
    room.deliver_all();
    assert_eq!(room.guest.version(&GroupId::new("g")), Some(1));
}

// ============================================================================
// Guest mutations through the host
// ============================================================================

#[tokio::test]
async fn guest_mutation_round_trips_and_cache_follows_broadcast() {
    let mut room = Room::new();
    room.connect();

    let pending = room.guest_submit(add("from-guest", json!([7])));
    assert_eq!(room.guest.pending().len(), 1);
    assert_eq!(room.guest_content("from-guest"), None, "no optimistic apply");

    room.deliver_all();
    assert_eq!(pending.await.unwrap().unwrap(), json!("from-guest"));
    assert_eq!(room.guest_content("from-guest"), Some(json!([7])));
    assert!(room.guest.pending().is_empty());
}

#[tokio::test]
async fn host_errors_surface_typed_on_the_guest() {
    let mut room = Room::new();
    room.connect();
    let pending = room.guest_submit(Mutation::Connect {
        from_id: ContactId::new("nope"),
        to_id: ContactId::new("nada"),
        wire_type: Default::default(),
    });
    room.deliver_all();
    assert_eq!(
        pending.await.unwrap(),
        Err(NetworkError::ContactNotFound {
            contact_id: ContactId::new("nope")
        })
    );
}

#[tokio::test]
async fn host_departure_rejects_in_flight_requests() {
    let mut room = Room::new();
    room.connect();
    let pending = room.guest_submit(add("x", json!(1)));
    let host_id = room.host_id.clone();
    room.guest.on_peer_disconnected(&host_id);

    assert_eq!(
        pending.await.unwrap(),
        Err(NetworkError::PeerUnavailable { peer_id: host_id })
    );
    assert!(!room.guest.is_host_connected());
    let again = room.guest_submit(add("y", json!(1)));
    assert_eq!(again.await.unwrap(), Err(NetworkError::NotConnectedToHost));
}

#[tokio::test(start_paused = true)]
async fn silent_host_times_out_request() {
    let mut room = Room::new();
    room.connect();
    let pending = room.guest_submit(add("x", json!(1)));
    room.wire.clear();

    let deadline = room.guest.next_deadline().unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    let expired = room.guest.expire_requests(deadline);
    assert_eq!(expired.len(), 1);
    assert_matches!(
        pending.await.unwrap(),
        Err(NetworkError::RequestTimeout { timeout_ms: 30_000, .. })
    );
    assert!(room.guest.pending().is_empty());
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn observed_versions_increase_by_one(updates in prop::collection::vec(0u8..10, 1..20)) {
        let mut room = Room::new();
        room.connect();
        room.host_run(add("c", json!([]))).unwrap();
        room.deliver_all();

        let observed = Arc::new(Mutex::new(Vec::new()));
        for n in updates {
            room.host_run(update("c", json!([n]))).unwrap();
            while let Some((from, to, message)) = room.wire.pop_front() {
                if let DataMessage::Change { version, .. } = &message {
                    if to == room.guest_id {
                        observed.lock().unwrap().push(*version);
                    }
                }
                let effects = if to == room.host_id {
                    room.host.handle_message(&from, message)
                } else {
                    room.guest.handle_message(&from, message)
                };
                room.route(&to, effects);
            }
        }
        let observed = observed.lock().unwrap();
        for pair in observed.windows(2) {
            prop_assert_eq!(pair[1], pair[0] + 1);
        }
        prop_assert_eq!(room.guest.version(&GroupId::root()), room.host.version(&GroupId::root()));
    }
}
