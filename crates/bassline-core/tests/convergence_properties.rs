//! Convergence Properties
//!
//! Replicas that apply the same multiset of merge-mode changes, in any order and
//! with duplicates, end up with identical contact maps.

use bassline_core::{
    BlendMode, Change, Contact, ContactId, ContactUpdates, Group, GroupId, GroupState,
};
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// Fixtures
// ============================================================================

fn seeded_state(contacts: &[&str]) -> GroupState {
    let mut state = GroupState::new(Group::root());
    for id in contacts {
        state.apply(&Change::ContactAdded {
            contact: Contact {
                id: ContactId::new(*id),
                group_id: GroupId::root(),
                content: json!([]),
                blend_mode: BlendMode::Merge,
                name: None,
            },
            boundary: false,
        });
    }
    state
}

fn update(contact: &str, content: Value) -> Change {
    Change::ContactUpdated {
        contact_id: ContactId::new(contact),
        group_id: GroupId::root(),
        updates: ContactUpdates::content(content),
    }
}

fn arb_update() -> impl Strategy<Value = Change> {
    let contact = prop_oneof![Just("a"), Just("b"), Just("c")];
    let content = prop_oneof![
        prop::collection::vec(0u8..20, 0..5).prop_map(|items| json!(items)),
        (0i64..100).prop_map(|n| json!(n)),
    ];
    (contact, content).prop_map(|(contact, content)| update(contact, content))
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn wired_sets_union_regardless_of_apply_order() {
    let mut forward = seeded_state(&["a"]);
    let mut backward = seeded_state(&["a"]);
    let first = update("a", json!([1, 2, 3]));
    let second = update("a", json!([3, 4, 5]));

    forward.apply(&first);
    forward.apply(&second);
    backward.apply(&second);
    backward.apply(&first);

    let expected = json!([1, 2, 3, 4, 5]);
    assert_eq!(forward.contact(&ContactId::new("a")).unwrap().content, expected);
    assert_eq!(forward.contacts, backward.contacts);
}

#[test]
fn duplicate_delivery_is_harmless() {
    let mut once = seeded_state(&["a"]);
    let mut twice = seeded_state(&["a"]);
    let change = update("a", json!(["x"]));

    once.apply(&change);
    twice.apply(&change);
    twice.apply(&change);

    assert_eq!(once.contacts, twice.contacts);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn merge_replicas_converge(
        changes in prop::collection::vec(arb_update(), 0..12),
        seed in any::<u64>(),
    ) {
        let mut shuffled = changes.clone();
        // Deterministic permutation driven by the generated seed.
        let len = shuffled.len();
        if len > 1 {
            let mut state = seed;
            for i in (1..len).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }
        }

        let mut replica_a = seeded_state(&["a", "b", "c"]);
        let mut replica_b = seeded_state(&["a", "b", "c"]);
        for change in &changes {
            replica_a.apply(change);
        }
        for change in &shuffled {
            replica_b.apply(change);
        }

        prop_assert_eq!(replica_a.contacts, replica_b.contacts);
        prop_assert_eq!(replica_a.wires, replica_b.wires);
    }
}
