//! Replicated graph model
//!
//! Groups form a tree rooted at [`GroupId::root`]. Each group owns its contacts
//! (value cells) and the wires recorded in it. A [`GroupState`] bundles one group
//! with its contacts and wires; [`VersionedGroupState`] pairs it with the
//! per-group version assigned by the host.

use crate::blend::BlendMode;
use crate::change::{Change, ContactUpdates};
use crate::identifiers::{ContactId, GroupId, WireId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Direction of a wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireType {
    /// Values flow from `from_id` to `to_id`
    #[default]
    Directed,
    /// Values flow both ways
    Bidirectional,
}

/// Edge between two contacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wire {
    /// Wire id, unique network-wide
    pub id: WireId,
    /// Source contact; the wire lives in this contact's group
    pub from_id: ContactId,
    /// Target contact
    pub to_id: ContactId,
    /// Direction
    #[serde(rename = "type")]
    pub wire_type: WireType,
}

/// Named mutable subgraph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Group id
    pub id: GroupId,
    /// Display name
    pub name: String,
    /// Contacts owned by the group, in insertion order
    #[serde(default)]
    pub contact_ids: Vec<ContactId>,
    /// Wires recorded in the group
    #[serde(default)]
    pub wire_ids: Vec<WireId>,
    /// Direct children
    #[serde(default)]
    pub subgroup_ids: Vec<GroupId>,
    /// Contacts exposed on the group boundary
    #[serde(default)]
    pub boundary_contact_ids: Vec<ContactId>,
    /// Parent group; `None` for top-level groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<GroupId>,
}

impl Group {
    /// Empty group with no parent
    pub fn new(id: impl Into<GroupId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            contact_ids: Vec::new(),
            wire_ids: Vec::new(),
            subgroup_ids: Vec::new(),
            boundary_contact_ids: Vec::new(),
            parent_id: None,
        }
    }

    /// The well-known root group
    pub fn root() -> Self {
        Self::new(GroupId::root(), "Root")
    }

    /// Set the parent group
    pub fn with_parent(mut self, parent: GroupId) -> Self {
        self.parent_id = Some(parent);
        self
    }
}

/// Mergeable value cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Contact id, unique network-wide
    pub id: ContactId,
    /// Owning group
    pub group_id: GroupId,
    /// Current content
    pub content: Value,
    /// How incoming content combines with the current value
    pub blend_mode: BlendMode,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Parameters of `addContact`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    /// Caller-chosen id; the host generates one when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ContactId>,
    /// Initial content
    #[serde(default)]
    pub content: Value,
    /// Blend mode of the new contact
    #[serde(default)]
    pub blend_mode: BlendMode,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expose the contact on the group boundary
    #[serde(default)]
    pub boundary: bool,
}

impl NewContact {
    /// `accept-last` contact holding `content`
    pub fn new(content: Value) -> Self {
        Self {
            id: None,
            content,
            blend_mode: BlendMode::AcceptLast,
            name: None,
            boundary: false,
        }
    }

    /// `merge` contact holding `content`
    pub fn merge(content: Value) -> Self {
        Self {
            blend_mode: BlendMode::Merge,
            ..Self::new(content)
        }
    }

    /// Use a caller-chosen id
    pub fn with_id(mut self, id: impl Into<ContactId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the display name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Place the contact on the group boundary
    pub fn on_boundary(mut self) -> Self {
        self.boundary = true;
        self
    }
}

/// Authoritative (host) or cached (guest) bundle for one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupState {
    /// Group metadata
    pub group: Group,
    /// Contacts by id
    #[serde(default)]
    pub contacts: BTreeMap<ContactId, Contact>,
    /// Wires by id
    #[serde(default)]
    pub wires: BTreeMap<WireId, Wire>,
}

impl GroupState {
    /// State holding only `group`
    pub fn new(group: Group) -> Self {
        Self {
            group,
            contacts: BTreeMap::new(),
            wires: BTreeMap::new(),
        }
    }

    /// Id of the group
    pub fn id(&self) -> &GroupId {
        &self.group.id
    }

    /// Look up a contact
    pub fn contact(&self, id: &ContactId) -> Option<&Contact> {
        self.contacts.get(id)
    }

    /// Look up a wire
    pub fn wire(&self, id: &WireId) -> Option<&Wire> {
        self.wires.get(id)
    }

    /// Apply one change to this state
    ///
    /// Returns `false` when the change does not touch this group or references an
    /// entity that no longer exists; such changes are ignored rather than treated
    /// as errors so replicas keep converging.
    pub fn apply(&mut self, change: &Change) -> bool {
        match change {
            Change::ContactAdded { contact, boundary } => {
                if contact.group_id != self.group.id {
                    return false;
                }
                let mut contact = contact.clone();
                if let Some(existing) = self.contacts.get(&contact.id) {
                    contact.content = existing.blend_mode.blend(&existing.content, &contact.content);
                }
                push_unique(&mut self.group.contact_ids, &contact.id);
                if *boundary {
                    push_unique(&mut self.group.boundary_contact_ids, &contact.id);
                }
                self.contacts.insert(contact.id.clone(), contact);
                true
            }
            Change::ContactUpdated {
                contact_id,
                group_id,
                updates,
            } => {
                if *group_id != self.group.id {
                    return false;
                }
                let Some(contact) = self.contacts.get_mut(contact_id) else {
                    return false;
                };
                if let Some(content) = &updates.content {
                    contact.content = contact.blend_mode.blend(&contact.content, content);
                }
                if let Some(name) = &updates.name {
                    contact.name = Some(name.clone());
                }
                true
            }
            Change::ContactRemoved {
                contact_id,
                group_id,
            } => {
                if *group_id != self.group.id {
                    return false;
                }
                self.group.contact_ids.retain(|id| id != contact_id);
                self.group.boundary_contact_ids.retain(|id| id != contact_id);
                self.contacts.remove(contact_id).is_some()
            }
            Change::WireAdded { group_id, wire } => {
                if *group_id != self.group.id {
                    return false;
                }
                push_unique(&mut self.group.wire_ids, &wire.id);
                self.wires.insert(wire.id.clone(), wire.clone());
                true
            }
            Change::WireRemoved { group_id, wire_id } => {
                if *group_id != self.group.id {
                    return false;
                }
                self.group.wire_ids.retain(|id| id != wire_id);
                self.wires.remove(wire_id).is_some()
            }
            Change::GroupAdded { parent_id, group } => {
                if parent_id.as_ref() != Some(&self.group.id) {
                    return group.id == self.group.id;
                }
                push_unique(&mut self.group.subgroup_ids, &group.id);
                true
            }
            Change::GroupRemoved {
                group_id,
                parent_id,
            } => {
                if parent_id.as_ref() != Some(&self.group.id) {
                    return false;
                }
                let before = self.group.subgroup_ids.len();
                self.group.subgroup_ids.retain(|id| id != group_id);
                before != self.group.subgroup_ids.len()
            }
        }
    }

    /// Changes that transform `self` into `next`
    ///
    /// Covers contacts and wires. Subgroup membership is visible through
    /// `next.group.subgroup_ids`; the subgroups' own records are not part of a
    /// group snapshot.
    pub fn diff(&self, next: &GroupState) -> Vec<Change> {
        let group_id = next.group.id.clone();
        let mut changes = Vec::new();

        for id in self.wires.keys() {
            if !next.wires.contains_key(id) {
                changes.push(Change::WireRemoved {
                    group_id: group_id.clone(),
                    wire_id: id.clone(),
                });
            }
        }
        for (id, contact) in &self.contacts {
            if !next.contacts.contains_key(id) {
                changes.push(Change::ContactRemoved {
                    contact_id: contact.id.clone(),
                    group_id: group_id.clone(),
                });
            }
        }
        for (id, contact) in &next.contacts {
            match self.contacts.get(id) {
                None => changes.push(Change::ContactAdded {
                    contact: contact.clone(),
                    boundary: next.group.boundary_contact_ids.contains(id),
                }),
                Some(previous) if previous != contact => {
                    let name = if previous.name != contact.name {
                        contact.name.clone()
                    } else {
                        None
                    };
                    changes.push(Change::ContactUpdated {
                        contact_id: id.clone(),
                        group_id: group_id.clone(),
                        updates: ContactUpdates {
                            content: Some(contact.content.clone()),
                            name,
                        },
                    });
                }
                Some(_) => {}
            }
        }
        for (id, wire) in &next.wires {
            if !self.wires.contains_key(id) {
                changes.push(Change::WireAdded {
                    group_id: group_id.clone(),
                    wire: wire.clone(),
                });
            }
        }
        changes
    }
}

fn push_unique<T: PartialEq + Clone>(list: &mut Vec<T>, item: &T) {
    if !list.contains(item) {
        list.push(item.clone());
    }
}

/// Group state paired with the host-assigned version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedGroupState {
    /// Group contents
    pub state: GroupState,
    /// Number of changes the host has applied to the group
    pub version: u64,
}

impl VersionedGroupState {
    /// Version 0 state for a freshly materialized group
    pub fn initial(group: Group) -> Self {
        Self {
            state: GroupState::new(group),
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merge_contact(id: &str, content: Value) -> Contact {
        Contact {
            id: ContactId::new(id),
            group_id: GroupId::root(),
            content,
            blend_mode: BlendMode::Merge,
            name: None,
        }
    }

    fn root_with(contacts: Vec<Contact>) -> GroupState {
        let mut state = GroupState::new(Group::root());
        for contact in contacts {
            state.apply(&Change::ContactAdded {
                contact,
                boundary: false,
            });
        }
        state
    }

    #[test]
    fn update_of_missing_contact_is_ignored() {
        let mut state = GroupState::new(Group::root());
        let applied = state.apply(&Change::ContactUpdated {
            contact_id: ContactId::new("ghost"),
            group_id: GroupId::root(),
            updates: ContactUpdates::content(json!(1)),
        });
        assert!(!applied);
        assert!(state.contacts.is_empty());
    }

    #[test]
    fn change_for_other_group_is_ignored() {
        let mut state = GroupState::new(Group::root());
        let mut contact = merge_contact("c", json!([1]));
        contact.group_id = GroupId::new("elsewhere");
        assert!(!state.apply(&Change::ContactAdded {
            contact,
            boundary: false
        }));
    }

    #[test]
    fn merge_update_joins_content() {
        let mut state = root_with(vec![merge_contact("c", json!([1, 2, 3]))]);
        state.apply(&Change::ContactUpdated {
            contact_id: ContactId::new("c"),
            group_id: GroupId::root(),
            updates: ContactUpdates::content(json!([3, 4, 5])),
        });
        assert_eq!(
            state.contact(&ContactId::new("c")).unwrap().content,
            json!([1, 2, 3, 4, 5])
        );
    }

    #[test]
    fn removal_keeps_dangling_wires() {
        let mut state = root_with(vec![
            merge_contact("a", json!([])),
            merge_contact("b", json!([])),
        ]);
        let wire = Wire {
            id: WireId::new("w"),
            from_id: ContactId::new("a"),
            to_id: ContactId::new("b"),
            wire_type: WireType::Directed,
        };
        state.apply(&Change::WireAdded {
            group_id: GroupId::root(),
            wire,
        });
        state.apply(&Change::ContactRemoved {
            contact_id: ContactId::new("a"),
            group_id: GroupId::root(),
        });
        assert!(state.wire(&WireId::new("w")).is_some());
        assert_eq!(state.group.contact_ids, vec![ContactId::new("b")]);
    }

    #[test]
    fn subgroup_membership_tracks_group_changes() {
        let mut state = GroupState::new(Group::root());
        let child = Group::new("child", "Child").with_parent(GroupId::root());
        state.apply(&Change::GroupAdded {
            parent_id: Some(GroupId::root()),
            group: child,
        });
        assert_eq!(state.group.subgroup_ids, vec![GroupId::new("child")]);
        state.apply(&Change::GroupRemoved {
            group_id: GroupId::new("child"),
            parent_id: Some(GroupId::root()),
        });
        assert!(state.group.subgroup_ids.is_empty());
    }

    #[test]
    fn diff_replays_into_target_state() {
        let before = root_with(vec![
            merge_contact("keep", json!([1])),
            merge_contact("drop", json!([2])),
        ]);
        let after = root_with(vec![
            merge_contact("keep", json!([1, 9])),
            merge_contact("new", json!([3])),
        ]);

        let mut replayed = before.clone();
        for change in before.diff(&after) {
            replayed.apply(&change);
        }
        assert_eq!(replayed.contacts, after.contacts);
        assert_eq!(replayed.wires, after.wires);
    }

    #[test]
    fn diff_from_empty_is_all_additions() {
        let empty = GroupState::new(Group::root());
        let full = root_with(vec![merge_contact("a", json!(1))]);
        let changes = empty.diff(&full);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind(), "contact-added");
    }
}
