//! Change descriptions
//!
//! A [`Change`] describes exactly one accepted mutation of the replicated graph.
//! It is the unit of broadcast (host to guests) and the unit of local cache
//! application. Changes are never mutated after construction.

use crate::graph::{Contact, Group, Wire};
use crate::identifiers::{ContactId, GroupId, WireId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Field updates carried by a `contact-updated` change
///
/// `content` holds the contact's content *after* blending on the host, so replay
/// on a guest never depends on what the guest had before.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactUpdates {
    /// New content (absent when only metadata changed)
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<Value>,
    /// New display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ContactUpdates {
    /// Updates that only replace content
    pub fn content(content: Value) -> Self {
        Self {
            content: Some(content),
            name: None,
        }
    }
}

// Distinguishes `"content": null` (set to null) from a missing field.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// One typed, immutable mutation of the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Change {
    /// A contact was created in its group
    ContactAdded {
        /// The full contact record
        contact: Contact,
        /// Whether the contact is on the group's boundary
        #[serde(default)]
        boundary: bool,
    },
    /// A contact's content and/or name changed
    ContactUpdated {
        /// Contact that changed
        contact_id: ContactId,
        /// Group owning the contact
        group_id: GroupId,
        /// New field values
        updates: ContactUpdates,
    },
    /// A contact was deleted
    ContactRemoved {
        /// Contact that was removed
        contact_id: ContactId,
        /// Group that owned it
        group_id: GroupId,
    },
    /// A wire was created
    WireAdded {
        /// Group the wire is recorded in
        group_id: GroupId,
        /// The wire
        wire: Wire,
    },
    /// A wire was deleted
    WireRemoved {
        /// Group the wire was recorded in
        group_id: GroupId,
        /// Wire that was removed
        wire_id: WireId,
    },
    /// A group was attached under a parent (or registered at top level)
    GroupAdded {
        /// Parent group, `None` for top-level groups
        parent_id: Option<GroupId>,
        /// The new group
        group: Group,
    },
    /// A group and its subtree were removed
    GroupRemoved {
        /// Group that was removed
        group_id: GroupId,
        /// Parent it was detached from
        parent_id: Option<GroupId>,
    },
}

impl Change {
    /// Wire name of this change's variant
    pub fn kind(&self) -> &'static str {
        match self {
            Change::ContactAdded { .. } => "contact-added",
            Change::ContactUpdated { .. } => "contact-updated",
            Change::ContactRemoved { .. } => "contact-removed",
            Change::WireAdded { .. } => "wire-added",
            Change::WireRemoved { .. } => "wire-removed",
            Change::GroupAdded { .. } => "group-added",
            Change::GroupRemoved { .. } => "group-removed",
        }
    }

    /// The group whose state this change mutates (and whose version it bumps)
    ///
    /// Group additions and removals mutate their parent. A top-level group
    /// registration mutates the new group itself.
    pub fn target_group(&self) -> &GroupId {
        match self {
            Change::ContactAdded { contact, .. } => &contact.group_id,
            Change::ContactUpdated { group_id, .. }
            | Change::ContactRemoved { group_id, .. }
            | Change::WireAdded { group_id, .. }
            | Change::WireRemoved { group_id, .. } => group_id,
            Change::GroupAdded { parent_id, group } => parent_id.as_ref().unwrap_or(&group.id),
            Change::GroupRemoved {
                group_id,
                parent_id,
            } => parent_id.as_ref().unwrap_or(group_id),
        }
    }

    /// Whether subscribers of `group` should see this change
    pub fn is_relevant_to(&self, group: &GroupId) -> bool {
        match self {
            Change::GroupAdded { parent_id, .. } => parent_id.as_ref() == Some(group),
            Change::GroupRemoved {
                group_id,
                parent_id,
            } => group_id == group || parent_id.as_ref() == Some(group),
            other => other.target_group() == group,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::BlendMode;
    use serde_json::json;

    fn contact(group: &str) -> Contact {
        Contact {
            id: ContactId::new("c1"),
            group_id: GroupId::new(group),
            content: json!(5),
            blend_mode: BlendMode::AcceptLast,
            name: None,
        }
    }

    #[test]
    fn changes_use_kebab_case_tags_and_camel_case_fields() {
        let change = Change::ContactUpdated {
            contact_id: ContactId::new("c1"),
            group_id: GroupId::new("g1"),
            updates: ContactUpdates::content(json!([1, 2])),
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "contact-updated",
                "contactId": "c1",
                "groupId": "g1",
                "updates": {"content": [1, 2]}
            })
        );
    }

    #[test]
    fn explicit_null_content_survives_serialization() {
        let change = Change::ContactUpdated {
            contact_id: ContactId::new("c1"),
            group_id: GroupId::new("g1"),
            updates: ContactUpdates::content(Value::Null),
        };
        let text = serde_json::to_string(&change).unwrap();
        let back: Change = serde_json::from_str(&text).unwrap();
        assert_eq!(back, change);
    }

    #[test]
    fn group_added_is_relevant_to_parent_only() {
        let change = Change::GroupAdded {
            parent_id: Some(GroupId::root()),
            group: Group::new("child", "Child").with_parent(GroupId::root()),
        };
        assert!(change.is_relevant_to(&GroupId::root()));
        assert!(!change.is_relevant_to(&GroupId::new("child")));
        assert_eq!(change.target_group(), &GroupId::root());
    }

    #[test]
    fn group_removed_is_relevant_to_group_and_parent() {
        let change = Change::GroupRemoved {
            group_id: GroupId::new("child"),
            parent_id: Some(GroupId::root()),
        };
        assert!(change.is_relevant_to(&GroupId::root()));
        assert!(change.is_relevant_to(&GroupId::new("child")));
        assert!(!change.is_relevant_to(&GroupId::new("other")));
    }

    #[test]
    fn contact_changes_are_relevant_to_owning_group() {
        let change = Change::ContactAdded {
            contact: contact("g1"),
            boundary: false,
        };
        assert!(change.is_relevant_to(&GroupId::new("g1")));
        assert!(!change.is_relevant_to(&GroupId::root()));
        assert_eq!(change.kind(), "contact-added");
    }
}
