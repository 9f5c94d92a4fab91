//! Per-group change subscriptions

use bassline_core::{Change, GroupId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Callback invoked with the changes relevant to its group
///
/// Handlers run on the event loop and must not block.
pub type ChangeHandler = Arc<dyn Fn(&[Change]) + Send + Sync>;

/// Handle naming one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Handlers keyed by group
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: u64,
    groups: HashMap<GroupId, BTreeMap<SubscriptionId, ChangeHandler>>,
    owners: HashMap<SubscriptionId, GroupId>,
}

impl SubscriptionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `group`
    pub fn subscribe(&mut self, group: GroupId, handler: ChangeHandler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.groups
            .entry(group.clone())
            .or_default()
            .insert(id, handler);
        self.owners.insert(id, group);
        id
    }

    /// Remove a handler
    ///
    /// Returns the group when it has no handlers left.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Option<GroupId> {
        let group = self.owners.remove(&id)?;
        let handlers = self.groups.get_mut(&group)?;
        handlers.remove(&id);
        if handlers.is_empty() {
            self.groups.remove(&group);
            Some(group)
        } else {
            None
        }
    }

    /// Whether `group` has at least one handler
    pub fn is_subscribed(&self, group: &GroupId) -> bool {
        self.groups.contains_key(group)
    }

    /// Groups with at least one handler
    pub fn groups(&self) -> impl Iterator<Item = &GroupId> {
        self.groups.keys()
    }

    /// Total number of handlers
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Deliver `changes` to every group's handlers, filtered by relevance
    pub fn notify(&self, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }
        for (group, handlers) in &self.groups {
            let relevant: Vec<Change> = changes
                .iter()
                .filter(|change| change.is_relevant_to(group))
                .cloned()
                .collect();
            if relevant.is_empty() {
                continue;
            }
            for handler in handlers.values() {
                handler(&relevant);
            }
        }
    }

    /// Drop every handler without invoking it
    pub fn clear(&mut self) {
        self.groups.clear();
        self.owners.clear();
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("groups", &self.groups.len())
            .field("handlers", &self.owners.len())
            .finish()
    }
}
