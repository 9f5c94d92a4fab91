//! In-memory storage collaborator

use async_trait::async_trait;
use bassline_core::{ContactId, GroupId, StorageEffects, StorageError, VersionedGroupState};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type GroupKey = (String, GroupId);
type ContactKey = (String, GroupId, ContactId);

#[derive(Debug, Default)]
struct Tables {
    groups: HashMap<GroupKey, VersionedGroupState>,
    contacts: HashMap<ContactKey, Value>,
    group_writes: usize,
}

/// Storage kept in process memory; clones share the same tables
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
    failing: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StorageError::Unavailable`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Pre-load a group snapshot
    pub fn seed_group(&self, network_id: &str, state: VersionedGroupState) {
        let key = (network_id.to_string(), state.state.group.id.clone());
        self.tables.write().groups.insert(key, state);
    }

    pub fn group_state(&self, network_id: &str, group_id: &GroupId) -> Option<VersionedGroupState> {
        self.tables
            .read()
            .groups
            .get(&(network_id.to_string(), group_id.clone()))
            .cloned()
    }

    pub fn contact_content(
        &self,
        network_id: &str,
        group_id: &GroupId,
        contact_id: &ContactId,
    ) -> Option<Value> {
        self.tables
            .read()
            .contacts
            .get(&(network_id.to_string(), group_id.clone(), contact_id.clone()))
            .cloned()
    }

    /// Number of successful `save_group_state` calls
    pub fn group_writes(&self) -> usize {
        self.tables.read().group_writes
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("memory storage set to fail".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageEffects for MemoryStorage {
    async fn save_contact_content(
        &self,
        network_id: &str,
        group_id: &GroupId,
        contact_id: &ContactId,
        content: &Value,
    ) -> Result<(), StorageError> {
        self.check()?;
        self.tables.write().contacts.insert(
            (network_id.to_string(), group_id.clone(), contact_id.clone()),
            content.clone(),
        );
        Ok(())
    }

    async fn load_contact_content(
        &self,
        network_id: &str,
        group_id: &GroupId,
        contact_id: &ContactId,
    ) -> Result<Option<Value>, StorageError> {
        self.check()?;
        Ok(self.contact_content(network_id, group_id, contact_id))
    }

    async fn save_group_state(
        &self,
        network_id: &str,
        group_id: &GroupId,
        state: &VersionedGroupState,
    ) -> Result<(), StorageError> {
        self.check()?;
        let mut tables = self.tables.write();
        tables
            .groups
            .insert((network_id.to_string(), group_id.clone()), state.clone());
        tables.group_writes += 1;
        Ok(())
    }

    async fn load_group_state(
        &self,
        network_id: &str,
        group_id: &GroupId,
    ) -> Result<Option<VersionedGroupState>, StorageError> {
        self.check()?;
        Ok(self.group_state(network_id, group_id))
    }
}
