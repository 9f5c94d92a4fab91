//! Storage collaborator interface
//!
//! Durability is delegated to an external backend (for example a SQLite driver)
//! reachable only through these calls, keyed by network, group and contact id.
//! The replication core calls them opportunistically and treats every failure as
//! non-fatal: failures are logged by the caller and never reach peers.

use crate::errors::StorageError;
use crate::graph::VersionedGroupState;
use crate::identifiers::{ContactId, GroupId};
use async_trait::async_trait;
use serde_json::Value;

/// Durable storage operations used by the host
#[async_trait]
pub trait StorageEffects: Send + Sync {
    /// Persist the content of one contact
    async fn save_contact_content(
        &self,
        network_id: &str,
        group_id: &GroupId,
        contact_id: &ContactId,
        content: &Value,
    ) -> Result<(), StorageError>;

    /// Load previously persisted contact content
    async fn load_contact_content(
        &self,
        network_id: &str,
        group_id: &GroupId,
        contact_id: &ContactId,
    ) -> Result<Option<Value>, StorageError>;

    /// Persist a full group state with its version
    async fn save_group_state(
        &self,
        network_id: &str,
        group_id: &GroupId,
        state: &VersionedGroupState,
    ) -> Result<(), StorageError>;

    /// Load a previously persisted group state
    async fn load_group_state(
        &self,
        network_id: &str,
        group_id: &GroupId,
    ) -> Result<Option<VersionedGroupState>, StorageError>;
}

/// Storage that persists nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStorage;

#[async_trait]
impl StorageEffects for NoopStorage {
    async fn save_contact_content(
        &self,
        _network_id: &str,
        _group_id: &GroupId,
        _contact_id: &ContactId,
        _content: &Value,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    async fn load_contact_content(
        &self,
        _network_id: &str,
        _group_id: &GroupId,
        _contact_id: &ContactId,
    ) -> Result<Option<Value>, StorageError> {
        Ok(None)
    }

    async fn save_group_state(
        &self,
        _network_id: &str,
        _group_id: &GroupId,
        _state: &VersionedGroupState,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    async fn load_group_state(
        &self,
        _network_id: &str,
        _group_id: &GroupId,
    ) -> Result<Option<VersionedGroupState>, StorageError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_storage_loads_nothing() {
        let storage = NoopStorage;
        let group = GroupId::root();
        assert!(storage
            .load_group_state("net", &group)
            .await
            .unwrap()
            .is_none());
        assert!(storage
            .load_contact_content("net", &group, &ContactId::new("c"))
            .await
            .unwrap()
            .is_none());
    }
}
