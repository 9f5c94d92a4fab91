//! Network instance configuration
//!
//! Loaded from TOML or built in code. Durations are written as integer
//! milliseconds:
//!
//! ```toml
//! network_id = "studio"
//! request_timeout = 10000
//! heartbeat_interval = 2000
//! ```

use bassline_core::{GroupId, NetworkError, NetworkResult};
use bassline_sync::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings for one [`Network`](crate::Network) instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Key under which the storage collaborator files this network's data
    pub network_id: String,
    /// Group the host starts with and guests bootstrap first
    pub root_group_id: GroupId,
    /// Deadline for signaling connect, create and join acknowledgements
    #[serde(with = "millis")]
    pub signaling_timeout: Duration,
    /// Deadline for RPCs to the host
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    /// Period between heartbeats to every connected peer
    #[serde(with = "millis")]
    pub heartbeat_interval: Duration,
    /// Silence after which a peer is considered failed
    #[serde(with = "millis")]
    pub peer_timeout: Duration,
    /// Length of generated room codes
    pub room_code_length: usize,
    /// Ask storage to persist accepted mutations
    pub persist_changes: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network_id: "default".to_string(),
            root_group_id: GroupId::root(),
            signaling_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            peer_timeout: Duration::from_secs(30),
            room_code_length: 6,
            persist_changes: true,
        }
    }
}

impl NetworkConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> NetworkResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| NetworkError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> NetworkResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            NetworkError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> NetworkResult<String> {
        toml::to_string(self).map_err(|e| NetworkError::Config(e.to_string()))
    }

    /// Reject settings the event loop cannot run with
    pub fn validate(&self) -> NetworkResult<()> {
        if self.network_id.trim().is_empty() {
            return Err(NetworkError::Config("network_id must not be empty".into()));
        }
        if self.root_group_id.as_str().is_empty() {
            return Err(NetworkError::Config(
                "root_group_id must not be empty".into(),
            ));
        }
        for (name, value) in [
            ("signaling_timeout", self.signaling_timeout),
            ("request_timeout", self.request_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("peer_timeout", self.peer_timeout),
        ] {
            if value.is_zero() {
                return Err(NetworkError::Config(format!("{name} must be positive")));
            }
        }
        if self.peer_timeout <= self.heartbeat_interval {
            return Err(NetworkError::Config(
                "peer_timeout must exceed heartbeat_interval".into(),
            ));
        }
        if !(1..=32).contains(&self.room_code_length) {
            return Err(NetworkError::Config(
                "room_code_length must be between 1 and 32".into(),
            ));
        }
        Ok(())
    }

    /// Settings handed to the replication engine
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            root_group_id: self.root_group_id.clone(),
            request_timeout: self.request_timeout,
            persist_changes: self.persist_changes,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
