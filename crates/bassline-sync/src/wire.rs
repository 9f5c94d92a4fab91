//! Data-channel wire protocol
//!
//! Every frame on a peer channel is one JSON [`DataMessage`]. Mutating RPCs
//! carry a method name and untyped params on the wire; [`Mutation`] is their
//! typed form.

use bassline_core::{
    Change, ContactId, Group, GroupId, GroupState, NetworkError, NetworkResult, NewContact,
    RequestId, Role, RoomCode, WireId, WireType,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One frame on a peer data channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum DataMessage {
    /// First frame on every channel: who the sender is
    RoleAnnounce {
        /// Sender's role in the room
        role: Role,
        /// Room the sender belongs to
        room_code: RoomCode,
    },
    /// Guest asks the host for a full group snapshot
    StateRequest {
        /// Requested group
        group_id: GroupId,
    },
    /// Full snapshot of one group
    StateSync {
        /// Group described
        group_id: GroupId,
        /// Complete group state
        state: GroupState,
        /// Host version the snapshot reflects
        version: u64,
    },
    /// One accepted mutation
    Change {
        /// Group whose version was bumped
        group_id: GroupId,
        /// The mutation
        change: Change,
        /// Version after applying `change`
        version: u64,
    },
    /// RPC call to the host
    Request {
        /// Correlation id
        id: RequestId,
        /// Method name
        method: String,
        /// Method parameters
        #[serde(default)]
        params: Value,
    },
    /// RPC reply; exactly one of `data` and `error` is meaningful
    Response {
        /// Id of the request answered
        request_id: RequestId,
        /// Result on success
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        /// Error string on failure
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Liveness ping
    Heartbeat,
}

impl DataMessage {
    /// Wire name of the frame type
    pub fn kind(&self) -> &'static str {
        match self {
            DataMessage::RoleAnnounce { .. } => "role-announce",
            DataMessage::StateRequest { .. } => "state-request",
            DataMessage::StateSync { .. } => "state-sync",
            DataMessage::Change { .. } => "change",
            DataMessage::Request { .. } => "request",
            DataMessage::Response { .. } => "response",
            DataMessage::Heartbeat => "heartbeat",
        }
    }

    /// Successful response
    pub fn ok(request_id: RequestId, data: Value) -> Self {
        DataMessage::Response {
            request_id,
            data: Some(data),
            error: None,
        }
    }

    /// Failed response
    pub fn err(request_id: RequestId, error: &NetworkError) -> Self {
        DataMessage::Response {
            request_id,
            data: None,
            error: Some(error.to_wire()),
        }
    }

    /// Serialize for the channel
    pub fn encode(&self) -> NetworkResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a frame received from the channel
    pub fn decode(bytes: &[u8]) -> NetworkResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// RPC methods the host services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `registerGroup`
    RegisterGroup,
    /// `scheduleUpdate`
    ScheduleUpdate,
    /// `connect`
    Connect,
    /// `addContact`
    AddContact,
    /// `removeContact`
    RemoveContact,
    /// `addGroup`
    AddGroup,
    /// `removeGroup`
    RemoveGroup,
    /// `disconnect`
    Disconnect,
}

impl Method {
    /// Every method, in wire order
    pub const ALL: [Method; 8] = [
        Method::RegisterGroup,
        Method::ScheduleUpdate,
        Method::Connect,
        Method::AddContact,
        Method::RemoveContact,
        Method::AddGroup,
        Method::RemoveGroup,
        Method::Disconnect,
    ];

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Method::RegisterGroup => "registerGroup",
            Method::ScheduleUpdate => "scheduleUpdate",
            Method::Connect => "connect",
            Method::AddContact => "addContact",
            Method::RemoveContact => "removeContact",
            Method::AddGroup => "addGroup",
            Method::RemoveGroup => "removeGroup",
            Method::Disconnect => "disconnect",
        }
    }

    /// Look up a wire name
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A graph mutation, as issued locally or carried by a `request`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Mutation {
    /// Make a group known to the host
    RegisterGroup {
        /// Group record; `parent_id` attaches it under an existing group
        group: Group,
    },
    /// Blend new content into a contact
    ScheduleUpdate {
        /// Target contact
        contact_id: ContactId,
        /// Incoming content
        content: Value,
    },
    /// Add a wire between two contacts
    Connect {
        /// Source contact
        from_id: ContactId,
        /// Destination contact
        to_id: ContactId,
        /// Direction
        #[serde(rename = "type", default)]
        wire_type: WireType,
    },
    /// Create a contact
    AddContact {
        /// Owning group
        group_id: GroupId,
        /// Contact parameters
        contact: NewContact,
    },
    /// Delete a contact
    RemoveContact {
        /// Contact to delete
        contact_id: ContactId,
    },
    /// Create a group under `parent_id`
    AddGroup {
        /// Parent group
        parent_id: GroupId,
        /// Group record
        group: Group,
    },
    /// Delete a group and its subgroups
    RemoveGroup {
        /// Group to delete
        group_id: GroupId,
    },
    /// Delete a wire
    Disconnect {
        /// Wire to delete
        wire_id: WireId,
    },
}

impl Mutation {
    /// The RPC method carrying this mutation
    pub fn method(&self) -> Method {
        match self {
            Mutation::RegisterGroup { .. } => Method::RegisterGroup,
            Mutation::ScheduleUpdate { .. } => Method::ScheduleUpdate,
            Mutation::Connect { .. } => Method::Connect,
            Mutation::AddContact { .. } => Method::AddContact,
            Mutation::RemoveContact { .. } => Method::RemoveContact,
            Mutation::AddGroup { .. } => Method::AddGroup,
            Mutation::RemoveGroup { .. } => Method::RemoveGroup,
            Mutation::Disconnect { .. } => Method::Disconnect,
        }
    }

    /// Split into the `method`/`params` pair of a `request`
    pub fn to_request(&self) -> NetworkResult<(String, Value)> {
        let mut encoded = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            other => {
                return Err(NetworkError::Serialization(format!(
                    "mutation encoded as {other}"
                )))
            }
        };
        let params = encoded.remove("params").unwrap_or(Value::Null);
        Ok((self.method().as_str().to_string(), params))
    }

    /// Rebuild from a received `request`
    pub fn from_request(method: &str, params: Value) -> NetworkResult<Self> {
        if Method::parse(method).is_none() {
            return Err(NetworkError::UnknownMethod {
                method: method.to_string(),
            });
        }
        let mut envelope = Map::new();
        envelope.insert("method".to_string(), Value::String(method.to_string()));
        envelope.insert("params".to_string(), params);
        Ok(serde_json::from_value(Value::Object(envelope))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn frames_use_kebab_tags_and_camel_fields() {
        let frame = DataMessage::StateRequest {
            group_id: GroupId::root(),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "state-request", "groupId": "root"})
        );
        assert_eq!(
            serde_json::to_value(DataMessage::Heartbeat).unwrap(),
            json!({"type": "heartbeat"})
        );

        let response = DataMessage::decode(br#"{"type":"response","requestId":"p-1","data":"c1"}"#)
            .unwrap();
        assert_eq!(response, DataMessage::ok(RequestId::new("p-1"), json!("c1")));
    }

    #[test]
    fn mutation_request_split_and_rebuild() {
        let mutation = Mutation::Connect {
            from_id: ContactId::new("a"),
            to_id: ContactId::new("b"),
            wire_type: WireType::Bidirectional,
        };
        let (method, params) = mutation.to_request().unwrap();
        assert_eq!(method, "connect");
        assert_eq!(
            params,
            json!({"fromId": "a", "toId": "b", "type": "bidirectional"})
        );
        assert_eq!(Mutation::from_request(&method, params).unwrap(), mutation);
    }

    #[test]
    fn unknown_method_is_typed() {
        assert_matches!(
            Mutation::from_request("dropTables", json!({})),
            Err(NetworkError::UnknownMethod { method }) if method == "dropTables"
        );
        assert_matches!(
            Mutation::from_request("scheduleUpdate", json!({"nope": 1})),
            Err(NetworkError::Serialization(_))
        );
    }

    #[test]
    fn every_method_name_round_trips() {
        for method in Method::ALL {
            assert_eq!(Method::parse(method.as_str()), Some(method));
        }
    }
}
