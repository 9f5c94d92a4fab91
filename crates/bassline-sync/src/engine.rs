//! Replication protocol engine
//!
//! One engine per network instance, driven from a single event loop:
//!
//! - On the **host** it owns the authoritative [`VersionedGroupState`] of every
//!   materialized group. Each accepted mutation is applied, bumps its group's
//!   version by exactly one, is broadcast as a `change` and is delivered to local
//!   subscribers before the call returns.
//! - On a **guest** it holds read-only caches bootstrapped through
//!   `state-request`/`state-sync`. Mutations become `request`s to the host; the
//!   cache only moves when the host's broadcast arrives, and only if its version
//!   is the next one. Anything else triggers a fresh `state-request`.
//!
//! The engine performs no I/O. Every entry point returns [`Effect`]s.

use crate::rpc::{PendingRequests, RpcReply};
use crate::subscriptions::{ChangeHandler, SubscriptionId, SubscriptionRegistry};
use crate::wire::{DataMessage, Mutation};
use bassline_core::{
    Change, Contact, ContactId, ContactUpdates, Group, GroupId, GroupState, NetworkError,
    NetworkResult, PeerId, RequestId, Role, RoomCode, VersionedGroupState, Wire, WireId,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Group every host starts with and every guest bootstraps first
    pub root_group_id: GroupId,
    /// Deadline for requests to the host
    pub request_timeout: Duration,
    /// Emit persistence effects after accepted mutations
    pub persist_changes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_group_id: GroupId::root(),
            request_timeout: Duration::from_secs(30),
            persist_changes: true,
        }
    }
}

/// Work the caller must carry out on the engine's behalf
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send to one peer
    Send {
        /// Recipient
        peer: PeerId,
        /// Frame to send
        message: DataMessage,
    },
    /// Send to every connected peer
    Broadcast {
        /// Frame to send
        message: DataMessage,
    },
    /// Save a group snapshot
    PersistGroup {
        /// Group saved
        group_id: GroupId,
        /// Snapshot with version
        state: VersionedGroupState,
    },
    /// Save one contact's content
    PersistContact {
        /// Owning group
        group_id: GroupId,
        /// Contact saved
        contact_id: ContactId,
        /// Content after blending
        content: Value,
    },
    /// Look for a stored snapshot of a newly materialized group and pass it to
    /// [`ReplicationEngine::hydrate`]
    Hydrate {
        /// Group to load
        group_id: GroupId,
    },
}

/// Host-authoritative replication state machine
pub struct ReplicationEngine {
    config: EngineConfig,
    role: Role,
    local_id: Option<PeerId>,
    room_code: Option<RoomCode>,
    host_peer: Option<PeerId>,
    groups: HashMap<GroupId, VersionedGroupState>,
    /// Caches dropped on a version gap, kept as the diff baseline for the resync
    resyncing: HashMap<GroupId, VersionedGroupState>,
    requested: HashSet<GroupId>,
    subscriptions: SubscriptionRegistry,
    pending: PendingRequests,
}

type MutationOutcome = NetworkResult<(Value, Vec<Effect>)>;

fn id_value(id: impl ToString) -> Value {
    Value::String(id.to_string())
}

impl ReplicationEngine {
    /// Engine for a peer playing `role`; a host starts with an empty root group
    pub fn new(role: Role, config: EngineConfig) -> Self {
        let mut groups = HashMap::new();
        if role.is_host() {
            let root = Group::new(config.root_group_id.clone(), "Root");
            groups.insert(root.id.clone(), VersionedGroupState::initial(root));
        }
        Self {
            pending: PendingRequests::new(config.request_timeout),
            config,
            role,
            local_id: None,
            room_code: None,
            host_peer: None,
            groups,
            resyncing: HashMap::new(),
            requested: HashSet::new(),
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// This peer's fixed role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Peer id assigned by the rendezvous server
    pub fn local_id(&self) -> Option<&PeerId> {
        self.local_id.as_ref()
    }

    /// Room this engine replicates
    pub fn room_code(&self) -> Option<&RoomCode> {
        self.room_code.as_ref()
    }

    /// The host peer a guest is connected to
    pub fn host_peer(&self) -> Option<&PeerId> {
        self.host_peer.as_ref()
    }

    /// Whether mutations can currently be serviced
    pub fn is_host_connected(&self) -> bool {
        self.role.is_host() || self.host_peer.is_some()
    }

    /// Configured root group
    pub fn root_group_id(&self) -> &GroupId {
        &self.config.root_group_id
    }

    /// Current state of a group, if materialized (host) or bootstrapped (guest)
    pub fn state(&self, group: &GroupId) -> Option<&VersionedGroupState> {
        self.groups.get(group)
    }

    /// Last applied version of a group
    pub fn version(&self, group: &GroupId) -> Option<u64> {
        self.groups.get(group).map(|g| g.version)
    }

    /// Ids of every group held locally
    pub fn group_ids(&self) -> Vec<GroupId> {
        let mut ids: Vec<GroupId> = self.groups.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Outstanding requests to the host
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Registered subscriptions
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Record the identity granted by the rendezvous server
    pub fn set_identity(&mut self, local_id: PeerId, room_code: RoomCode) {
        self.local_id = Some(local_id);
        self.room_code = Some(room_code);
    }

    /// Greeting sent first on every channel
    pub fn role_announce(&self) -> Option<DataMessage> {
        self.room_code.clone().map(|room_code| DataMessage::RoleAnnounce {
            role: self.role,
            room_code,
        })
    }

    /// Effects to run once at start-up
    pub fn startup_effects(&self) -> Vec<Effect> {
        if self.role.is_host() {
            vec![Effect::Hydrate {
                group_id: self.config.root_group_id.clone(),
            }]
        } else {
            Vec::new()
        }
    }

    // ========================================================================
    // Local commands
    // ========================================================================

    /// Run a mutation: applied directly on the host, sent as a request by a guest
    ///
    /// `reply` completes with the mutation's result. On a guest it completes when
    /// the host's response arrives, the request times out, or the host leaves.
    pub fn submit(&mut self, mutation: Mutation, reply: RpcReply) -> Vec<Effect> {
        if self.role.is_host() {
            return match self.apply_mutation(mutation) {
                Ok((data, effects)) => {
                    let _ = reply.send(Ok(data));
                    effects
                }
                Err(e) => {
                    debug!(error = %e, "Local mutation rejected");
                    let _ = reply.send(Err(e));
                    Vec::new()
                }
            };
        }

        let (Some(host), Some(local)) = (self.host_peer.clone(), self.local_id.clone()) else {
            let _ = reply.send(Err(NetworkError::NotConnectedToHost));
            return Vec::new();
        };
        let (method, params) = match mutation.to_request() {
            Ok(request) => request,
            Err(e) => {
                let _ = reply.send(Err(e));
                return Vec::new();
            }
        };
        let id = self.pending.next_id(&local);
        self.pending
            .register(id.clone(), host.clone(), method.clone(), reply);
        debug!(request = %id, %method, host = %host, "Request sent to host");
        vec![Effect::Send {
            peer: host,
            message: DataMessage::Request { id, method, params },
        }]
    }

    /// Register a change handler for `group`
    ///
    /// A guest that has not bootstrapped `group` requests its state.
    pub fn subscribe(
        &mut self,
        group: GroupId,
        handler: ChangeHandler,
    ) -> (SubscriptionId, Vec<Effect>) {
        let id = self.subscriptions.subscribe(group.clone(), handler);
        let effects = if !self.role.is_host()
            && !self.groups.contains_key(&group)
            && !self.requested.contains(&group)
        {
            self.request_state(&group)
        } else {
            Vec::new()
        };
        (id, effects)
    }

    /// Remove a handler; a guest evicts the cache of a group nobody watches
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        let Some(group) = self.subscriptions.unsubscribe(id) else {
            return;
        };
        if !self.role.is_host() && group != self.config.root_group_id {
            self.groups.remove(&group);
            self.resyncing.remove(&group);
            self.requested.remove(&group);
            debug!(group = %group, "Evicted unwatched group cache");
        }
    }

    /// Install a stored snapshot for a group the host just materialized
    ///
    /// Only a snapshot newer than the in-memory state is taken. Local
    /// subscribers see the difference as changes; guests notice the version jump
    /// on the next broadcast and resync.
    pub fn hydrate(&mut self, mut stored: VersionedGroupState) {
        if !self.role.is_host() {
            return;
        }
        let group_id = stored.state.group.id.clone();
        let Some(current) = self.groups.get(&group_id) else {
            debug!(group = %group_id, "Ignoring snapshot for unknown group");
            return;
        };
        if stored.version <= current.version {
            return;
        }
        if stored.state.group.parent_id.is_none() {
            stored.state.group.parent_id = current.state.group.parent_id.clone();
        }
        let changes = current.state.diff(&stored.state);
        info!(group = %group_id, version = stored.version, "Hydrated group from storage");
        self.groups.insert(group_id, stored);
        self.subscriptions.notify(&changes);
    }

    /// A peer's channel closed or failed
    pub fn on_peer_disconnected(&mut self, peer: &PeerId) {
        self.pending.reject_peer(peer);
        if self.host_peer.as_ref() == Some(peer) {
            warn!(host = %peer, "Host left the room; mutations unavailable until it returns");
            self.host_peer = None;
            self.requested.clear();
        }
    }

    /// Reject requests whose deadline has passed
    pub fn expire_requests(&mut self, now: Instant) -> Vec<RequestId> {
        self.pending.expire(now)
    }

    /// Earliest request deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.next_deadline()
    }

    /// Drop all state, handlers and pending requests without completing them
    pub fn terminate(&mut self) {
        self.pending.clear();
        self.subscriptions.clear();
        self.groups.clear();
        self.resyncing.clear();
        self.requested.clear();
        self.host_peer = None;
    }

    // ========================================================================
    // Inbound messages
    // ========================================================================

    /// Process one frame received from `from`
    pub fn handle_message(&mut self, from: &PeerId, message: DataMessage) -> Vec<Effect> {
        match message {
            DataMessage::RoleAnnounce { role, room_code } => {
                self.on_role_announce(from, role, room_code)
            }
            DataMessage::StateRequest { group_id } => self.on_state_request(from, group_id),
            DataMessage::StateSync {
                group_id,
                state,
                version,
            } => self.on_state_sync(from, group_id, state, version),
            DataMessage::Change {
                group_id,
                change,
                version,
            } => self.on_change(from, group_id, change, version),
            DataMessage::Request { id, method, params } => {
                self.on_request(from, id, &method, params)
            }
            DataMessage::Response {
                request_id,
                data,
                error,
            } => {
                self.pending.resolve(&request_id, from, data, error);
                Vec::new()
            }
            DataMessage::Heartbeat => Vec::new(),
        }
    }

    fn on_role_announce(&mut self, from: &PeerId, role: Role, room_code: RoomCode) -> Vec<Effect> {
        if self.room_code.as_ref().is_some_and(|own| *own != room_code) {
            warn!(peer = %from, room = %room_code, "Peer announced a different room");
            return Vec::new();
        }
        match (self.role, role) {
            (_, Role::Guest) => {
                debug!(peer = %from, "Guest announced");
                Vec::new()
            }
            (Role::Host, Role::Host) => {
                warn!(peer = %from, "Rejecting second host in room");
                Vec::new()
            }
            (Role::Guest, Role::Host) => {
                if let Some(current) = &self.host_peer {
                    if current != from {
                        warn!(peer = %from, host = %current, "Rejecting second host in room");
                        return Vec::new();
                    }
                }
                info!(host = %from, "Connected to host");
                self.host_peer = Some(from.clone());
                self.bootstrap()
            }
        }
    }

    fn bootstrap(&mut self) -> Vec<Effect> {
        let mut wanted: Vec<GroupId> = vec![self.config.root_group_id.clone()];
        wanted.extend(self.subscriptions.groups().cloned());
        wanted.extend(self.groups.keys().cloned());
        wanted.sort();
        wanted.dedup();
        wanted.iter().flat_map(|g| self.request_state(g)).collect()
    }

    fn on_state_request(&mut self, from: &PeerId, group_id: GroupId) -> Vec<Effect> {
        if !self.role.is_host() {
            debug!(peer = %from, "Guest ignoring state request");
            return Vec::new();
        }
        match self.groups.get(&group_id) {
            Some(entry) => vec![Effect::Send {
                peer: from.clone(),
                message: DataMessage::StateSync {
                    group_id,
                    state: entry.state.clone(),
                    version: entry.version,
                },
            }],
            None => {
                debug!(peer = %from, group = %group_id, "State requested for unknown group");
                Vec::new()
            }
        }
    }

    fn on_state_sync(
        &mut self,
        from: &PeerId,
        group_id: GroupId,
        state: GroupState,
        version: u64,
    ) -> Vec<Effect> {
        if !self.accepts_host_traffic(from, "state-sync") {
            return Vec::new();
        }
        self.requested.remove(&group_id);
        let previous = self
            .groups
            .get(&group_id)
            .or_else(|| self.resyncing.get(&group_id));
        if let Some(previous) = previous.filter(|p| version < p.version) {
            debug!(group = %group_id, version, have = previous.version, "Stale snapshot ignored");
            return Vec::new();
        }
        let baseline = match self.groups.remove(&group_id) {
            Some(cached) => cached.state,
            None => match self.resyncing.remove(&group_id) {
                Some(dropped) => dropped.state,
                None => GroupState::new(state.group.clone()),
            },
        };
        let changes = baseline.diff(&state);
        info!(group = %group_id, version, changes = changes.len(), "Group bootstrapped");
        self.groups
            .insert(group_id, VersionedGroupState { state, version });
        self.subscriptions.notify(&changes);
        Vec::new()
    }

    fn on_change(
        &mut self,
        from: &PeerId,
        group_id: GroupId,
        change: Change,
        version: u64,
    ) -> Vec<Effect> {
        if !self.accepts_host_traffic(from, "change") {
            return Vec::new();
        }
        let Some(entry) = self.groups.get_mut(&group_id) else {
            if self.is_interested(&group_id) && !self.requested.contains(&group_id) {
                debug!(group = %group_id, version, "Change for unbootstrapped group; requesting state");
                return self.request_state(&group_id);
            }
            debug!(group = %group_id, version, "Dropping change for unbootstrapped group");
            return Vec::new();
        };

        if version <= entry.version {
            debug!(group = %group_id, version, have = entry.version, "Duplicate change ignored");
            return Vec::new();
        }
        if version != entry.version + 1 {
            warn!(
                group = %group_id,
                expected = entry.version + 1,
                got = version,
                "Version gap; resyncing"
            );
            if let Some(stale) = self.groups.remove(&group_id) {
                self.resyncing.insert(group_id.clone(), stale);
            }
            return self.request_state(&group_id);
        }

        entry.state.apply(&change);
        entry.version = version;
        if let Change::GroupRemoved {
            group_id: removed, ..
        } = &change
        {
            self.evict_subtree(removed);
        }
        self.subscriptions.notify(std::slice::from_ref(&change));
        Vec::new()
    }

    fn on_request(
        &mut self,
        from: &PeerId,
        id: RequestId,
        method: &str,
        params: Value,
    ) -> Vec<Effect> {
        if !self.role.is_host() {
            return vec![Effect::Send {
                peer: from.clone(),
                message: DataMessage::err(id, &NetworkError::HostOnlyOperation),
            }];
        }
        let outcome =
            Mutation::from_request(method, params).and_then(|m| self.apply_mutation(m));
        match outcome {
            Ok((data, mut effects)) => {
                effects.push(Effect::Send {
                    peer: from.clone(),
                    message: DataMessage::ok(id, data),
                });
                effects
            }
            Err(e) => {
                debug!(peer = %from, request = %id, %method, error = %e, "Request rejected");
                vec![Effect::Send {
                    peer: from.clone(),
                    message: DataMessage::err(id, &e),
                }]
            }
        }
    }

    fn accepts_host_traffic(&self, from: &PeerId, kind: &str) -> bool {
        if self.role.is_host() {
            warn!(peer = %from, kind, "Host ignoring host-only message");
            return false;
        }
        if self.host_peer.as_ref() != Some(from) {
            warn!(peer = %from, kind, "Ignoring message from non-host peer");
            return false;
        }
        true
    }

    fn is_interested(&self, group: &GroupId) -> bool {
        *group == self.config.root_group_id || self.subscriptions.is_subscribed(group)
    }

    fn request_state(&mut self, group: &GroupId) -> Vec<Effect> {
        let Some(host) = self.host_peer.clone() else {
            return Vec::new();
        };
        self.requested.insert(group.clone());
        vec![Effect::Send {
            peer: host,
            message: DataMessage::StateRequest {
                group_id: group.clone(),
            },
        }]
    }

    // ========================================================================
    // Host mutations
    // ========================================================================

    fn apply_mutation(&mut self, mutation: Mutation) -> MutationOutcome {
        match mutation {
            Mutation::AddContact { group_id, contact } => {
                if !self.groups.contains_key(&group_id) {
                    return Err(NetworkError::GroupNotFound { group_id });
                }
                let id = contact.id.unwrap_or_else(ContactId::generate);
                if self
                    .contact_group(&id)
                    .is_some_and(|owner| owner != group_id)
                {
                    return Err(NetworkError::ContactExists { contact_id: id });
                }
                let record = Contact {
                    id: id.clone(),
                    group_id: group_id.clone(),
                    content: contact.blend_mode.normalize(contact.content),
                    blend_mode: contact.blend_mode,
                    name: contact.name,
                };
                let effects = self.commit(
                    &group_id,
                    Change::ContactAdded {
                        contact: record,
                        boundary: contact.boundary,
                    },
                );
                Ok((id_value(id), effects))
            }
            Mutation::ScheduleUpdate {
                contact_id,
                content,
            } => {
                let Some(group_id) = self.contact_group(&contact_id) else {
                    debug!(contact = %contact_id, "Update for missing contact ignored");
                    return Ok((Value::Null, Vec::new()));
                };
                let Some(current) = self
                    .groups
                    .get(&group_id)
                    .and_then(|g| g.state.contact(&contact_id))
                else {
                    return Ok((Value::Null, Vec::new()));
                };
                let blended = current.blend_mode.blend(&current.content, &content);
                if blended == current.content {
                    debug!(contact = %contact_id, "Update leaves content unchanged");
                    return Ok((Value::Null, Vec::new()));
                }
                let effects = self.commit(
                    &group_id,
                    Change::ContactUpdated {
                        contact_id,
                        group_id: group_id.clone(),
                        updates: ContactUpdates::content(blended),
                    },
                );
                Ok((Value::Null, effects))
            }
            Mutation::Connect {
                from_id,
                to_id,
                wire_type,
            } => {
                let group_id = self
                    .contact_group(&from_id)
                    .ok_or_else(|| NetworkError::ContactNotFound {
                        contact_id: from_id.clone(),
                    })?;
                if self.contact_group(&to_id).is_none() {
                    return Err(NetworkError::ContactNotFound { contact_id: to_id });
                }
                let wire = Wire {
                    id: WireId::generate(),
                    from_id,
                    to_id,
                    wire_type,
                };
                let id = wire.id.clone();
                let effects = self.commit(
                    &group_id,
                    Change::WireAdded {
                        group_id: group_id.clone(),
                        wire,
                    },
                );
                Ok((id_value(id), effects))
            }
            Mutation::RemoveContact { contact_id } => {
                let Some(group_id) = self.contact_group(&contact_id) else {
                    return Ok((Value::Null, Vec::new()));
                };
                let effects = self.commit(
                    &group_id,
                    Change::ContactRemoved {
                        contact_id,
                        group_id: group_id.clone(),
                    },
                );
                Ok((Value::Null, effects))
            }
            Mutation::Disconnect { wire_id } => {
                let Some(group_id) = self.wire_group(&wire_id) else {
                    return Ok((Value::Null, Vec::new()));
                };
                let effects = self.commit(
                    &group_id,
                    Change::WireRemoved {
                        group_id: group_id.clone(),
                        wire_id,
                    },
                );
                Ok((Value::Null, effects))
            }
            Mutation::AddGroup { parent_id, group } => self.attach_group(parent_id, group),
            Mutation::RemoveGroup { group_id } => Ok((Value::Null, self.remove_group(group_id))),
            Mutation::RegisterGroup { group } => {
                let id = group.id.clone();
                if self.groups.contains_key(&id) {
                    return Ok((id_value(id), Vec::new()));
                }
                match group.parent_id.clone() {
                    Some(parent) if self.groups.contains_key(&parent) => {
                        self.attach_group(parent, group)
                    }
                    _ => {
                        let mut effects = vec![Effect::Hydrate {
                            group_id: id.clone(),
                        }];
                        let state = VersionedGroupState::initial(group);
                        if self.config.persist_changes {
                            effects.push(Effect::PersistGroup {
                                group_id: id.clone(),
                                state: state.clone(),
                            });
                        }
                        info!(group = %id, "Group registered");
                        self.groups.insert(id.clone(), state);
                        Ok((id_value(id), effects))
                    }
                }
            }
        }
    }

    fn attach_group(&mut self, parent: GroupId, mut group: Group) -> MutationOutcome {
        let Some(parent_state) = self.groups.get(&parent) else {
            return Err(NetworkError::GroupNotFound { group_id: parent });
        };
        let id = group.id.clone();
        if parent_state.state.group.subgroup_ids.contains(&id) {
            return Ok((id_value(id), Vec::new()));
        }
        group.parent_id = Some(parent.clone());

        let mut effects = Vec::new();
        if !self.groups.contains_key(&id) {
            self.groups
                .insert(id.clone(), VersionedGroupState::initial(group.clone()));
            effects.push(Effect::Hydrate {
                group_id: id.clone(),
            });
        }
        effects.extend(self.commit(
            &parent,
            Change::GroupAdded {
                parent_id: Some(parent.clone()),
                group,
            },
        ));
        Ok((id_value(id), effects))
    }

    fn remove_group(&mut self, group_id: GroupId) -> Vec<Effect> {
        if group_id == self.config.root_group_id {
            warn!("Refusing to remove the root group");
            return Vec::new();
        }
        let Some(entry) = self.groups.get(&group_id) else {
            return Vec::new();
        };
        let parent = entry.state.group.parent_id.clone();
        let next_version = entry.version + 1;
        let change = Change::GroupRemoved {
            group_id: group_id.clone(),
            parent_id: parent.clone(),
        };
        self.evict_subtree(&group_id);

        match parent.filter(|p| self.groups.contains_key(p)) {
            Some(parent) => self.commit(&parent, change),
            None => {
                info!(group = %group_id, "Top-level group removed");
                self.subscriptions.notify(std::slice::from_ref(&change));
                vec![Effect::Broadcast {
                    message: DataMessage::Change {
                        group_id,
                        change,
                        version: next_version,
                    },
                }]
            }
        }
    }

    fn evict_subtree(&mut self, root: &GroupId) {
        let mut doomed = vec![root.clone()];
        let mut cursor = 0;
        while cursor < doomed.len() {
            if let Some(entry) = self.groups.remove(&doomed[cursor]) {
                doomed.extend(entry.state.group.subgroup_ids);
            }
            cursor += 1;
        }
        for group in &doomed {
            self.resyncing.remove(group);
            self.requested.remove(group);
        }
    }

    fn commit(&mut self, group_id: &GroupId, change: Change) -> Vec<Effect> {
        let Some(entry) = self.groups.get_mut(group_id) else {
            return Vec::new();
        };
        if !entry.state.apply(&change) {
            debug!(group = %group_id, kind = change.kind(), "Change had no effect");
            return Vec::new();
        }
        entry.version += 1;
        let version = entry.version;
        info!(group = %group_id, version, kind = change.kind(), "Change committed");

        let mut effects = vec![Effect::Broadcast {
            message: DataMessage::Change {
                group_id: group_id.clone(),
                change: change.clone(),
                version,
            },
        }];
        if self.config.persist_changes {
            effects.push(Effect::PersistGroup {
                group_id: group_id.clone(),
                state: entry.clone(),
            });
            let touched = match &change {
                Change::ContactAdded { contact, .. } => Some(&contact.id),
                Change::ContactUpdated { contact_id, .. } => Some(contact_id),
                _ => None,
            };
            if let Some(contact) = touched.and_then(|id| entry.state.contact(id)) {
                effects.push(Effect::PersistContact {
                    group_id: group_id.clone(),
                    contact_id: contact.id.clone(),
                    content: contact.content.clone(),
                });
            }
        }
        self.subscriptions.notify(std::slice::from_ref(&change));
        effects
    }

    fn contact_group(&self, contact: &ContactId) -> Option<GroupId> {
        self.groups
            .values()
            .find(|g| g.state.contacts.contains_key(contact))
            .map(|g| g.state.group.id.clone())
    }

    fn wire_group(&self, wire: &WireId) -> Option<GroupId> {
        self.groups
            .values()
            .find(|g| g.state.wires.contains_key(wire))
            .map(|g| g.state.group.id.clone())
    }
}

impl std::fmt::Debug for ReplicationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationEngine")
            .field("role", &self.role)
            .field("local_id", &self.local_id)
            .field("host_peer", &self.host_peer)
            .field("groups", &self.groups.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
