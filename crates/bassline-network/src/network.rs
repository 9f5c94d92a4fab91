//! The public network facade
//!
//! A [`Network`] is an explicitly constructed, caller-owned handle to one
//! replication instance. Cloning it is cheap; every clone talks to the same
//! event loop. Mutations behave identically for hosts and guests: a host
//! applies them directly, a guest forwards them to the host and resolves when
//! the host answers.

use crate::config::NetworkConfig;
use crate::event_loop::{Command, EventLoop};
use crate::status::{Connectivity, NetworkStatus};
use bassline_core::{
    Change, ContactId, Group, GroupId, GroupState, NetworkError, NetworkResult, NewContact,
    NoopStorage, PeerId, Role, RoomCode, StorageEffects, VersionedGroupState, WireId, WireType,
};
use bassline_sync::{ChangeHandler, Mutation, ReplicationEngine, SubscriptionId};
use bassline_transport::{
    PeerConnectionManager, PeerTransport, SignalingClient, SignalingConnector,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

enum Entry {
    Create(Option<RoomCode>),
    Join(RoomCode),
}

/// Assembles the backends a [`Network`] runs on
pub struct NetworkBuilder {
    config: NetworkConfig,
    signaling: Option<Box<dyn SignalingConnector>>,
    transport: Option<Box<dyn PeerTransport>>,
    storage: Arc<dyn StorageEffects>,
}

impl NetworkBuilder {
    fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            signaling: None,
            transport: None,
            storage: Arc::new(NoopStorage),
        }
    }

    /// Rendezvous backend
    pub fn signaling(mut self, connector: impl SignalingConnector + 'static) -> Self {
        self.signaling = Some(Box::new(connector));
        self
    }

    /// Peer channel backend
    pub fn transport(mut self, transport: impl PeerTransport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Durable storage collaborator; defaults to [`NoopStorage`]
    pub fn storage(mut self, storage: Arc<dyn StorageEffects>) -> Self {
        self.storage = storage;
        self
    }

    /// Create a room and act as its host
    ///
    /// A code is generated when `room_code` is `None`.
    pub async fn create_room(self, room_code: Option<RoomCode>) -> NetworkResult<Network> {
        self.start(Entry::Create(room_code)).await
    }

    /// Join an existing room as a guest
    pub async fn join_room(self, room_code: RoomCode) -> NetworkResult<Network> {
        self.start(Entry::Join(room_code)).await
    }

    async fn start(self, entry: Entry) -> NetworkResult<Network> {
        let NetworkBuilder {
            config,
            signaling,
            transport,
            storage,
        } = self;
        config.validate()?;
        let connector = signaling
            .ok_or_else(|| NetworkError::Config("no signaling backend configured".into()))?;
        let transport =
            transport.ok_or_else(|| NetworkError::Config("no peer transport configured".into()))?;

        let mut client = SignalingClient::connect(connector.as_ref(), config.signaling_timeout).await?;
        let (role, room_code) = match entry {
            Entry::Create(code) => {
                let code = client.create_room(code, config.room_code_length).await?;
                (Role::Host, code)
            }
            Entry::Join(code) => {
                client.join_room(&code).await?;
                (Role::Guest, code)
            }
        };
        let local_id = client.local_peer_id().cloned().ok_or_else(|| {
            NetworkError::Transport("rendezvous server assigned no peer id".into())
        })?;

        let mut engine = ReplicationEngine::new(role, config.engine_config());
        engine.set_identity(local_id.clone(), room_code.clone());
        let mut peers = PeerConnectionManager::new(role, transport);
        if let Some(greeting) = engine.role_announce() {
            peers.set_greeting(greeting.encode()?);
        }

        let (commands, inbox) = mpsc::unbounded_channel();
        let (connectivity_tx, connectivity) = watch::channel(Connectivity::initial(role));
        let event_loop = EventLoop::new(
            config,
            engine,
            peers,
            client,
            storage,
            inbox,
            connectivity_tx,
        );
        tokio::spawn(event_loop.run());

        info!(peer = %local_id, role = %role, room = %room_code, "Network started");
        Ok(Network {
            identity: Arc::new(Identity {
                local_peer_id: local_id,
                role,
                room_code,
            }),
            commands,
            connectivity,
        })
    }
}

#[derive(Debug)]
struct Identity {
    local_peer_id: PeerId,
    role: Role,
    room_code: RoomCode,
}

/// Handle to one running network instance
#[derive(Clone)]
pub struct Network {
    identity: Arc<Identity>,
    commands: mpsc::UnboundedSender<Command>,
    connectivity: watch::Receiver<Connectivity>,
}

impl Network {
    /// Start assembling a network with `config`
    pub fn builder(config: NetworkConfig) -> NetworkBuilder {
        NetworkBuilder::new(config)
    }

    /// Id assigned by the rendezvous server
    pub fn local_peer_id(&self) -> &PeerId {
        &self.identity.local_peer_id
    }

    /// Role held in the room
    pub fn role(&self) -> Role {
        self.identity.role
    }

    /// Room created or joined
    pub fn room_code(&self) -> &RoomCode {
        &self.identity.room_code
    }

    /// Whether the event loop is still running
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Latest connectivity summary, updated as the event loop runs
    pub fn connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.clone()
    }

    /// Wait until mutations can be serviced and the root group is readable
    ///
    /// Immediate on a host. A guest waits for the host's channel and the
    /// root bootstrap.
    pub async fn wait_until_ready(&self, timeout: Duration) -> NetworkResult<()> {
        let mut watcher = self.connectivity.clone();
        let ready = match tokio::time::timeout(timeout, watcher.wait_for(Connectivity::is_ready))
            .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(NetworkError::Terminated),
            Err(_) => Err(NetworkError::NotConnectedToHost),
        };
        ready
    }

    /// Full connectivity report
    pub async fn status(&self) -> NetworkResult<NetworkStatus> {
        self.call(|reply| Command::Status { reply }).await
    }

    // ========================================================================
    // Queries and subscriptions
    // ========================================================================

    /// Locally held state of `group_id`, if any
    pub async fn get_state(&self, group_id: &GroupId) -> NetworkResult<Option<GroupState>> {
        Ok(self
            .get_versioned_state(group_id)
            .await?
            .map(|versioned| versioned.state))
    }

    /// Locally held state of `group_id` with its version
    pub async fn get_versioned_state(
        &self,
        group_id: &GroupId,
    ) -> NetworkResult<Option<VersionedGroupState>> {
        let group_id = group_id.clone();
        self.call(|reply| Command::GetState { group_id, reply }).await
    }

    /// Run `handler` with every batch of changes relevant to `group_id`
    ///
    /// On a guest this also requests the group from the host when it is not
    /// cached yet. Handlers run on the event loop and must not block.
    pub async fn subscribe<F>(&self, group_id: GroupId, handler: F) -> NetworkResult<Subscription>
    where
        F: Fn(&[Change]) + Send + Sync + 'static,
    {
        let handler: ChangeHandler = Arc::new(handler);
        let group = group_id.clone();
        let id = self
            .call(|reply| Command::Subscribe {
                group_id: group,
                handler,
                reply,
            })
            .await?;
        Ok(Subscription {
            id,
            group_id,
            commands: Some(self.commands.clone()),
        })
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Create a contact in `group_id`; resolves with its id
    pub async fn add_contact(
        &self,
        group_id: GroupId,
        contact: NewContact,
    ) -> NetworkResult<ContactId> {
        self.mutate_into(Mutation::AddContact { group_id, contact })
            .await
    }

    /// Blend `content` into a contact
    pub async fn schedule_update(&self, contact_id: ContactId, content: Value) -> NetworkResult<()> {
        self.mutate(Mutation::ScheduleUpdate {
            contact_id,
            content,
        })
        .await
        .map(drop)
    }

    /// Delete a contact
    pub async fn remove_contact(&self, contact_id: ContactId) -> NetworkResult<()> {
        self.mutate(Mutation::RemoveContact { contact_id })
            .await
            .map(drop)
    }

    /// Wire two contacts together; resolves with the wire id
    pub async fn connect(
        &self,
        from_id: ContactId,
        to_id: ContactId,
        wire_type: WireType,
    ) -> NetworkResult<WireId> {
        self.mutate_into(Mutation::Connect {
            from_id,
            to_id,
            wire_type,
        })
        .await
    }

    /// Delete a wire
    pub async fn disconnect(&self, wire_id: WireId) -> NetworkResult<()> {
        self.mutate(Mutation::Disconnect { wire_id }).await.map(drop)
    }

    /// Create `group` under `parent_id`; resolves with its id
    pub async fn add_group(&self, parent_id: GroupId, group: Group) -> NetworkResult<GroupId> {
        self.mutate_into(Mutation::AddGroup { parent_id, group })
            .await
    }

    /// Delete a group with its subgroups
    pub async fn remove_group(&self, group_id: GroupId) -> NetworkResult<()> {
        self.mutate(Mutation::RemoveGroup { group_id })
            .await
            .map(drop)
    }

    /// Make `group` known to the host; resolves with its id
    pub async fn register_group(&self, group: Group) -> NetworkResult<GroupId> {
        self.mutate_into(Mutation::RegisterGroup { group }).await
    }

    /// Submit any mutation and return the raw result
    pub async fn mutate(&self, mutation: Mutation) -> NetworkResult<Value> {
        self.call(|reply| Command::Mutate { mutation, reply })
            .await?
    }

    async fn mutate_into<T: DeserializeOwned>(&self, mutation: Mutation) -> NetworkResult<T> {
        let value = self.mutate(mutation).await?;
        Ok(serde_json::from_value(value)?)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close every peer connection and the signaling connection, dropping all
    /// subscriptions and pending requests without invoking them
    ///
    /// Calling it again, or from another clone, is a no-op.
    pub async fn terminate(&self) -> NetworkResult<()> {
        match self.call(|reply| Command::Terminate { reply }).await {
            Ok(()) | Err(NetworkError::Terminated) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> NetworkResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| NetworkError::Terminated)?;
        response.await.map_err(|_| NetworkError::Terminated)
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("local_peer_id", &self.identity.local_peer_id)
            .field("role", &self.identity.role)
            .field("room_code", &self.identity.room_code)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Registration returned by [`Network::subscribe`]
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    group_id: GroupId,
    commands: Option<mpsc::UnboundedSender<Command>>,
}

impl Subscription {
    /// Registry id of the handler
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Group the handler watches
    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    /// Stop receiving changes
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Unsubscribe { id: self.id });
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
