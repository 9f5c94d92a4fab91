//! Per-instance event loop
//!
//! One task owns the replication engine, the peer table and the signaling
//! client. Facade commands, signaling frames, transport events, the heartbeat
//! tick and the earliest request deadline are multiplexed with `select!`, and each
//! is handled to completion before the next is polled. Nothing here needs a lock.

use crate::config::NetworkConfig;
use crate::status::{Connectivity, NetworkStatus};
use bassline_core::{GroupId, PeerId, StorageEffects, VersionedGroupState};
use bassline_sync::{
    ChangeHandler, DataMessage, Effect, Mutation, ReplicationEngine, RpcReply, SubscriptionId,
};
use bassline_transport::{
    ManagerEvent, PeerConnectionManager, SignalEvent, SignalMessage, SignalingClient,
    SignalingState, TransportError, TransportEvent,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Requests from [`Network`](crate::Network) handles
pub(crate) enum Command {
    GetState {
        group_id: GroupId,
        reply: oneshot::Sender<Option<VersionedGroupState>>,
    },
    Subscribe {
        group_id: GroupId,
        handler: ChangeHandler,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Mutate {
        mutation: Mutation,
        reply: RpcReply,
    },
    Status {
        reply: oneshot::Sender<NetworkStatus>,
    },
    Terminate {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct EventLoop {
    config: NetworkConfig,
    engine: ReplicationEngine,
    peers: PeerConnectionManager,
    signaling: SignalingClient,
    storage: Arc<dyn StorageEffects>,
    commands: mpsc::UnboundedReceiver<Command>,
    connectivity: watch::Sender<Connectivity>,
}

impl EventLoop {
    pub(crate) fn new(
        config: NetworkConfig,
        engine: ReplicationEngine,
        peers: PeerConnectionManager,
        signaling: SignalingClient,
        storage: Arc<dyn StorageEffects>,
        commands: mpsc::UnboundedReceiver<Command>,
        connectivity: watch::Sender<Connectivity>,
    ) -> Self {
        Self {
            config,
            engine,
            peers,
            signaling,
            storage,
            commands,
            connectivity,
        }
    }

    pub(crate) async fn run(mut self) {
        let startup = self.engine.startup_effects();
        self.execute(startup).await;
        self.publish_connectivity();

        let mut heartbeat = time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.engine.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Terminate { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        debug!("All network handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                event = self.signaling.next_event() => self.on_signal(event).await,
                event = self.peers.next_transport_event() => self.on_transport(event).await,
                _ = heartbeat.tick() => self.on_heartbeat().await,
                _ = sleep_until(deadline) => {
                    self.engine.expire_requests(Instant::now());
                }
            }
            self.publish_connectivity();
        }
        info!(role = %self.engine.role(), "Network event loop stopped");
    }

    // ========================================================================
    // Facade commands
    // ========================================================================

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::GetState { group_id, reply } => {
                let _ = reply.send(self.engine.state(&group_id).cloned());
            }
            Command::Subscribe {
                group_id,
                handler,
                reply,
            } => {
                let (id, effects) = self.engine.subscribe(group_id, handler);
                let _ = reply.send(id);
                self.execute(effects).await;
            }
            Command::Unsubscribe { id } => self.engine.unsubscribe(id),
            Command::Mutate { mutation, reply } => {
                let effects = self.engine.submit(mutation, reply);
                self.execute(effects).await;
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            // Handled by the loop itself.
            Command::Terminate { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn status(&self) -> NetworkStatus {
        NetworkStatus {
            local_peer_id: self.signaling.local_peer_id().cloned(),
            role: self.engine.role(),
            room_code: self.engine.room_code().cloned(),
            signaling: self.signaling.state(),
            connected: self.is_connected(),
            host_connected: self.engine.is_host_connected(),
            peers: self.peers.summaries(),
            groups: self.engine.group_ids(),
            pending_requests: self.engine.pending().len(),
        }
    }

    fn is_connected(&self) -> bool {
        if self.engine.role().is_host() {
            self.signaling.state() != SignalingState::Disconnected
                || !self.peers.connected_peers().is_empty()
        } else {
            self.engine.is_host_connected()
        }
    }

    fn publish_connectivity(&self) {
        let next = Connectivity {
            role: self.engine.role(),
            signaling: self.signaling.state(),
            connected: self.is_connected(),
            host_connected: self.engine.is_host_connected(),
            root_synced: self
                .engine
                .state(&self.config.root_group_id)
                .is_some(),
            connected_peers: self.peers.connected_peers().len(),
        };
        self.connectivity.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    // ========================================================================
    // Signaling
    // ========================================================================

    async fn on_signal(&mut self, event: SignalEvent) {
        match event {
            SignalEvent::PeerJoined { peer_id, is_host } => {
                match self.peers.on_peer_joined(&peer_id, is_host).await {
                    Ok(frames) => self.relay(frames),
                    Err(e) => warn!(peer = %peer_id, error = %e, "Failed to start negotiation"),
                }
            }
            SignalEvent::PeerLeft { peer_id } => {
                self.peers.on_peer_left(&peer_id).await;
                self.engine.on_peer_disconnected(&peer_id);
            }
            SignalEvent::Offer { from, offer } => {
                match self.peers.on_offer(&from, offer).await {
                    Ok(frames) => self.relay(frames),
                    Err(e) => warn!(peer = %from, error = %e, "Failed to answer offer"),
                }
            }
            SignalEvent::Answer { from, answer } => {
                if let Err(e) = self.peers.on_answer(&from, answer).await {
                    warn!(peer = %from, error = %e, "Answer rejected");
                }
            }
            SignalEvent::IceCandidate { from, candidate } => {
                if let Err(e) = self.peers.on_candidate(&from, candidate).await {
                    debug!(peer = %from, error = %e, "Candidate rejected");
                }
            }
            SignalEvent::Error { message } => {
                warn!(error = %message, "Signaling server reported an error");
            }
            SignalEvent::Disconnected => {
                warn!("Signaling connection lost; open peer channels stay up");
            }
        }
    }

    fn relay(&self, frames: Vec<SignalMessage>) {
        for frame in frames {
            let kind = frame.kind();
            if let Err(e) = self.signaling.send(frame) {
                warn!(kind, error = %e, "Failed to relay signaling frame");
            }
        }
    }

    // ========================================================================
    // Peer channels
    // ========================================================================

    async fn on_transport(&mut self, event: TransportEvent) {
        match self.peers.on_transport_event(event) {
            Some(ManagerEvent::Connected { peer }) => {
                info!(peer = %peer, "Peer channel open");
            }
            Some(ManagerEvent::Message { peer, data }) => self.on_frame(peer, &data).await,
            Some(ManagerEvent::Disconnected { peer, state }) => {
                info!(peer = %peer, state = %state, "Peer channel ended");
                self.engine.on_peer_disconnected(&peer);
            }
            Some(ManagerEvent::Signal(frame)) => self.relay(vec![frame]),
            None => {}
        }
    }

    async fn on_frame(&mut self, peer: PeerId, data: &[u8]) {
        let message = match DataMessage::decode(data) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer = %peer, error = %e, bytes = data.len(), "Dropping malformed frame");
                return;
            }
        };
        if let DataMessage::RoleAnnounce { role, .. } = &message {
            self.peers.set_remote_role(&peer, *role);
        }
        let effects = self.engine.handle_message(&peer, message);
        self.execute(effects).await;
    }

    async fn on_heartbeat(&mut self) {
        match DataMessage::Heartbeat.encode() {
            Ok(bytes) => {
                self.peers.broadcast(&bytes);
            }
            Err(e) => warn!(error = %e, "Failed to encode heartbeat"),
        }
        for event in self.peers.expire_stale(self.config.peer_timeout) {
            if let ManagerEvent::Disconnected { peer, .. } = event {
                self.engine.on_peer_disconnected(&peer);
            }
        }
    }

    // ========================================================================
    // Effects
    // ========================================================================

    async fn execute(&mut self, effects: Vec<Effect>) {
        let network_id = self.config.network_id.clone();
        for effect in effects {
            match effect {
                Effect::Send { peer, message } => {
                    let kind = message.kind();
                    let bytes = match message.encode() {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!(peer = %peer, kind, error = %e, "Failed to encode frame");
                            continue;
                        }
                    };
                    match self.peers.send(&peer, bytes) {
                        Ok(()) => {}
                        Err(TransportError::PeerUnavailable { .. }) => {
                            warn!(peer = %peer, kind, "Send to unavailable peer");
                            self.engine.on_peer_disconnected(&peer);
                        }
                        Err(e) => warn!(peer = %peer, kind, error = %e, "Send failed"),
                    }
                }
                Effect::Broadcast { message } => {
                    let kind = message.kind();
                    match message.encode() {
                        Ok(bytes) => {
                            let reached = self.peers.broadcast(&bytes);
                            debug!(kind, peers = reached.len(), "Broadcast");
                        }
                        Err(e) => warn!(kind, error = %e, "Failed to encode broadcast"),
                    }
                }
                Effect::PersistGroup { group_id, state } => {
                    if let Err(e) = self
                        .storage
                        .save_group_state(&network_id, &group_id, &state)
                        .await
                    {
                        warn!(group = %group_id, error = %e, "Failed to persist group state");
                    }
                }
                Effect::PersistContact {
                    group_id,
                    contact_id,
                    content,
                } => {
                    if let Err(e) = self
                        .storage
                        .save_contact_content(&network_id, &group_id, &contact_id, &content)
                        .await
                    {
                        warn!(contact = %contact_id, error = %e, "Failed to persist contact content");
                    }
                }
                Effect::Hydrate { group_id } => {
                    match self.storage.load_group_state(&network_id, &group_id).await {
                        Ok(Some(stored)) => self.engine.hydrate(stored),
                        Ok(None) => debug!(group = %group_id, "Nothing stored for group"),
                        Err(e) => warn!(group = %group_id, error = %e, "Failed to load group state"),
                    }
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        info!(role = %self.engine.role(), "Terminating network");
        self.engine.terminate();
        self.peers.close_all().await;
        self.signaling.close();
        self.commands.close();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
