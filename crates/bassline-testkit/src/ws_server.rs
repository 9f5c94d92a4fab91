//! Minimal WebSocket rendezvous server
//!
//! Speaks the signaling protocol over JSON text frames, routing through a
//! [`RoomRegistry`]. Good enough to drive the WebSocket signaling backend end to
//! end; it keeps no state beyond open connections.

use anyhow::Context;
use bassline_core::PeerId;
use bassline_transport::{RoomRegistry, Routed, SignalMessage};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

#[derive(Default)]
struct ServerState {
    registry: RoomRegistry,
    clients: HashMap<PeerId, mpsc::UnboundedSender<SignalMessage>>,
}

impl ServerState {
    fn deliver(&self, routed: Vec<Routed>) {
        for Routed { to, message } in routed {
            if let Some(client) = self.clients.get(&to) {
                let _ = client.send(message);
            }
        }
    }

    fn drop_client(&mut self, peer: &PeerId) {
        if self.clients.remove(peer).is_some() {
            let routed = self.registry.disconnect(peer);
            self.deliver(routed);
        }
    }
}

/// Running rendezvous server; stops when dropped
pub struct WsRendezvousServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    accept_task: JoinHandle<()>,
}

impl WsRendezvousServer {
    /// Listen on an ephemeral localhost port
    pub async fn start() -> anyhow::Result<Self> {
        Self::bind("127.0.0.1:0".parse()?).await
    }

    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding rendezvous server to {addr}"))?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ServerState::default()));
        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        tokio::spawn(serve(stream, remote, accept_state.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "Rendezvous accept failed");
                        break;
                    }
                }
            }
        });
        info!(%addr, "WebSocket rendezvous server listening");
        Ok(Self {
            addr,
            state,
            accept_task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://` URL for [`WebSocketConnector`](bassline_transport::WebSocketConnector)
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    pub fn room_count(&self) -> usize {
        self.state.lock().registry.room_count()
    }
}

impl Drop for WsRendezvousServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(stream: TcpStream, remote: SocketAddr, state: Arc<Mutex<ServerState>>) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(%remote, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    let (mut sink, mut source) = socket.split();
    let (to_client, mut outbound) = mpsc::unbounded_channel::<SignalMessage>();
    let peer = {
        let mut guard = state.lock();
        let peer = guard.registry.register();
        guard.clients.insert(peer.clone(), to_client);
        peer
    };
    debug!(peer = %peer, %remote, "Rendezvous client connected");

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = source.next().await {
        let payload = match frame {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        match serde_json::from_slice::<SignalMessage>(&payload) {
            Ok(message) => {
                let mut guard = state.lock();
                let routed = guard.registry.handle(&peer, message);
                guard.deliver(routed);
            }
            Err(e) => warn!(peer = %peer, error = %e, "Dropping malformed signaling frame"),
        }
    }

    state.lock().drop_client(&peer);
    writer.abort();
    debug!(peer = %peer, "Rendezvous client disconnected");
}
