//! Direct TCP peer transport
//!
//! The offering side binds a one-shot listener and advertises
//! `{addr, token}`; the answering side connects and proves it saw the offer by
//! sending the token as its first frame. Frames are a big-endian `u32` length
//! followed by the payload.

use super::transport::{DataChannel, PeerTransport, TransportEvent};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use bassline_core::PeerId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// TCP transport settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpTransportConfig {
    /// Address offers listen on; port 0 picks a free port per offer
    pub bind_addr: SocketAddr,
    /// Bound on connecting to an offer and on waiting for the answerer
    pub connect_timeout: Duration,
    pub max_frame_len: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            connect_timeout: Duration::from_secs(5),
            max_frame_len: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TcpOffer {
    addr: SocketAddr,
    token: String,
}

/// Direct TCP [`PeerTransport`]
#[derive(Debug)]
pub struct TcpTransport {
    config: TcpTransportConfig,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    listeners: Arc<Mutex<HashMap<PeerId, JoinHandle<()>>>>,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            events_tx,
            events_rx: Some(events_rx),
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(TcpTransportConfig::default())
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> TransportResult<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| TransportError::Protocol("frame too large".to_string()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> TransportResult<Vec<u8>> {
    let len = reader.read_u32().await? as usize;
    if len > max_len {
        return Err(TransportError::Protocol(format!(
            "frame of {len} bytes exceeds limit of {max_len}"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Split an authenticated stream into reader/writer tasks and report it open
fn open_channel(
    peer: PeerId,
    stream: TcpStream,
    max_frame_len: usize,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let writer_peer = peer.clone();
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &payload).await {
                warn!(peer = %writer_peer, error = %e, "TCP channel write failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let reader_events = events.clone();
    let reader_peer = peer.clone();
    tokio::spawn(async move {
        loop {
            match read_frame(&mut reader, max_frame_len).await {
                Ok(data) => {
                    let event = TransportEvent::Message {
                        peer: reader_peer.clone(),
                        data,
                    };
                    if reader_events.send(event).is_err() {
                        return;
                    }
                }
                Err(TransportError::Io(reason)) => {
                    debug!(peer = %reader_peer, %reason, "TCP channel ended");
                    break;
                }
                Err(e) => {
                    let _ = reader_events.send(TransportEvent::Failed {
                        peer: reader_peer.clone(),
                        reason: e.to_string(),
                    });
                    return;
                }
            }
        }
        let _ = reader_events.send(TransportEvent::ChannelClosed { peer: reader_peer });
    });

    let _ = events.send(TransportEvent::ChannelOpen {
        peer: peer.clone(),
        channel: DataChannel::new(peer, tx),
    });
}

#[async_trait]
impl PeerTransport for TcpTransport {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    async fn create_offer(&self, remote: &PeerId) -> TransportResult<Value> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        let token = Uuid::new_v4().to_string();
        info!(peer = %remote, %addr, "TCP offer listening");

        let peer = remote.clone();
        let expected = token.clone();
        let events = self.events_tx.clone();
        let wait = self.config.connect_timeout;
        let max_frame_len = self.config.max_frame_len;
        let listeners = self.listeners.clone();
        let handle = tokio::spawn(async move {
            let accepted = timeout(wait, async {
                let (mut stream, from) = listener.accept().await?;
                let presented = read_frame(&mut stream, expected.len()).await?;
                if presented != expected.as_bytes() {
                    return Err(TransportError::NegotiationFailed {
                        peer: peer.clone(),
                        reason: format!("bad token from {from}"),
                    });
                }
                Ok::<_, TransportError>(stream)
            })
            .await;
            listeners.lock().remove(&peer);
            match accepted {
                Ok(Ok(stream)) => open_channel(peer, stream, max_frame_len, events),
                Ok(Err(e)) => {
                    let _ = events.send(TransportEvent::Failed {
                        peer,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    let _ = events.send(TransportEvent::Failed {
                        peer,
                        reason: "answerer never connected".to_string(),
                    });
                }
            }
        });
        if let Some(previous) = self.listeners.lock().insert(remote.clone(), handle) {
            previous.abort();
        }

        Ok(serde_json::to_value(TcpOffer { addr, token })?)
    }

    async fn accept_offer(&self, remote: &PeerId, offer: Value) -> TransportResult<Value> {
        let TcpOffer { addr, token } = serde_json::from_value(offer)?;
        let mut stream = timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: format!("tcp connect {addr}"),
                timeout_ms: self.config.connect_timeout.as_millis() as u64,
            })??;
        write_frame(&mut stream, token.as_bytes()).await?;
        info!(peer = %remote, %addr, "TCP offer accepted");
        open_channel(
            remote.clone(),
            stream,
            self.config.max_frame_len,
            self.events_tx.clone(),
        );
        Ok(json!({ "accepted": true }))
    }

    async fn accept_answer(&self, remote: &PeerId, answer: Value) -> TransportResult<()> {
        debug!(peer = %remote, %answer, "TCP answer received");
        Ok(())
    }

    async fn add_candidate(&self, remote: &PeerId, candidate: Value) -> TransportResult<()> {
        // Offers carry their address; candidates are informational only.
        debug!(peer = %remote, %candidate, "TCP candidate ignored");
        Ok(())
    }

    async fn close(&self, remote: &PeerId) {
        if let Some(handle) = self.listeners.lock().remove(remote) {
            handle.abort();
        }
    }

    fn transport_type(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn offer_answer_opens_framed_channel() {
        let mut host = TcpTransport::default();
        let mut guest = TcpTransport::default();
        let mut host_events = host.take_events().unwrap();
        let mut guest_events = guest.take_events().unwrap();
        let (host_id, guest_id) = (PeerId::new("host"), PeerId::new("guest"));

        let offer = host.create_offer(&guest_id).await.unwrap();
        let answer = guest.accept_offer(&host_id, offer).await.unwrap();
        host.accept_answer(&guest_id, answer).await.unwrap();

        let to_host = assert_matches!(
            guest_events.recv().await,
            Some(TransportEvent::ChannelOpen { peer, channel }) if peer == host_id => channel
        );
        let to_guest = assert_matches!(
            host_events.recv().await,
            Some(TransportEvent::ChannelOpen { peer, channel }) if peer == guest_id => channel
        );

        to_host.send(b"first".to_vec()).unwrap();
        to_host.send(b"second".to_vec()).unwrap();
        assert_matches!(
            host_events.recv().await,
            Some(TransportEvent::Message { data, .. }) if data == b"first"
        );
        assert_matches!(
            host_events.recv().await,
            Some(TransportEvent::Message { data, .. }) if data == b"second"
        );

        drop(to_guest);
        assert_matches!(
            guest_events.recv().await,
            Some(TransportEvent::ChannelClosed { peer }) if peer == host_id
        );
    }

    #[tokio::test]
    async fn wrong_token_fails_the_offer() {
        let mut host = TcpTransport::default();
        let mut host_events = host.take_events().unwrap();
        let guest = TcpTransport::default();
        let guest_id = PeerId::new("guest");

        let offer = host.create_offer(&guest_id).await.unwrap();
        let mut forged: TcpOffer = serde_json::from_value(offer).unwrap();
        forged.token = "x".repeat(forged.token.len());
        guest
            .accept_offer(&PeerId::new("host"), serde_json::to_value(forged).unwrap())
            .await
            .unwrap();

        assert_matches!(
            host_events.recv().await,
            Some(TransportEvent::Failed { peer, .. }) if peer == guest_id
        );
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, &[0u8; 32]).await.unwrap();
        assert_matches!(read_frame(&mut b, 16).await, Err(TransportError::Protocol(_)));
    }
}
