//! Signaling backend seam

use super::protocol::SignalMessage;
use crate::error::TransportResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// An open, full-duplex connection to a rendezvous server
///
/// Dropping `outbound` closes the connection; `inbound` yields `None` once the
/// server side is gone.
#[derive(Debug)]
pub struct SignalingConnection {
    pub outbound: mpsc::UnboundedSender<SignalMessage>,
    pub inbound: mpsc::UnboundedReceiver<SignalMessage>,
}

/// Opens connections to a rendezvous server
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Establish a new connection
    async fn connect(&self) -> TransportResult<SignalingConnection>;

    /// Backend name for logs
    fn backend(&self) -> &'static str;
}
