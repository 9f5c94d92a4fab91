//! Request/response correlation
//!
//! Outgoing requests are recorded before they are sent, keyed by a
//! [`RequestId`] built from the local peer id and a monotonic counter. Each entry
//! leaves the table exactly once: on its response, on its deadline, or when the
//! peer it was addressed to goes away. Late responses find no entry and are
//! ignored.

use bassline_core::{NetworkError, NetworkResult, PeerId, RequestId};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Completion handle for one request
pub type RpcReply = oneshot::Sender<NetworkResult<Value>>;

#[derive(Debug)]
struct PendingEntry {
    peer: PeerId,
    method: String,
    deadline: Instant,
    reply: RpcReply,
}

/// Table of requests awaiting a response
#[derive(Debug)]
pub struct PendingRequests {
    timeout: Duration,
    counter: u64,
    entries: HashMap<RequestId, PendingEntry>,
}

impl PendingRequests {
    /// Empty table whose requests expire after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            counter: 0,
            entries: HashMap::new(),
        }
    }

    /// Configured request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allocate the next correlation id for requests issued by `local`
    pub fn next_id(&mut self, local: &PeerId) -> RequestId {
        self.counter += 1;
        RequestId::for_peer(local, self.counter)
    }

    /// Record a request to `peer`; returns its deadline
    pub fn register(
        &mut self,
        id: RequestId,
        peer: PeerId,
        method: impl Into<String>,
        reply: RpcReply,
    ) -> Instant {
        let deadline = Instant::now() + self.timeout;
        self.entries.insert(
            id,
            PendingEntry {
                peer,
                method: method.into(),
                deadline,
                reply,
            },
        );
        deadline
    }

    /// Settle the request answered by a `response` from `from`
    ///
    /// Returns `false` when no matching entry exists (late, duplicate or
    /// misdirected response).
    pub fn resolve(
        &mut self,
        id: &RequestId,
        from: &PeerId,
        data: Option<Value>,
        error: Option<String>,
    ) -> bool {
        match self.entries.get(id) {
            Some(entry) if &entry.peer == from => {}
            Some(entry) => {
                warn!(request = %id, expected = %entry.peer, from = %from, "Response from wrong peer");
                return false;
            }
            None => {
                debug!(request = %id, "Ignoring response with no pending request");
                return false;
            }
        }
        let Some(entry) = self.entries.remove(id) else {
            return false;
        };
        let outcome = match error {
            Some(message) => Err(NetworkError::from_wire(&message)),
            None => Ok(data.unwrap_or(Value::Null)),
        };
        debug!(request = %id, method = %entry.method, ok = outcome.is_ok(), "Request settled");
        let _ = entry.reply.send(outcome);
        true
    }

    /// Reject every request addressed to `peer` with `PeerUnavailable`
    pub fn reject_peer(&mut self, peer: &PeerId) -> usize {
        let ids: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|(_, entry)| &entry.peer == peer)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(entry) = self.entries.remove(id) {
                let _ = entry.reply.send(Err(NetworkError::PeerUnavailable {
                    peer_id: peer.clone(),
                }));
            }
        }
        if !ids.is_empty() {
            warn!(peer = %peer, rejected = ids.len(), "Rejected requests to departed peer");
        }
        ids.len()
    }

    /// Reject every request whose deadline is at or before `now`
    pub fn expire(&mut self, now: Instant) -> Vec<RequestId> {
        let expired: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        let timeout_ms = self.timeout.as_millis() as u64;
        for id in &expired {
            if let Some(entry) = self.entries.remove(id) {
                warn!(request = %id, peer = %entry.peer, method = %entry.method, "Request timed out");
                let _ = entry.reply.send(Err(NetworkError::RequestTimeout {
                    request_id: id.clone(),
                    timeout_ms,
                }));
            }
        }
        expired
    }

    /// Earliest deadline in the table
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.deadline).min()
    }

    /// Whether `id` is still awaiting a response
    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of outstanding requests
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no request is outstanding
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry without completing it
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
