//! Room fixtures
//!
//! A [`TestRoom`] is one host and any number of guests wired together through
//! the in-memory rendezvous and transport, each guest already bootstrapped.

use crate::storage::MemoryStorage;
use anyhow::Context;
use bassline_core::RoomCode;
use bassline_network::{Network, NetworkConfig};
use bassline_transport::{MemoryRendezvous, MemoryTransportHub};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// How long fixtures wait for guests to become ready
pub const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Host plus guests sharing in-memory backends
pub struct TestRoom {
    pub rendezvous: MemoryRendezvous,
    pub hub: MemoryTransportHub,
    pub config: NetworkConfig,
    /// Storage behind the host
    pub storage: MemoryStorage,
    pub host: Network,
    pub guests: Vec<Network>,
}

impl TestRoom {
    /// Room `code` with `guests` guests and default settings
    pub async fn start(code: &str, guests: usize) -> anyhow::Result<Self> {
        Self::with_config(code, guests, NetworkConfig::default(), MemoryStorage::new()).await
    }

    pub async fn with_config(
        code: &str,
        guests: usize,
        config: NetworkConfig,
        storage: MemoryStorage,
    ) -> anyhow::Result<Self> {
        let rendezvous = MemoryRendezvous::new();
        let hub = MemoryTransportHub::new();
        let host = Network::builder(config.clone())
            .signaling(rendezvous.clone())
            .transport(hub.transport())
            .storage(Arc::new(storage.clone()))
            .create_room(Some(RoomCode::new(code)))
            .await
            .context("host failed to create room")?;

        let mut room = Self {
            rendezvous,
            hub,
            config,
            storage,
            host,
            guests: Vec::new(),
        };
        for _ in 0..guests {
            room.add_guest().await?;
        }
        Ok(room)
    }

    /// Join one more guest and wait for its bootstrap
    pub async fn add_guest(&mut self) -> anyhow::Result<Network> {
        let guest = self.join().await?;
        guest
            .wait_until_ready(READY_TIMEOUT)
            .await
            .context("guest never became ready")?;
        self.guests.push(guest.clone());
        Ok(guest)
    }

    /// Join a guest without waiting and without tracking it
    pub async fn join(&self) -> anyhow::Result<Network> {
        Ok(Network::builder(self.config.clone())
            .signaling(self.rendezvous.clone())
            .transport(self.hub.transport())
            .join_room(self.host.room_code().clone())
            .await?)
    }

    pub fn guest(&self, index: usize) -> &Network {
        &self.guests[index]
    }

    /// Every member, host first
    pub fn members(&self) -> Vec<&Network> {
        std::iter::once(&self.host).chain(&self.guests).collect()
    }

    /// Terminate every member
    pub async fn shutdown(self) -> anyhow::Result<()> {
        for member in self.members() {
            member.terminate().await?;
        }
        Ok(())
    }
}

/// Poll `check` until it returns `true` or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
