//! Bassline Testing Infrastructure
//!
//! Shared fixtures for integration tests across the workspace:
//!
//! - [`MemoryStorage`]: storage collaborator backed by process memory
//! - [`WsRendezvousServer`]: WebSocket rendezvous server on an ephemeral port
//! - [`TestRoom`]: a host and N guests over the in-memory backends
//! - [`init_test_tracing`]: opt-in log output for a test run
//!
//! Add it to a crate's dev-dependencies:
//! ```toml
//! [dev-dependencies]
//! bassline-testkit = { path = "../bassline-testkit" }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

pub mod fixtures;
pub mod storage;
pub mod ws_server;

pub use bassline_transport::{MemoryRendezvous, MemoryTransportHub};
pub use fixtures::{eventually, TestRoom, READY_TIMEOUT};
pub use storage::MemoryStorage;
pub use ws_server::WsRendezvousServer;

/// Install a log subscriber filtered by `RUST_LOG`
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
