//! ridelink integration test harness.
//!
//! Each test starts its own ride service and rendezvous registry on
//! ephemeral loopback ports, so tests run in parallel without sharing
//! state:
//!
//!   cargo test --test integration

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use ridelink_api::ApiState;
use ridelink_core::config::RideLinkConfig;
use ridelink_core::wire::{read_json, write_json};
use ridelink_services::RendezvousRegistry;

mod negotiation;
mod rendezvous;
mod rides;

// ── Harness ───────────────────────────────────────────────────────────────────

/// A running pair of services. Dropping it shuts both down.
pub struct Node {
    pub ride_addr: SocketAddr,
    pub rendezvous_addr: SocketAddr,
    pub state: ApiState,
    pub registry: RendezvousRegistry,
    shutdown: broadcast::Sender<()>,
}

impl Node {
    pub async fn start() -> Result<Self> {
        Self::start_with(RideLinkConfig::default()).await
    }

    pub async fn start_with(config: RideLinkConfig) -> Result<Self> {
        let state = ApiState::from_config(&config)?;
        let registry = RendezvousRegistry::new();

        let rides = TcpListener::bind("127.0.0.1:0").await?;
        let rendezvous = TcpListener::bind("127.0.0.1:0").await?;
        let ride_addr = rides.local_addr()?;
        let rendezvous_addr = rendezvous.local_addr()?;

        let (shutdown, _) = broadcast::channel(1);
        tokio::spawn(ridelink_api::serve_rides(
            rides,
            state.clone(),
            shutdown.subscribe(),
        ));
        tokio::spawn(ridelink_api::serve_rendezvous(
            rendezvous,
            registry.clone(),
            shutdown.subscribe(),
        ));

        Ok(Self {
            ride_addr,
            rendezvous_addr,
            state,
            registry,
            shutdown,
        })
    }

    /// Raw connection to the ride service.
    pub async fn raw_rides(&self) -> Result<TcpStream> {
        TcpStream::connect(self.ride_addr)
            .await
            .context("ride service not reachable")
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Send one JSON value and read one JSON reply.
pub async fn call(stream: &mut TcpStream, msg: serde_json::Value) -> Result<serde_json::Value> {
    write_json(stream, &msg).await?;
    read_json(stream)
        .await?
        .context("connection closed before reply")
}
