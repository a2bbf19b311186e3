//! ridelinkd: ride matching and rendezvous daemon.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use ridelink_api::ApiState;
use ridelink_core::config::RideLinkConfig;
use ridelink_services::RendezvousRegistry;

mod maintenance;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = RideLinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = RideLinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        RideLinkConfig::default()
    });
    tracing::info!(
        path = %RideLinkConfig::file_path().display(),
        tolerance_min = config.matching.time_tolerance_minutes,
        request_ttl_secs = config.requests.ttl_secs,
        "ridelinkd starting"
    );

    // Shared state
    let state = ApiState::from_config(&config)?;
    let registry = RendezvousRegistry::new();

    let ride_listener = TcpListener::bind(&config.network.ride_listen)
        .await
        .with_context(|| format!("failed to bind ride service on {}", config.network.ride_listen))?;
    let rendezvous_listener = TcpListener::bind(&config.network.rendezvous_listen)
        .await
        .with_context(|| {
            format!(
                "failed to bind rendezvous service on {}",
                config.network.rendezvous_listen
            )
        })?;

    // ── Shutdown channel ─────────────────────────────────────────────────────

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let ride_task = tokio::spawn(ridelink_api::serve_rides(
        ride_listener,
        state.clone(),
        shutdown_tx.subscribe(),
    ));

    let rendezvous_task = tokio::spawn(ridelink_api::serve_rendezvous(
        rendezvous_listener,
        registry.clone(),
        shutdown_tx.subscribe(),
    ));

    let expiry_task = tokio::spawn(maintenance::expiry_loop(
        state.clone(),
        Duration::from_secs(config.requests.expiry_check_secs),
        config.requests.ttl(),
    ));

    let stats_task = tokio::spawn({
        let state = state.clone();
        let registry = registry.clone();
        let every = config.stats_interval_secs;
        async move {
            if every == 0 {
                return std::future::pending::<()>().await;
            }
            maintenance::stats_loop(state, registry, Duration::from_secs(every)).await
        }
    });

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = ride_task           => tracing::error!("ride service exited: {:?}", r),
        r = rendezvous_task     => tracing::error!("rendezvous service exited: {:?}", r),
        r = expiry_task         => tracing::error!("expiry task exited: {:?}", r),
        r = stats_task          => tracing::error!("stats task exited: {:?}", r),
    }

    Ok(())
}
