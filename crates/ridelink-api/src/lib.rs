//! ridelink-api: TCP front-ends for the ride service and the rendezvous
//! registry. One tokio task per accepted connection.

pub mod handlers;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use ridelink_services::RendezvousRegistry;

pub use handlers::ApiState;

/// Accept ride-service clients until `shutdown` fires.
pub async fn serve_rides(
    listener: TcpListener,
    state: ApiState,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "ride service listening");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("ride service shutting down");
                return Ok(());
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "ride accept failed");
                        continue;
                    }
                };
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handlers::rides::handle_connection(stream, peer, state).await {
                        tracing::debug!(%peer, error = %e, "ride connection ended with error");
                    }
                });
            }
        }
    }
}

/// Accept rendezvous clients until `shutdown` fires.
pub async fn serve_rendezvous(
    listener: TcpListener,
    registry: RendezvousRegistry,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "rendezvous service listening");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("rendezvous service shutting down");
                return Ok(());
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "rendezvous accept failed");
                        continue;
                    }
                };
                let registry = registry.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        handlers::rendezvous::handle_connection(stream, peer, registry).await
                    {
                        tracing::debug!(%peer, error = %e, "rendezvous connection ended with error");
                    }
                });
            }
        }
    }
}
