//! Rendezvous connection handler.
//!
//! The socket is split: this task reads registrations, a writer task drains
//! the connection's event channel. Replies and pushes from other clients'
//! registrations all go through that channel, so they reach the wire in the
//! order the registry queued them.

use std::net::{IpAddr, SocketAddr};

use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use ridelink_core::wire::{read_frame, write_json, Registration, RendezvousEvent};
use ridelink_core::RideError;
use ridelink_services::{ConnId, EventSender, RendezvousRegistry};

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: RendezvousRegistry,
) -> anyhow::Result<()> {
    let conn_id = registry.open_connection();
    tracing::info!(%peer, conn_id, "rendezvous client connected");

    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<RendezvousEvent>();

    let writer_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = write_json(&mut writer, &event).await {
                tracing::debug!(conn_id, error = %e, "rendezvous write failed");
                break;
            }
        }
    });

    let address = peer.ip().to_canonical();
    let result = read_registrations(&mut reader, conn_id, &tx, address, &registry).await;

    registry.deregister(conn_id);
    drop(tx);
    let _ = writer_task.await;
    tracing::info!(%peer, conn_id, "rendezvous client disconnected");
    result
}

async fn read_registrations<R>(
    reader: &mut R,
    conn_id: ConnId,
    tx: &EventSender,
    address: IpAddr,
    registry: &RendezvousRegistry,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let body = match read_frame(reader).await {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!(conn_id, error = %e, "closing rendezvous connection on protocol error");
                let _ = tx.send(RendezvousEvent::error(&RideError::Protocol(e.to_string())));
                return Err(e.into());
            }
        };

        let registration = serde_json::from_slice::<Registration>(&body)
            .map_err(|e| RideError::Validation(format!("malformed registration: {e}")))
            .and_then(|reg| reg.validate().map(|()| reg));

        match registration {
            Ok(reg) => {
                registry.register(conn_id, tx, &reg, address);
            }
            Err(e) => {
                tracing::debug!(conn_id, error = %e, "registration rejected");
                let _ = tx.send(RendezvousEvent::error(&e));
            }
        }
    }
}
