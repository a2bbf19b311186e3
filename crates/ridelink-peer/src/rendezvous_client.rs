//! Long-lived connection to the rendezvous registry.
//!
//! A background task owns the read half and forwards every event into a
//! channel, so waiting for the next event can sit inside `select!` without
//! losing half-read frames.

use std::collections::VecDeque;
use std::net::SocketAddr;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ridelink_core::wire::{
    read_json, write_json, Registration, RegistrationStatus, RendezvousEvent, RendezvousPush,
};

use crate::error::NegotiateError;

/// Where a named peer can be dialed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub username: String,
    pub addr: SocketAddr,
}

impl PeerInfo {
    /// Peer named by an `online` reply or a `peerArrived` push.
    pub fn from_event(event: &RendezvousEvent) -> Option<Self> {
        match event {
            RendezvousEvent::Status(RegistrationStatus::Online {
                peer_username,
                address,
                port,
            }) => Some(Self {
                username: peer_username.clone(),
                addr: SocketAddr::new(*address, *port),
            }),
            RendezvousEvent::Push(RendezvousPush::PeerArrived {
                username,
                address,
                port,
            }) => Some(Self {
                username: username.clone(),
                addr: SocketAddr::new(*address, *port),
            }),
            _ => None,
        }
    }
}

pub struct RendezvousClient {
    writer: OwnedWriteHalf,
    events: mpsc::UnboundedReceiver<RendezvousEvent>,
    /// Pushes that arrived while waiting for a registration reply.
    buffered: VecDeque<RendezvousEvent>,
    reader: JoinHandle<()>,
}

impl RendezvousClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, NegotiateError> {
        let stream = TcpStream::connect(addr).await?;
        let (mut read_half, writer) = stream.into_split();
        let (tx, events) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            loop {
                match read_json::<_, RendezvousEvent>(&mut read_half).await {
                    Ok(Some(event)) => {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("registry closed the connection");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "registry connection failed");
                        return;
                    }
                }
            }
        });

        Ok(Self {
            writer,
            events,
            buffered: VecDeque::new(),
            reader,
        })
    }

    /// Register and wait for the direct reply (`online`, `waiting` or
    /// `error`). Pushes seen in the meantime stay queued for
    /// [`next_event`](Self::next_event).
    pub async fn register(
        &mut self,
        registration: &Registration,
    ) -> Result<RegistrationStatus, NegotiateError> {
        write_json(&mut self.writer, registration).await?;
        loop {
            match self.events.recv().await {
                Some(RendezvousEvent::Status(status)) => {
                    if let RegistrationStatus::Error { message, .. } = &status {
                        return Err(NegotiateError::Rejected(message.clone()));
                    }
                    return Ok(status);
                }
                Some(push) => self.buffered.push_back(push),
                None => return Err(NegotiateError::RegistryClosed),
            }
        }
    }

    /// Next event from the registry; `None` once the connection is gone.
    /// Cancel-safe.
    pub async fn next_event(&mut self) -> Option<RendezvousEvent> {
        if let Some(event) = self.buffered.pop_front() {
            return Some(event);
        }
        self.events.recv().await
    }

    /// Next peer introduction, skipping anything that names no peer.
    pub async fn next_peer(&mut self) -> Option<PeerInfo> {
        loop {
            let event = self.next_event().await?;
            if let Some(peer) = PeerInfo::from_event(&event) {
                return Some(peer);
            }
            tracing::debug!(?event, "ignoring registry event");
        }
    }
}

impl Drop for RendezvousClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
