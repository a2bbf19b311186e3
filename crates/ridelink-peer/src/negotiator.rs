//! Peer connection negotiation.
//!
//! Each client listens on an ephemeral port before it registers, so the port
//! can be advertised. When the registry introduces a peer, both sides apply
//! the same rule to decide who dials: the side whose `(port, username)`
//! tuple sorts lower connects out, the other waits for it. Usernames are
//! unique, so the tuples never tie.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use ridelink_core::config::PeerConfig;
use ridelink_core::wire::{read_json, write_json, PeerMessage, Registration, RegistrationStatus};

use crate::error::NegotiateError;
use crate::rendezvous_client::{PeerInfo, RendezvousClient};
use crate::session::{PeerSession, SessionSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Dial,
    Listen,
}

/// Who opens the connection between `local` and `peer`.
///
/// Both sides evaluate this with the arguments swapped and always reach
/// opposite answers.
pub fn initiator_role(local_port: u16, local: &str, peer_port: u16, peer: &str) -> Role {
    if (local_port, local) < (peer_port, peer) {
        Role::Dial
    } else {
        Role::Listen
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NegotiatorSettings {
    pub connect_timeout: Duration,
    pub accept_timeout: Duration,
}

impl From<&PeerConfig> for NegotiatorSettings {
    fn from(c: &PeerConfig) -> Self {
        Self {
            connect_timeout: c.connect_timeout(),
            accept_timeout: c.accept_timeout(),
        }
    }
}

impl Default for NegotiatorSettings {
    fn default() -> Self {
        Self::from(&PeerConfig::default())
    }
}

pub struct Negotiator {
    username: String,
    port: u16,
    slot: SessionSlot,
    settings: NegotiatorSettings,
    accept_task: JoinHandle<()>,
}

impl Negotiator {
    /// Bind the direct-connection listener on `bind_addr` (port 0 for an
    /// ephemeral one) and start accepting.
    pub async fn bind(
        username: &str,
        bind_addr: SocketAddr,
        settings: NegotiatorSettings,
    ) -> Result<Self, NegotiateError> {
        let listener = TcpListener::bind(bind_addr).await?;
        let port = listener.local_addr()?.port();
        let slot = SessionSlot::new();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            username.to_string(),
            slot.clone(),
            settings.accept_timeout,
        ));
        tracing::info!(username, port, "peer listener ready");

        Ok(Self {
            username: username.to_string(),
            port,
            slot,
            settings,
            accept_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn slot(&self) -> &SessionSlot {
        &self.slot
    }

    /// Establish the direct session with `peer`, dialing or waiting as the
    /// tie-break decides. Returns the session already held if it is with
    /// the same peer.
    pub async fn negotiate(&self, peer: &PeerInfo) -> Result<Arc<PeerSession>, NegotiateError> {
        if let Some(current) = self.slot.current() {
            return if current.peer() == peer.username {
                Ok(current)
            } else {
                Err(NegotiateError::SessionActive(current.peer().to_string()))
            };
        }

        let role = initiator_role(self.port, &self.username, peer.addr.port(), &peer.username);
        tracing::debug!(peer = %peer.username, addr = %peer.addr, ?role, "negotiating");

        match role {
            Role::Dial => self.dial(peer).await,
            Role::Listen => self
                .slot
                .wait_for(&peer.username, self.settings.accept_timeout)
                .await
                .ok_or_else(|| NegotiateError::PeerUnreachable(peer.username.clone())),
        }
    }

    async fn dial(&self, peer: &PeerInfo) -> Result<Arc<PeerSession>, NegotiateError> {
        let unreachable = || NegotiateError::PeerUnreachable(peer.username.clone());

        let mut stream =
            match tokio::time::timeout(self.settings.connect_timeout, TcpStream::connect(peer.addr))
                .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    tracing::info!(peer = %peer.username, error = %e, "direct connect failed");
                    return Err(unreachable());
                }
                Err(_) => {
                    tracing::info!(peer = %peer.username, "direct connect timed out");
                    return Err(unreachable());
                }
            };

        write_json(
            &mut stream,
            &PeerMessage::Hello {
                username: self.username.clone(),
            },
        )
        .await?;

        let session = Arc::new(PeerSession::new(&self.username, &peer.username, stream));
        match self.slot.install(session.clone()) {
            Ok(s) => Ok(s),
            Err(existing) => {
                session.close().await;
                if existing.peer() == peer.username {
                    Ok(existing)
                } else {
                    Err(NegotiateError::SessionActive(existing.peer().to_string()))
                }
            }
        }
    }

    /// Register with the registry as wanting `destination` and keep going
    /// until a direct session with it exists.
    ///
    /// An unreachable peer is not fatal: the client keeps waiting for the
    /// next `online` / `peerArrived` notice about it.
    pub async fn connect_via_rendezvous(
        &self,
        registry: &mut RendezvousClient,
        destination: &str,
    ) -> Result<Arc<PeerSession>, NegotiateError> {
        let registration = Registration {
            username: self.username.clone(),
            p2p_port: self.port,
            destination_username: destination.to_string(),
        };
        let mut next = match registry.register(&registration).await? {
            RegistrationStatus::Online {
                peer_username,
                address,
                port,
            } => Some(PeerInfo {
                username: peer_username,
                addr: SocketAddr::new(address, port),
            }),
            RegistrationStatus::Waiting => {
                tracing::info!(destination, "waiting for peer to come online");
                None
            }
            RegistrationStatus::Error { message, .. } => {
                return Err(NegotiateError::Rejected(message))
            }
        };

        loop {
            if let Some(peer) = next.take() {
                if peer.username == destination {
                    match self.negotiate(&peer).await {
                        Ok(session) => return Ok(session),
                        Err(NegotiateError::PeerUnreachable(name)) => {
                            tracing::info!(peer = %name, "peer unreachable, waiting for a fresh notification");
                        }
                        Err(e) => return Err(e),
                    }
                } else {
                    tracing::debug!(peer = %peer.username, "introduction for another peer ignored");
                }
            }

            tokio::select! {
                event = registry.next_peer() => match event {
                    Some(peer) => next = Some(peer),
                    None => return Err(NegotiateError::RegistryClosed),
                },
                session = self.slot.wait_for(destination, Duration::from_secs(3600)) => {
                    if let Some(session) = session {
                        return Ok(session);
                    }
                }
            }
        }
    }
}

impl Drop for Negotiator {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, local: String, slot: SessionSlot, hello_timeout: Duration) {
    loop {
        let (mut stream, addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "peer accept failed");
                continue;
            }
        };

        if let Some(current) = slot.current() {
            tracing::info!(%addr, held = current.peer(), "rejecting extra peer connection");
            drop(stream);
            continue;
        }

        let slot = slot.clone();
        let local = local.clone();
        tokio::spawn(async move {
            let hello = tokio::time::timeout(hello_timeout, read_json::<_, PeerMessage>(&mut stream)).await;
            let peer = match hello {
                Ok(Ok(Some(PeerMessage::Hello { username }))) => username,
                Ok(Ok(Some(_))) => {
                    tracing::debug!(%addr, "first peer message was not hello");
                    return;
                }
                Ok(Ok(None)) | Ok(Err(_)) | Err(_) => {
                    tracing::debug!(%addr, "no hello from incoming peer");
                    return;
                }
            };

            let session = Arc::new(PeerSession::new(&local, &peer, stream));
            if let Err(held) = slot.install(session.clone()) {
                tracing::info!(%addr, peer = %peer, held = held.peer(), "rejecting extra peer connection");
                session.close().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    fn quick() -> NegotiatorSettings {
        NegotiatorSettings {
            connect_timeout: Duration::from_millis(500),
            accept_timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn exactly_one_side_dials() {
        let cases = [
            (4000, "alice", 5000, "bob"),
            (5000, "alice", 4000, "bob"),
            (4000, "alice", 4000, "bob"),
            (4000, "bob", 4000, "alice"),
            (1, "zed", 65535, "amy"),
        ];
        for (lp, l, pp, p) in cases {
            let a = initiator_role(lp, l, pp, p);
            let b = initiator_role(pp, p, lp, l);
            assert_ne!(a, b, "{l}:{lp} vs {p}:{pp}");
        }
    }

    #[test]
    fn lower_port_dials_first_then_name_breaks_ties() {
        assert_eq!(initiator_role(4000, "zed", 5000, "amy"), Role::Dial);
        assert_eq!(initiator_role(4000, "amy", 4000, "zed"), Role::Dial);
        assert_eq!(initiator_role(4000, "zed", 4000, "amy"), Role::Listen);
    }

    #[tokio::test]
    async fn both_sides_end_up_with_one_session() {
        let alice = Negotiator::bind("alice", loopback(), quick()).await.unwrap();
        let bob = Negotiator::bind("bob", loopback(), quick()).await.unwrap();

        let to_bob = PeerInfo {
            username: "bob".into(),
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), bob.port()),
        };
        let to_alice = PeerInfo {
            username: "alice".into(),
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), alice.port()),
        };

        let (a, b) = tokio::join!(alice.negotiate(&to_bob), bob.negotiate(&to_alice));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.peer(), "bob");
        assert_eq!(b.peer(), "alice");

        a.send_chat("hello").await.unwrap();
        match b.recv().await.unwrap().unwrap() {
            PeerMessage::Chat { text, .. } => assert_eq!(text, "hello"),
            other => panic!("unexpected {other:?}"),
        }

        // asking again hands back the same session
        let again = alice.negotiate(&to_bob).await.unwrap();
        assert!(Arc::ptr_eq(&again, &a));
    }

    #[tokio::test]
    async fn unreachable_peer_is_reported() {
        // a port nobody listens on: bind then drop
        let dead = TcpListener::bind(loopback()).await.unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);

        let alice = Negotiator::bind("alice", loopback(), quick()).await.unwrap();
        let ghost = PeerInfo {
            username: "ghost".into(),
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), dead_port),
        };
        assert!(matches!(
            alice.negotiate(&ghost).await,
            Err(NegotiateError::PeerUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn extra_incoming_connection_is_closed() {
        let alice = Negotiator::bind("alice", loopback(), quick()).await.unwrap();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), alice.port());

        let mut first = TcpStream::connect(addr).await.unwrap();
        write_json(&mut first, &PeerMessage::Hello { username: "bob".into() })
            .await
            .unwrap();
        assert!(alice.slot().wait_for("bob", Duration::from_secs(2)).await.is_some());

        let mut second = TcpStream::connect(addr).await.unwrap();
        let _ = write_json(&mut second, &PeerMessage::Hello { username: "carol".into() }).await;
        let closed = tokio::time::timeout(
            Duration::from_secs(2),
            read_json::<_, PeerMessage>(&mut second),
        )
        .await
        .unwrap();
        assert!(matches!(closed, Ok(None) | Err(_)));
        assert_eq!(alice.slot().current().unwrap().peer(), "bob");
    }
}
