use crate::*;

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use ridelink_core::wire::PeerMessage;
use ridelink_peer::{Negotiator, NegotiatorSettings, RendezvousClient};

fn settings() -> NegotiatorSettings {
    NegotiatorSettings {
        connect_timeout: Duration::from_secs(2),
        accept_timeout: Duration::from_secs(3),
    }
}

fn any_port() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

/// Both users go through the registry and end up chatting over one
/// direct connection, whichever of them registered first.
#[tokio::test]
async fn two_users_meet_and_chat() -> Result<()> {
    let node = Node::start().await?;

    let alice = Negotiator::bind("alice", any_port(), settings()).await?;
    let bob = Negotiator::bind("bob", any_port(), settings()).await?;
    let mut alice_reg = RendezvousClient::connect(node.rendezvous_addr).await?;
    let mut bob_reg = RendezvousClient::connect(node.rendezvous_addr).await?;

    let bob_side = async {
        let session = bob.connect_via_rendezvous(&mut bob_reg, "alice").await?;
        anyhow::Ok(session)
    };
    let alice_side = async {
        // let bob be the one waiting
        tokio::time::sleep(Duration::from_millis(50)).await;
        let session = alice.connect_via_rendezvous(&mut alice_reg, "bob").await?;
        anyhow::Ok(session)
    };

    let (to_alice, to_bob) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::try_join!(bob_side, alice_side)
    })
    .await
    .context("negotiation did not finish")??;

    assert_eq!(to_alice.peer(), "alice");
    assert_eq!(to_bob.peer(), "bob");

    to_bob.send_chat("see you at 8").await?;
    match to_alice.recv().await? {
        Some(PeerMessage::Chat { from, text, .. }) => {
            assert_eq!(from, "alice");
            assert_eq!(text, "see you at 8");
        }
        other => anyhow::bail!("unexpected {other:?}"),
    }

    to_alice.send_chat("ok").await?;
    match to_bob.recv().await? {
        Some(PeerMessage::Chat { text, .. }) => assert_eq!(text, "ok"),
        other => anyhow::bail!("unexpected {other:?}"),
    }
    Ok(())
}

/// A user already in a session does not take a second one.
#[tokio::test]
async fn one_session_per_client() -> Result<()> {
    let node = Node::start().await?;

    let alice = Negotiator::bind("alice", any_port(), settings()).await?;
    let bob = Negotiator::bind("bob", any_port(), settings()).await?;
    let mut alice_reg = RendezvousClient::connect(node.rendezvous_addr).await?;
    let mut bob_reg = RendezvousClient::connect(node.rendezvous_addr).await?;

    let (a, b) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::try_join!(
            alice.connect_via_rendezvous(&mut alice_reg, "bob"),
            bob.connect_via_rendezvous(&mut bob_reg, "alice"),
        )
    })
    .await
    .context("negotiation did not finish")??;
    assert_eq!(a.peer(), "bob");
    assert_eq!(b.peer(), "alice");

    let carol = ridelink_peer::PeerInfo {
        username: "carol".into(),
        addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9),
    };
    let err = alice.negotiate(&carol).await.unwrap_err();
    assert!(matches!(err, ridelink_peer::NegotiateError::SessionActive(ref p) if p == "bob"));
    Ok(())
}
