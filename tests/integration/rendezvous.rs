use crate::*;

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde_json::json;

use ridelink_core::wire::{Registration, RegistrationStatus, RendezvousEvent};
use ridelink_peer::{NegotiateError, PeerInfo, RendezvousClient};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn registration(username: &str, port: u16, destination: &str) -> Registration {
    Registration {
        username: username.to_string(),
        p2p_port: port,
        destination_username: destination.to_string(),
    }
}

async fn next_peer_within(client: &mut RendezvousClient) -> Result<PeerInfo> {
    tokio::time::timeout(Duration::from_secs(2), client.next_peer())
        .await
        .context("no introduction within 2s")?
        .context("registry hung up")
}

/// bob arrives first and waits; alice's arrival introduces both sides.
#[tokio::test]
async fn waiting_peer_is_introduced_on_arrival() -> Result<()> {
    let node = Node::start().await?;
    let mut bob = RendezvousClient::connect(node.rendezvous_addr).await?;
    let mut alice = RendezvousClient::connect(node.rendezvous_addr).await?;

    let status = bob.register(&registration("bob", 5001, "alice")).await?;
    assert_eq!(status, RegistrationStatus::Waiting);

    let status = alice.register(&registration("alice", 5002, "bob")).await?;
    assert_eq!(
        status,
        RegistrationStatus::Online {
            peer_username: "bob".into(),
            address: LOCALHOST,
            port: 5001,
        }
    );

    let seen_by_bob = next_peer_within(&mut bob).await?;
    assert_eq!(seen_by_bob.username, "alice");
    assert_eq!(seen_by_bob.addr, SocketAddr::new(LOCALHOST, 5002));

    let seen_by_alice = next_peer_within(&mut alice).await?;
    assert_eq!(seen_by_alice.username, "bob");
    Ok(())
}

#[tokio::test]
async fn disconnect_forgets_the_registration() -> Result<()> {
    let node = Node::start().await?;
    {
        let mut bob = RendezvousClient::connect(node.rendezvous_addr).await?;
        bob.register(&registration("bob", 5001, "alice")).await?;
        assert!(node.registry.lookup("bob").is_some());
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while node.registry.lookup("bob").is_some() || node.registry.waiting_count() > 0 {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "bob never pruned");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut alice = RendezvousClient::connect(node.rendezvous_addr).await?;
    let status = alice.register(&registration("alice", 5002, "bob")).await?;
    assert_eq!(status, RegistrationStatus::Waiting);
    Ok(())
}

#[tokio::test]
async fn invalid_registration_is_rejected_but_connection_survives() -> Result<()> {
    let node = Node::start().await?;
    let mut client = RendezvousClient::connect(node.rendezvous_addr).await?;

    let err = client
        .register(&registration("alice", 5002, "alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiateError::Rejected(_)));

    let status = client.register(&registration("alice", 5002, "bob")).await?;
    assert_eq!(status, RegistrationStatus::Waiting);
    Ok(())
}

#[tokio::test]
async fn malformed_registration_gets_an_error_status() -> Result<()> {
    let node = Node::start().await?;
    let mut raw = TcpStream::connect(node.rendezvous_addr).await?;

    write_json(&mut raw, &json!({"username": "alice"})).await?;
    let reply: RendezvousEvent = read_json(&mut raw).await?.context("no reply")?;
    assert!(matches!(
        reply,
        RendezvousEvent::Status(RegistrationStatus::Error { .. })
    ));
    Ok(())
}
