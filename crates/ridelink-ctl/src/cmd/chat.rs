//! Direct chat with another user, set up through the rendezvous registry.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use ridelink_core::config::PeerConfig;
use ridelink_core::wire::PeerMessage;
use ridelink_peer::{Negotiator, NegotiatorSettings, RendezvousClient};

pub async fn cmd_chat(rendezvous_addr: &str, peer: &PeerConfig, me: &str, other: &str) -> Result<()> {
    let negotiator = Negotiator::bind(
        me,
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        NegotiatorSettings::from(peer),
    )
    .await
    .context("failed to open the peer listener")?;

    let mut registry = RendezvousClient::connect(rendezvous_addr)
        .await
        .with_context(|| format!("failed to reach the registry at {rendezvous_addr}"))?;

    println!("Waiting for {other} (listening on port {})...", negotiator.port());
    let session = negotiator
        .connect_via_rendezvous(&mut registry, other)
        .await
        .with_context(|| format!("could not connect to {other}"))?;
    println!("Connected to {other}. Type to chat, Ctrl-D to leave.");

    // recv is not cancel-safe, so incoming messages get their own task
    let mut incoming = {
        let session = session.clone();
        let other = other.to_string();
        tokio::spawn(async move {
            loop {
                match session.recv().await {
                    Ok(Some(PeerMessage::Chat { from, text, .. })) => println!("[{from}] {text}"),
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        println!("{other} left.");
                        return;
                    }
                    Err(e) => {
                        eprintln!("connection to {other} failed: {e}");
                        return;
                    }
                }
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(text) if text.trim().is_empty() => {}
                Some(text) => session.send_chat(&text).await?,
                None => break,
            },
            _ = &mut incoming => break,
        }
    }

    incoming.abort();
    negotiator.slot().release().await;
    Ok(())
}
