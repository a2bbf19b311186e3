use crate::*;

use serde_json::json;
use tokio::io::AsyncWriteExt;

use ridelink_core::wire::{encode_frame, AddOffer, RequestRide};
use ridelink_core::{Area, Direction, ErrorReason};
use ridelink_peer::error::ClientError;
use ridelink_peer::RideClient;

fn hamra_offer(owner: &str, start: u16, end: u16, capacity: u32) -> AddOffer {
    AddOffer {
        owner_id: owner.to_string(),
        area: Area::Named("Hamra".into()),
        direction: Direction::ToHub,
        start_minute: start,
        end_minute: end,
        capacity,
        vehicle_ref: None,
    }
}

fn hamra_request(rider: &str, at: u16) -> RequestRide {
    RequestRide {
        rider_id: rider.to_string(),
        area: Area::Named("Hamra".into()),
        desired_minute: at,
        direction: Direction::ToHub,
        min_rating: None,
        max_distance_km: None,
    }
}

fn reason(err: &ClientError) -> Option<ErrorReason> {
    match err {
        ClientError::Service(e) => Some(e.reason),
        _ => None,
    }
}

/// 08:20 is within tolerance of an 08:00-08:15 window, 08:40 is not.
#[tokio::test]
async fn request_inside_tolerance_matches() -> Result<()> {
    let node = Node::start().await?;
    let mut client = RideClient::connect(node.ride_addr).await?;

    let offer_id = client.add_offer(hamra_offer("d1", 480, 495, 1)).await?;

    let (_, candidates, message) = client.request_ride(hamra_request("r1", 500)).await?;
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].offer_id, offer_id);
    assert_eq!(message.as_deref(), Some("Found 1 matching rides"));

    let (_, late, _) = client.request_ride(hamra_request("r2", 520)).await?;
    assert!(late.is_empty());
    Ok(())
}

#[tokio::test]
async fn full_ride_lifecycle() -> Result<()> {
    let node = Node::start().await?;
    let mut driver = RideClient::connect(node.ride_addr).await?;
    let mut rider = RideClient::connect(node.ride_addr).await?;

    let offer_id = driver.add_offer(hamra_offer("d1", 480, 495, 2)).await?;
    let (request_id, candidates, _) = rider.request_ride(hamra_request("r1", 490)).await?;
    assert_eq!(candidates[0].owner_id, "d1");
    assert_eq!(driver.pending_requests().await?.len(), 1);

    let contact = driver.accept(request_id, "d1").await?;
    assert_eq!(contact.offer_id, offer_id);
    assert_eq!(contact.username, "d1");
    assert!(driver.pending_requests().await?.is_empty());

    // a second accept of the same request is refused
    let again = driver.accept(request_id, "d1").await.unwrap_err();
    assert_eq!(reason(&again), Some(ErrorReason::AlreadyResolved));

    assert_eq!(driver.cancel_offer(offer_id, "d1").await?, 1);
    assert!(driver.list_offers(Default::default()).await?.is_empty());
    Ok(())
}

/// Two drivers race to accept the same request: exactly one wins.
#[tokio::test]
async fn concurrent_accepts_have_one_winner() -> Result<()> {
    let node = Node::start().await?;
    let mut setup = RideClient::connect(node.ride_addr).await?;
    setup.add_offer(hamra_offer("d1", 480, 495, 1)).await?;
    setup.add_offer(hamra_offer("d2", 480, 495, 1)).await?;
    let (request_id, candidates, _) = setup.request_ride(hamra_request("r1", 485)).await?;
    assert_eq!(candidates.len(), 2);

    let mut a = RideClient::connect(node.ride_addr).await?;
    let mut b = RideClient::connect(node.ride_addr).await?;
    let (ra, rb) = tokio::join!(a.accept(request_id, "d1"), b.accept(request_id, "d2"));

    let outcomes = [ra, rb];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(
        reason(loser),
        Some(ErrorReason::AlreadyResolved) | Some(ErrorReason::CapacityExceeded)
    ));
    Ok(())
}

#[tokio::test]
async fn capacity_is_never_exceeded() -> Result<()> {
    let node = Node::start().await?;
    let mut client = RideClient::connect(node.ride_addr).await?;
    client.add_offer(hamra_offer("d1", 480, 495, 1)).await?;

    let (first, _, _) = client.request_ride(hamra_request("r1", 485)).await?;
    let (second, _, _) = client.request_ride(hamra_request("r2", 485)).await?;

    client.accept(first, "d1").await?;
    let err = client.accept(second, "d1").await.unwrap_err();
    assert_eq!(reason(&err), Some(ErrorReason::CapacityExceeded));
    Ok(())
}

#[tokio::test]
async fn unknown_command_keeps_connection_usable() -> Result<()> {
    let node = Node::start().await?;
    let mut raw = node.raw_rides().await?;

    let err = call(&mut raw, json!({"type": "FLY_ME", "payload": {}})).await?;
    assert_eq!(err["status"], "ERROR");
    assert_eq!(err["reason"], "ValidationError");

    let bad = call(
        &mut raw,
        json!({"type": "ADD_OFFER", "payload": {
            "ownerId": "d1", "area": "Hamra", "direction": "toHub",
            "startMinute": 500, "endMinute": 480, "capacity": 1}}),
    )
    .await?;
    assert_eq!(bad["reason"], "ValidationError");

    let ok = call(&mut raw, json!({"type": "LIST_OFFERS", "payload": {}})).await?;
    assert_eq!(ok["status"], "OK");
    Ok(())
}

/// A frame dribbled out one byte at a time still parses.
#[tokio::test]
async fn byte_at_a_time_frame() -> Result<()> {
    let node = Node::start().await?;
    let mut raw = node.raw_rides().await?;
    raw.set_nodelay(true)?;

    let frame = encode_frame(br#"{"type":"PENDING_REQUESTS"}"#)?;
    for b in frame.iter() {
        raw.write_all(&[*b]).await?;
        raw.flush().await?;
    }
    let reply: serde_json::Value = read_json(&mut raw).await?.context("no reply")?;
    assert_eq!(reply["status"], "OK");
    assert_eq!(reply["requests"], json!([]));
    Ok(())
}

#[tokio::test]
async fn oversize_frame_is_a_protocol_error() -> Result<()> {
    let node = Node::start().await?;
    let mut raw = node.raw_rides().await?;
    raw.write_all(&(2u32 * 1024 * 1024).to_be_bytes()).await?;

    let reply: serde_json::Value = read_json(&mut raw).await?.context("no reply")?;
    assert_eq!(reply["reason"], "ProtocolError");
    assert!(read_json::<_, serde_json::Value>(&mut raw).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn rider_can_withdraw_a_request() -> Result<()> {
    let node = Node::start().await?;
    let mut client = RideClient::connect(node.ride_addr).await?;
    client.add_offer(hamra_offer("d1", 480, 495, 1)).await?;
    let (request_id, _, _) = client.request_ride(hamra_request("r1", 485)).await?;

    let stranger = client.reject(request_id, "r2").await.unwrap_err();
    assert_eq!(reason(&stranger), Some(ErrorReason::Forbidden));

    client.reject(request_id, "r1").await?;
    let late = client.accept(request_id, "d1").await.unwrap_err();
    assert_eq!(reason(&late), Some(ErrorReason::AlreadyResolved));
    assert_eq!(node.state.lifecycle.pending_count(), 0);
    Ok(())
}
