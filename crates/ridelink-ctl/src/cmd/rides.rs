//! Ride service commands: offers, requests and their resolution.

use anyhow::{Context, Result};

use ridelink_core::model::format_minute;
use ridelink_core::wire::{AddOffer, ListOffers, RequestRide};
use ridelink_core::{Area, Direction, OfferId, RequestId};
use ridelink_peer::RideClient;

async fn connect(addr: &str) -> Result<RideClient> {
    RideClient::connect(addr)
        .await
        .with_context(|| format!("failed to connect to ridelinkd at {addr}, is it running?"))
}

fn area_label(area: &Area) -> String {
    match (area.name(), area.point()) {
        (Some(name), Some(p)) => format!("{name} ({:.4}, {:.4})", p.lat, p.lng),
        (Some(name), None) => name.to_string(),
        (None, Some(p)) => format!("({:.4}, {:.4})", p.lat, p.lng),
        (None, None) => "?".to_string(),
    }
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::ToHub => "to hub",
        Direction::FromHub => "from hub",
    }
}

pub async fn cmd_offer(addr: &str, add: AddOffer) -> Result<()> {
    let window = format!(
        "{}-{}",
        format_minute(add.start_minute),
        format_minute(add.end_minute)
    );
    let mut client = connect(addr).await?;
    let id = client.add_offer(add).await?;
    println!("Offer {id} published ({window}).");
    Ok(())
}

pub async fn cmd_request(addr: &str, ask: RequestRide) -> Result<()> {
    let mut client = connect(addr).await?;
    let (id, candidates, message) = client.request_ride(ask).await?;

    println!("═══════════════════════════════════════");
    println!("  Request {id}");
    println!("═══════════════════════════════════════");
    if let Some(message) = message {
        println!("  {message}");
    }
    for c in &candidates {
        println!("  ┌─ offer {}", c.offer_id);
        println!("  │  driver : {}", c.owner_id);
        println!(
            "  │  window : {}-{}",
            format_minute(c.start_minute),
            format_minute(c.end_minute)
        );
        if let Some(km) = c.distance_km {
            println!("  │  dist   : {km:.2} km");
        }
        println!("  └─ eta    : {}", c.eta_text.as_deref().unwrap_or("-"));
    }
    if !candidates.is_empty() {
        println!("\n  Accept with: ridelink-ctl accept {id} <driver>");
    }
    Ok(())
}

pub async fn cmd_accept(addr: &str, request_id: RequestId, driver_id: &str) -> Result<()> {
    let mut client = connect(addr).await?;
    let contact = client.accept(request_id, driver_id).await?;

    println!("Request {request_id} accepted.");
    println!("  driver   : {}", contact.driver_id);
    println!("  username : {}", contact.username);
    println!("  offer    : {}", contact.offer_id);
    if let Some(phone) = &contact.phone {
        println!("  phone    : {phone}");
    }
    if let Some(vehicle) = &contact.vehicle_ref {
        println!("  vehicle  : {vehicle}");
    }
    Ok(())
}

pub async fn cmd_cancel(addr: &str, offer_id: OfferId, owner_id: &str) -> Result<()> {
    let mut client = connect(addr).await?;
    let released = client.cancel_offer(offer_id, owner_id).await?;
    println!("Offer {offer_id} cancelled, {released} booked rider(s) released.");
    Ok(())
}

pub async fn cmd_reject(addr: &str, request_id: RequestId, rider_id: &str) -> Result<()> {
    let mut client = connect(addr).await?;
    client.reject(request_id, rider_id).await?;
    println!("Request {request_id} rejected.");
    Ok(())
}

pub async fn cmd_rides(addr: &str, filter: ListOffers) -> Result<()> {
    let mut client = connect(addr).await?;
    let offers = client.list_offers(filter).await?;

    if offers.is_empty() {
        println!("No offers.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Offers ({})", offers.len());
    println!("═══════════════════════════════════════");
    for o in &offers {
        println!("  ┌─ {} by {}", o.id, o.owner_id);
        println!("  │  area     : {}", area_label(&o.area));
        println!("  │  trip     : {}", direction_label(o.direction));
        println!(
            "  │  window   : {}-{}",
            format_minute(o.start_minute),
            format_minute(o.end_minute)
        );
        println!("  └─ seats    : {}", o.capacity);
    }
    Ok(())
}

pub async fn cmd_pending(addr: &str) -> Result<()> {
    let mut client = connect(addr).await?;
    let requests = client.pending_requests().await?;

    if requests.is_empty() {
        println!("No pending requests.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Pending Requests ({})", requests.len());
    println!("═══════════════════════════════════════");
    for r in &requests {
        println!("  ┌─ {} by {}", r.id, r.rider_id);
        println!("  │  area : {}", area_label(&r.area));
        println!("  │  trip : {}", direction_label(r.direction));
        println!("  └─ at   : {}", format_minute(r.desired_minute));
    }
    Ok(())
}
