//! ridelink-ctl: command-line client for ridelinkd.

mod cmd;

use anyhow::{Context, Result};

use ridelink_core::config::RideLinkConfig;
use ridelink_core::wire::{AddOffer, ListOffers, RequestRide};

use cmd::args;

fn print_usage() {
    println!("Usage: ridelink-ctl [--ride-addr <addr>] [--rendezvous-addr <addr>] <command>");
    println!();
    println!("Commands:");
    println!("  offer <driver> <area> <toHub|fromHub> <HH:MM> <HH:MM> <seats> [--vehicle <ref>]");
    println!("                            Publish a ride offer");
    println!("  request <rider> <area> <toHub|fromHub> <HH:MM> [--min-rating <r>] [--max-km <km>]");
    println!("                            Ask for a ride and list matching offers");
    println!("  accept <request> <driver> Accept a request on behalf of a driver");
    println!("  reject <request> <rider>  Withdraw a pending request");
    println!("  cancel <offer> <driver>   Cancel an offer");
    println!("  rides [toHub|fromHub]     List current offers");
    println!("  pending                   List pending requests");
    println!("  chat <me> <other>         Chat directly with another user");
    println!();
    println!("Areas are a name (Hamra), coordinates (33.89,35.48) or both (Hamra@33.89,35.48).");
    println!();
    println!("Options:");
    println!("  --ride-addr <addr>        Ride service address (default from config)");
    println!("  --rendezvous-addr <addr>  Rendezvous registry address (default from config)");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = RideLinkConfig::load().context("failed to load config")?;

    let mut argv: Vec<String> = std::env::args().skip(1).collect();
    let ride_addr =
        args::take_flag(&mut argv, "--ride-addr")?.unwrap_or_else(|| config.peer.ride_addr.clone());
    let rendezvous_addr = args::take_flag(&mut argv, "--rendezvous-addr")?
        .unwrap_or_else(|| config.peer.rendezvous_addr.clone());

    let Some(command) = argv.first().cloned() else {
        print_usage();
        return Ok(());
    };
    argv.remove(0);

    match command.as_str() {
        "offer" => {
            let vehicle_ref = args::take_flag(&mut argv, "--vehicle")?;
            let [owner, area, direction, start, end, seats] = positional::<6>(&argv, "offer")?;
            let add = AddOffer {
                owner_id: owner.clone(),
                area: args::area(area)?,
                direction: args::direction(direction)?,
                start_minute: args::minute(start)?,
                end_minute: args::minute(end)?,
                capacity: args::number(seats, "seats")?,
                vehicle_ref,
            };
            cmd::rides::cmd_offer(&ride_addr, add).await
        }
        "request" => {
            let min_rating = args::take_flag(&mut argv, "--min-rating")?
                .map(|v| args::number(&v, "--min-rating"))
                .transpose()?;
            let max_distance_km = args::take_flag(&mut argv, "--max-km")?
                .map(|v| args::number(&v, "--max-km"))
                .transpose()?;
            let [rider, area, direction, at] = positional::<4>(&argv, "request")?;
            let ask = RequestRide {
                rider_id: rider.clone(),
                area: args::area(area)?,
                desired_minute: args::minute(at)?,
                direction: args::direction(direction)?,
                min_rating,
                max_distance_km,
            };
            cmd::rides::cmd_request(&ride_addr, ask).await
        }
        "accept" => {
            let [request, driver] = positional::<2>(&argv, "accept")?;
            cmd::rides::cmd_accept(&ride_addr, args::number(request, "request")?, driver).await
        }
        "reject" => {
            let [request, rider] = positional::<2>(&argv, "reject")?;
            cmd::rides::cmd_reject(&ride_addr, args::number(request, "request")?, rider).await
        }
        "cancel" => {
            let [offer, driver] = positional::<2>(&argv, "cancel")?;
            cmd::rides::cmd_cancel(&ride_addr, args::number(offer, "offer")?, driver).await
        }
        "rides" => {
            let direction = argv.first().map(|d| args::direction(d)).transpose()?;
            let filter = ListOffers {
                direction,
                area: None,
            };
            cmd::rides::cmd_rides(&ride_addr, filter).await
        }
        "pending" => cmd::rides::cmd_pending(&ride_addr).await,
        "chat" => {
            let [me, other] = positional::<2>(&argv, "chat")?;
            cmd::chat::cmd_chat(&rendezvous_addr, &config.peer, me, other).await
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

/// Exactly `N` positional arguments.
fn positional<'a, const N: usize>(argv: &'a [String], command: &str) -> Result<[&'a String; N]> {
    let refs: Vec<&String> = argv.iter().collect();
    refs.try_into().map_err(|got: Vec<&String>| {
        anyhow::anyhow!(
            "{command} takes {N} arguments, got {} (see ridelink-ctl help)",
            got.len()
        )
    })
}
