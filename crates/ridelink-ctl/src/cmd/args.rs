//! Parsing of positional values shared by several commands.

use anyhow::{bail, Context, Result};

use ridelink_core::model::parse_minute;
use ridelink_core::{Area, Direction};

pub fn direction(text: &str) -> Result<Direction> {
    match text {
        "toHub" | "to-hub" | "to" => Ok(Direction::ToHub),
        "fromHub" | "from-hub" | "from" => Ok(Direction::FromHub),
        other => bail!("direction must be toHub or fromHub, got '{other}'"),
    }
}

pub fn minute(text: &str) -> Result<u16> {
    parse_minute(text).with_context(|| format!("'{text}' is not a time of day (HH:MM)"))
}

/// `Hamra`, `33.89,35.48` or `Hamra@33.89,35.48`.
pub fn area(text: &str) -> Result<Area> {
    let (name, coords) = match text.split_once('@') {
        Some((name, coords)) => (Some(name), Some(coords)),
        None if looks_like_coords(text) => (None, Some(text)),
        None => (Some(text), None),
    };

    let Some(coords) = coords else {
        return Ok(Area::Named(text.to_string()));
    };
    let (lat, lng) = coords
        .split_once(',')
        .with_context(|| format!("'{coords}' is not lat,lng"))?;
    let lat: f64 = lat.trim().parse().context("latitude must be a number")?;
    let lng: f64 = lng.trim().parse().context("longitude must be a number")?;

    Ok(Area::Located {
        name: name.map(str::to_string),
        lat,
        lng,
    })
}

fn looks_like_coords(text: &str) -> bool {
    text.split_once(',')
        .is_some_and(|(a, b)| a.trim().parse::<f64>().is_ok() && b.trim().parse::<f64>().is_ok())
}

pub fn number<T: std::str::FromStr>(text: &str, what: &str) -> Result<T> {
    text.parse()
        .ok()
        .with_context(|| format!("{what} must be a number, got '{text}'"))
}

/// Remove `--flag <value>` from `args` and return the value.
pub fn take_flag(args: &mut Vec<String>, flag: &str) -> Result<Option<String>> {
    let Some(i) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    if i + 1 >= args.len() {
        bail!("{flag} requires a value");
    }
    let value = args.remove(i + 1);
    args.remove(i);
    Ok(Some(value))
}
