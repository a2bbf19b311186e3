//! Ride data model shared by the services, the wire protocol and clients.
//!
//! Times are wall-clock minutes of the day (`0..=1439`). Windows do not wrap
//! past midnight.

use serde::{Deserialize, Serialize};

use crate::error::RideError;

pub type OfferId = u64;
pub type RequestId = u64;

/// Last valid minute of the day (23:59).
pub const LAST_MINUTE: u16 = 1439;

/// Which way the trip goes relative to the campus hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    ToHub,
    FromHub,
}

/// A coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Pickup / drop-off area: a free-text neighbourhood name, a coordinate
/// pair, or both.
///
/// On the wire either `"Hamra"` or `{"name": "Hamra", "lat": .., "lng": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Area {
    Named(String),
    Located {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        lat: f64,
        lng: f64,
    },
}

impl Area {
    pub fn name(&self) -> Option<&str> {
        match self {
            Area::Named(name) => Some(name.as_str()),
            Area::Located { name, .. } => name.as_deref(),
        }
    }

    pub fn point(&self) -> Option<GeoPoint> {
        match self {
            Area::Named(_) => None,
            Area::Located { lat, lng, .. } => Some(GeoPoint { lat: *lat, lng: *lng }),
        }
    }

    /// Case-insensitive, whitespace-trimmed name comparison.
    pub fn same_name(&self, other: &Area) -> bool {
        match (self.name(), other.name()) {
            (Some(a), Some(b)) => {
                let (a, b) = (a.trim(), b.trim());
                !a.is_empty() && a.eq_ignore_ascii_case(b)
            }
            _ => false,
        }
    }

    /// Could the two areas describe the same place? Coordinates on both
    /// sides leave the decision to a distance check.
    pub fn may_overlap(&self, other: &Area) -> bool {
        (self.point().is_some() && other.point().is_some()) || self.same_name(other)
    }

    fn is_blank(&self) -> bool {
        match self {
            Area::Named(name) => name.trim().is_empty(),
            Area::Located { lat, lng, .. } => !lat.is_finite() || !lng.is_finite(),
        }
    }
}

/// A driver-announced recurring trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideOffer {
    pub id: OfferId,
    pub owner_id: String,
    pub area: Area,
    pub direction: Direction,
    pub start_minute: u16,
    pub end_minute: u16,
    pub capacity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_ref: Option<String>,
}

impl RideOffer {
    /// Check the structural invariants of an offer.
    pub fn validate(&self) -> Result<(), RideError> {
        if self.owner_id.trim().is_empty() {
            return Err(RideError::Validation("ownerId must not be empty".into()));
        }
        if self.area.is_blank() {
            return Err(RideError::Validation("area must not be empty".into()));
        }
        if self.start_minute > LAST_MINUTE || self.end_minute > LAST_MINUTE {
            return Err(RideError::Validation(format!(
                "startMinute/endMinute must be within 0..={LAST_MINUTE}"
            )));
        }
        if self.start_minute > self.end_minute {
            return Err(RideError::Validation(
                "startMinute must not be after endMinute".into(),
            ));
        }
        if self.capacity == 0 {
            return Err(RideError::Validation("capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Does `minute` fall inside the window widened by `tolerance` on both sides?
    pub fn covers(&self, minute: u16, tolerance: u16) -> bool {
        let lo = i32::from(self.start_minute) - i32::from(tolerance);
        let hi = i32::from(self.end_minute) + i32::from(tolerance);
        (lo..=hi).contains(&i32::from(minute))
    }
}

/// A passenger's ask for a trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequest {
    pub id: RequestId,
    pub rider_id: String,
    pub area: Area,
    pub desired_minute: u16,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance_km: Option<f64>,
}

impl RideRequest {
    pub fn validate(&self) -> Result<(), RideError> {
        if self.rider_id.trim().is_empty() {
            return Err(RideError::Validation("riderId must not be empty".into()));
        }
        if self.area.is_blank() {
            return Err(RideError::Validation("area must not be empty".into()));
        }
        if self.desired_minute > LAST_MINUTE {
            return Err(RideError::Validation(format!(
                "desiredMinute must be within 0..={LAST_MINUTE}"
            )));
        }
        if let Some(r) = self.min_rating {
            if !r.is_finite() || r < 0.0 {
                return Err(RideError::Validation(
                    "minRating must be a non-negative number".into(),
                ));
            }
        }
        if let Some(d) = self.max_distance_km {
            if !d.is_finite() || d < 0.0 {
                return Err(RideError::Validation(
                    "maxDistanceKm must be a non-negative number".into(),
                ));
            }
        }
        Ok(())
    }
}

/// An offer judged compatible with a request. Recomputed per match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub offer_id: OfferId,
    pub owner_id: String,
    pub start_minute: u16,
    pub end_minute: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_text: Option<String>,
}

/// What a rider learns about the driver once a request is accepted.
///
/// `username` is the name the driver registers under with the rendezvous
/// service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverContact {
    pub driver_id: String,
    pub username: String,
    pub offer_id: OfferId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_ref: Option<String>,
}

/// Format minutes-of-day as `HH:MM`.
pub fn format_minute(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Parse `HH:MM` into minutes-of-day.
pub fn parse_minute(text: &str) -> Option<u16> {
    let (h, m) = text.trim().split_once(':')?;
    let h: u16 = h.parse().ok()?;
    let m: u16 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}
