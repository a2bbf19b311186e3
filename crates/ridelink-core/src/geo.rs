//! Great-circle distance and travel-time estimates.

use crate::model::GeoPoint;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points, in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Human-readable travel time at a constant speed, e.g. `"7 min"`.
pub fn eta_text(distance_km: f64, speed_kmh: f64) -> Option<String> {
    if speed_kmh.is_nan() || speed_kmh <= 0.0 || !distance_km.is_finite() {
        return None;
    }
    let minutes = (distance_km / speed_kmh * 60.0).ceil().max(1.0) as u64;
    if minutes < 60 {
        Some(format!("{minutes} min"))
    } else {
        Some(format!("{} h {} min", minutes / 60, minutes % 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint { lat: 33.9, lng: 35.5 };
        assert!(haversine_km(p, p).abs() < 1e-9);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let a = GeoPoint { lat: 0.0, lng: 0.0 };
        let b = GeoPoint { lat: 1.0, lng: 0.0 };
        let d = haversine_km(a, b);
        assert!((d - 111.19).abs() < 0.1, "got {d}");
    }

    #[test]
    fn distance_is_symmetric() {
        let a = GeoPoint { lat: 33.8938, lng: 35.5018 };
        let b = GeoPoint { lat: 33.8886, lng: 35.4955 };
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-12);
    }

    #[test]
    fn eta_rounds_up_to_whole_minutes() {
        assert_eq!(eta_text(1.0, 30.0).as_deref(), Some("2 min"));
        assert_eq!(eta_text(0.0, 30.0).as_deref(), Some("1 min"));
        assert_eq!(eta_text(45.0, 30.0).as_deref(), Some("1 h 30 min"));
        assert_eq!(eta_text(1.0, 0.0), None);
    }
}
