//! Match engine: filters and ranks offers for a request.
//!
//! Filtering is split in two: [`eligible`] is a pure per-offer check
//! (direction, area, time window, distance); the rating filter needs the
//! user directory and runs afterwards over the survivors only.

use std::cmp::Ordering;
use std::sync::Arc;

use futures::future::join_all;
use ridelink_core::config::MatchingConfig;
use ridelink_core::geo::{eta_text, haversine_km};
use ridelink_core::{Candidate, RideOffer, RideRequest};

use crate::directory::{rating_of, UserDirectory};
use crate::offer_store::OfferStore;

/// Tunables for matching.
#[derive(Debug, Clone, Copy)]
pub struct MatchSettings {
    /// Minutes an offer window is widened on each side.
    pub tolerance: u16,
    /// Cut-off used when the request does not name one.
    pub default_max_distance_km: Option<f64>,
    pub average_speed_kmh: f64,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self::from(&MatchingConfig::default())
    }
}

impl From<&MatchingConfig> for MatchSettings {
    fn from(c: &MatchingConfig) -> Self {
        Self {
            tolerance: c.time_tolerance_minutes,
            default_max_distance_km: c.default_max_distance(),
            average_speed_kmh: c.average_speed_kmh,
        }
    }
}

/// Per-offer check. Returns the candidate for `offer` if it is compatible
/// with `request`, ignoring the rating filter.
pub fn eligible(offer: &RideOffer, request: &RideRequest, settings: &MatchSettings) -> Option<Candidate> {
    if offer.direction != request.direction {
        return None;
    }
    if !offer.covers(request.desired_minute, settings.tolerance) {
        return None;
    }

    let distance_km = match (offer.area.point(), request.area.point()) {
        (Some(a), Some(b)) => {
            let d = haversine_km(a, b);
            let limit = request.max_distance_km.or(settings.default_max_distance_km);
            if limit.is_some_and(|max| d > max) {
                return None;
            }
            Some(d)
        }
        _ => {
            if !offer.area.same_name(&request.area) {
                return None;
            }
            None
        }
    };

    Some(Candidate {
        offer_id: offer.id,
        owner_id: offer.owner_id.clone(),
        start_minute: offer.start_minute,
        end_minute: offer.end_minute,
        distance_km,
        eta_text: distance_km.and_then(|d| eta_text(d, settings.average_speed_kmh)),
    })
}

/// Ranking order: candidates with a distance first, nearest first; then the
/// rest by start time. Ties go to the lower offer id.
pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        let by_distance = match (a.distance_km, b.distance_km) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.start_minute.cmp(&b.start_minute),
        };
        by_distance.then(a.offer_id.cmp(&b.offer_id))
    });
}

#[derive(Clone)]
pub struct MatchEngine {
    offers: OfferStore,
    directory: Arc<dyn UserDirectory>,
    settings: MatchSettings,
}

impl MatchEngine {
    pub fn new(offers: OfferStore, directory: Arc<dyn UserDirectory>, settings: MatchSettings) -> Self {
        Self {
            offers,
            directory,
            settings,
        }
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    /// Ranked candidates for `request` against the current offer pool.
    pub async fn find(&self, request: &RideRequest) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .offers
            .list_by_area(&request.area)
            .iter()
            .filter_map(|offer| eligible(offer, request, &self.settings))
            .collect();

        if let Some(min) = request.min_rating {
            let ratings = join_all(
                candidates
                    .iter()
                    .map(|c| rating_of(self.directory.as_ref(), &c.owner_id)),
            )
            .await;
            candidates = candidates
                .into_iter()
                .zip(ratings)
                .filter(|(_, rating)| rating.map_or(true, |r| r >= min))
                .map(|(c, _)| c)
                .collect();
        }

        rank(&mut candidates);
        tracing::debug!(
            request_id = request.id,
            candidates = candidates.len(),
            "matched request"
        );
        candidates
    }
}
