//! Request lifecycle: Pending → Accepted | Rejected | Expired.
//!
//! All request records sit behind one mutex. `accept` holds it across the
//! capacity check and the ledger write, so two accepts can never both see a
//! free seat. Directory lookups happen outside the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use ridelink_core::wire::{AddOffer, RequestRide};
use ridelink_core::{Candidate, DriverContact, OfferId, RequestId, RideError, RideOffer, RideRequest};

use crate::directory::UserDirectory;
use crate::ledger::RiderLedger;
use crate::matcher::MatchEngine;
use crate::offer_store::OfferStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

#[derive(Debug, Clone)]
struct RequestRecord {
    request: RideRequest,
    state: RequestState,
    candidates: Vec<Candidate>,
    created_at: Instant,
}

/// Result of a successful `submit`.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub request_id: RequestId,
    pub candidates: Vec<Candidate>,
}

/// Result of a successful cancellation.
#[derive(Debug, Clone)]
pub struct Cancelled {
    pub offer: RideOffer,
    pub notified_riders: usize,
}

#[derive(Clone)]
pub struct RequestLifecycle {
    requests: Arc<Mutex<HashMap<RequestId, RequestRecord>>>,
    next_id: Arc<AtomicU64>,
    offers: OfferStore,
    engine: MatchEngine,
    ledger: Arc<dyn RiderLedger>,
    directory: Arc<dyn UserDirectory>,
    ttl: Duration,
}

impl RequestLifecycle {
    pub fn new(
        offers: OfferStore,
        engine: MatchEngine,
        ledger: Arc<dyn RiderLedger>,
        directory: Arc<dyn UserDirectory>,
        ttl: Duration,
    ) -> Self {
        Self {
            requests: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            offers,
            engine,
            ledger,
            directory,
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, RequestRecord>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn offers(&self) -> &OfferStore {
        &self.offers
    }

    // ── Offers ────────────────────────────────────────────────────────────────

    /// Publish a driver's offer. Users the directory knows as non-drivers are
    /// refused; if the directory cannot answer the offer is let through.
    pub async fn add_offer(&self, add: AddOffer) -> Result<RideOffer, RideError> {
        match self.directory.profile(&add.owner_id).await {
            Ok(Some(profile)) if !profile.is_driver => {
                return Err(RideError::Forbidden(format!(
                    "{} is not registered as a driver",
                    add.owner_id
                )));
            }
            Ok(None) => {
                return Err(RideError::Forbidden(format!("unknown user {}", add.owner_id)));
            }
            Ok(Some(_)) => {}
            Err(e) => {
                tracing::warn!(owner = %add.owner_id, error = %e, "driver check skipped");
            }
        }
        let offer = self.offers.insert(add)?;
        tracing::info!(
            offer_id = offer.id,
            owner = %offer.owner_id,
            direction = ?offer.direction,
            window = %format!("{}-{}", offer.start_minute, offer.end_minute),
            capacity = offer.capacity,
            "offer added"
        );
        Ok(offer)
    }

    /// Remove an offer and drop every booking on it.
    ///
    /// Runs under the request lock so an accept in flight either books its
    /// rider before the offer goes (and is counted here) or finds it gone.
    pub fn cancel_offer(&self, offer_id: OfferId, owner_id: &str) -> Result<Cancelled, RideError> {
        let _requests = self.lock();
        let offer = self.offers.remove(offer_id, owner_id)?;
        let riders = self.ledger.riders(offer_id)?;
        self.ledger.drop_offer(offer_id)?;
        for rider in &riders {
            tracing::info!(offer_id, rider = %rider, "booked rider released by cancellation");
        }
        tracing::info!(offer_id, owner = owner_id, riders = riders.len(), "offer cancelled");
        Ok(Cancelled {
            offer,
            notified_riders: riders.len(),
        })
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    /// Create a pending request and return its ranked candidates.
    pub async fn submit(&self, ask: RequestRide) -> Result<Submitted, RideError> {
        ask.clone().into_request(0).validate()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = ask.into_request(id);

        let candidates = self.engine.find(&request).await;
        tracing::info!(
            request_id = id,
            rider = %request.rider_id,
            candidates = candidates.len(),
            "request submitted"
        );
        self.lock().insert(
            id,
            RequestRecord {
                request,
                state: RequestState::Pending,
                candidates: candidates.clone(),
                created_at: Instant::now(),
            },
        );
        Ok(Submitted {
            request_id: id,
            candidates,
        })
    }

    /// Let `driver_id` take `request_id`.
    ///
    /// The driver must own one of the request's candidates. Their candidate
    /// offers are tried in rank order; the first with a free seat gets the
    /// booking. If every one is full the request stays pending.
    pub async fn accept(
        &self,
        request_id: RequestId,
        driver_id: &str,
    ) -> Result<DriverContact, RideError> {
        let (offer, rider_id) = self.commit_accept(request_id, driver_id, Instant::now())?;
        tracing::info!(
            request_id,
            offer_id = offer.id,
            driver = driver_id,
            rider = %rider_id,
            "request accepted"
        );

        let profile = match self.directory.profile(driver_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(driver = driver_id, error = %e, "contact lookup failed");
                None
            }
        };
        Ok(DriverContact {
            driver_id: driver_id.to_string(),
            username: profile
                .as_ref()
                .map(|p| p.username.clone())
                .unwrap_or_else(|| driver_id.to_string()),
            offer_id: offer.id,
            phone: profile.and_then(|p| p.phone),
            vehicle_ref: offer.vehicle_ref,
        })
    }

    fn commit_accept(
        &self,
        request_id: RequestId,
        driver_id: &str,
        now: Instant,
    ) -> Result<(RideOffer, String), RideError> {
        let mut requests = self.lock();
        let record = requests
            .get_mut(&request_id)
            .ok_or(RideError::NotFound("request"))?;

        if record.state == RequestState::Pending && now.duration_since(record.created_at) >= self.ttl {
            record.state = RequestState::Expired;
        }
        if record.state != RequestState::Pending {
            return Err(RideError::AlreadyResolved);
        }

        let offer_ids: Vec<OfferId> = record
            .candidates
            .iter()
            .filter(|c| c.owner_id == driver_id)
            .map(|c| c.offer_id)
            .collect();
        if offer_ids.is_empty() {
            return Err(RideError::Forbidden(format!(
                "{driver_id} is not a candidate for request {request_id}"
            )));
        }

        let mut last_err = RideError::NotFound("offer");
        for offer_id in offer_ids {
            let Some(offer) = self.offers.get(offer_id) else {
                continue;
            };
            let booked = self.ledger.rider_count(offer_id)?;
            if booked >= offer.capacity as usize {
                last_err = RideError::CapacityExceeded;
                continue;
            }
            self.ledger.record(offer_id, &record.request.rider_id)?;
            record.state = RequestState::Accepted;
            return Ok((offer, record.request.rider_id.clone()));
        }
        Err(last_err)
    }

    /// Withdraw a pending request. Only the rider who made it may do so.
    pub fn reject(&self, request_id: RequestId, rider_id: &str) -> Result<(), RideError> {
        let mut requests = self.lock();
        let record = requests
            .get_mut(&request_id)
            .ok_or(RideError::NotFound("request"))?;
        if record.request.rider_id != rider_id {
            return Err(RideError::Forbidden(
                "only the requesting rider may reject".into(),
            ));
        }
        if record.state != RequestState::Pending {
            return Err(RideError::AlreadyResolved);
        }
        record.state = RequestState::Rejected;
        tracing::info!(request_id, rider = rider_id, "request rejected");
        Ok(())
    }

    /// Expire every pending request older than the TTL. Returns how many.
    pub fn expire_stale(&self) -> usize {
        self.expire_stale_at(Instant::now())
    }

    pub fn expire_stale_at(&self, now: Instant) -> usize {
        let mut expired = 0;
        for (id, record) in self.lock().iter_mut() {
            if record.state == RequestState::Pending
                && now.duration_since(record.created_at) >= self.ttl
            {
                record.state = RequestState::Expired;
                expired += 1;
                tracing::info!(request_id = *id, "request expired");
            }
        }
        expired
    }

    /// Drop terminal records older than `retain`.
    pub fn prune_resolved(&self, retain: Duration) -> usize {
        let mut requests = self.lock();
        let before = requests.len();
        requests.retain(|_, r| {
            r.state == RequestState::Pending || r.created_at.elapsed() < retain
        });
        before - requests.len()
    }

    pub fn state(&self, request_id: RequestId) -> Option<RequestState> {
        self.lock().get(&request_id).map(|r| r.state)
    }

    /// Pending requests, oldest first.
    pub fn pending(&self) -> Vec<RideRequest> {
        let mut out: Vec<RideRequest> = self
            .lock()
            .values()
            .filter(|r| r.state == RequestState::Pending)
            .map(|r| r.request.clone())
            .collect();
        out.sort_by_key(|r| r.id);
        out
    }

    pub fn pending_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|r| r.state == RequestState::Pending)
            .count()
    }
}
