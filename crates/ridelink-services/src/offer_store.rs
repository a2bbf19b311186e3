//! Ride offer store: the pool of driver-announced trips.
//!
//! One coarse lock over the whole map. Readers clone what they need out of
//! the map so no lock is held while matching runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ridelink_core::wire::{AddOffer, ListOffers};
use ridelink_core::{Area, OfferId, RideError, RideOffer};

#[derive(Clone)]
pub struct OfferStore {
    offers: Arc<RwLock<HashMap<OfferId, RideOffer>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for OfferStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OfferStore {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Store whose first assigned id is `first_id`. Used when a persisted
    /// rider ledger already references lower ids.
    pub fn starting_at(first_id: OfferId) -> Self {
        Self {
            offers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(first_id.max(1))),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<OfferId, RideOffer>> {
        self.offers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<OfferId, RideOffer>> {
        self.offers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate an announcement, assign it an id and store it.
    pub fn insert(&self, add: AddOffer) -> Result<RideOffer, RideError> {
        let mut offer = add.into_offer(0);
        offer.validate()?;
        offer.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write().insert(offer.id, offer.clone());
        Ok(offer)
    }

    /// Store or replace an offer. Only the owner may replace an existing one.
    pub fn put(&self, offer: RideOffer) -> Result<(), RideError> {
        offer.validate()?;
        let mut offers = self.write();
        if let Some(existing) = offers.get(&offer.id) {
            if existing.owner_id != offer.owner_id {
                return Err(RideError::NotOwner);
            }
        }
        self.next_id.fetch_max(offer.id + 1, Ordering::Relaxed);
        offers.insert(offer.id, offer);
        Ok(())
    }

    pub fn get(&self, id: OfferId) -> Option<RideOffer> {
        self.read().get(&id).cloned()
    }

    /// Offers whose area could overlap `area`, sorted by id.
    pub fn list_by_area(&self, area: &Area) -> Vec<RideOffer> {
        let mut out: Vec<RideOffer> = self
            .read()
            .values()
            .filter(|o| o.area.may_overlap(area))
            .cloned()
            .collect();
        out.sort_by_key(|o| o.id);
        out
    }

    /// Offers matching an optional direction / area filter, sorted by id.
    pub fn list(&self, filter: &ListOffers) -> Vec<RideOffer> {
        let mut out: Vec<RideOffer> = self
            .read()
            .values()
            .filter(|o| filter.direction.map_or(true, |d| o.direction == d))
            .filter(|o| filter.area.as_ref().map_or(true, |a| o.area.may_overlap(a)))
            .cloned()
            .collect();
        out.sort_by_key(|o| o.id);
        out
    }

    /// Remove an offer on behalf of `owner_id`.
    pub fn remove(&self, id: OfferId, owner_id: &str) -> Result<RideOffer, RideError> {
        let mut offers = self.write();
        match offers.get(&id) {
            None => Err(RideError::NotFound("offer")),
            Some(o) if o.owner_id != owner_id => Err(RideError::NotOwner),
            Some(_) => offers.remove(&id).ok_or(RideError::NotFound("offer")),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
