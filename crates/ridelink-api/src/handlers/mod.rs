//! Per-connection handlers and the state they share.

pub mod rendezvous;
pub mod rides;

use std::sync::Arc;

use anyhow::Context;

use ridelink_core::config::RideLinkConfig;
use ridelink_services::{
    CachedDirectory, InMemoryDirectory, InMemoryLedger, MatchEngine, MatchSettings, OfferStore,
    RequestLifecycle, RiderLedger, SqliteLedger, UserDirectory,
};

#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: RequestLifecycle,
    /// Bounded, caching view of the user directory.
    pub directory: Arc<CachedDirectory>,
}

impl ApiState {
    /// Wire up the ride services described by `config`.
    pub fn from_config(config: &RideLinkConfig) -> anyhow::Result<Self> {
        let ledger: Arc<dyn RiderLedger> = if config.storage.ledger_path.as_os_str().is_empty() {
            tracing::info!("rider ledger kept in memory");
            Arc::new(InMemoryLedger::new())
        } else {
            let path = &config.storage.ledger_path;
            tracing::info!(path = %path.display(), "rider ledger on disk");
            Arc::new(
                SqliteLedger::open(path)
                    .with_context(|| format!("failed to open ledger {}", path.display()))?,
            )
        };

        let users = if config.directory.users_path.as_os_str().is_empty() {
            InMemoryDirectory::new(config.directory.open_registration)
        } else {
            let path = &config.directory.users_path;
            let users = InMemoryDirectory::from_file(path, config.directory.open_registration)
                .with_context(|| format!("failed to load users from {}", path.display()))?;
            tracing::info!(path = %path.display(), users = users.len(), "user directory loaded");
            users
        };
        let directory = Arc::new(CachedDirectory::new(
            Arc::new(users),
            config.matching.rating_cache_ttl(),
            config.matching.rating_timeout(),
        ));

        let first_id = ledger
            .max_offer_id()
            .context("failed to read ledger")?
            .map_or(1, |max| max + 1);
        let offers = OfferStore::starting_at(first_id);

        let shared: Arc<dyn UserDirectory> = directory.clone();
        let engine = MatchEngine::new(
            offers.clone(),
            shared.clone(),
            MatchSettings::from(&config.matching),
        );
        let lifecycle =
            RequestLifecycle::new(offers, engine, ledger, shared, config.requests.ttl());

        Ok(Self {
            lifecycle,
            directory,
        })
    }
}
