//! Background housekeeping: request expiry and periodic stats.

use std::time::Duration;

use ridelink_api::ApiState;
use ridelink_services::RendezvousRegistry;

/// Resolved requests are kept this many TTLs so late accepts still get
/// `AlreadyResolved` instead of `NotFound`.
const RESOLVED_RETENTION_TTLS: u32 = 6;

pub async fn expiry_loop(state: ApiState, check_every: Duration, ttl: Duration) {
    let mut interval = tokio::time::interval(check_every.max(Duration::from_millis(100)));
    let retain = ttl * RESOLVED_RETENTION_TTLS;

    loop {
        interval.tick().await;

        let expired = state.lifecycle.expire_stale();
        if expired > 0 {
            tracing::debug!(expired, "expired pending requests");
        }
        let pruned = state.lifecycle.prune_resolved(retain);
        if pruned > 0 {
            tracing::debug!(pruned, "pruned resolved requests");
        }
        state.directory.purge_expired();
    }
}

pub async fn stats_loop(state: ApiState, registry: RendezvousRegistry, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        interval.tick().await;
        tracing::info!(
            offers = state.lifecycle.offers().len(),
            pending = state.lifecycle.pending_count(),
            peers = registry.peer_count(),
            waiting = registry.waiting_count(),
            "stats"
        );
    }
}
