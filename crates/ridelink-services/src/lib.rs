//! ridelink-services: ride matching, request lifecycle and rendezvous state.
//!
//! Everything here is transport-agnostic; `ridelink-api` puts it on the
//! network.

pub mod directory;
pub mod ledger;
pub mod lifecycle;
pub mod matcher;
pub mod offer_store;
pub mod rendezvous;

pub use directory::{CachedDirectory, DirectoryError, InMemoryDirectory, UserDirectory, UserProfile};
pub use ledger::{InMemoryLedger, LedgerError, RiderLedger, SqliteLedger};
pub use lifecycle::{Cancelled, RequestLifecycle, RequestState, Submitted};
pub use matcher::{MatchEngine, MatchSettings};
pub use offer_store::OfferStore;
pub use rendezvous::{ConnId, EventSender, RendezvousRegistry};
