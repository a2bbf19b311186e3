//! ridelink-peer: client side of ridelink.
//!
//! [`RideClient`] talks to the ride service. [`RendezvousClient`] keeps the
//! long-lived registry connection, and [`Negotiator`] turns the registry's
//! introductions into a single direct [`PeerSession`].

pub mod error;
pub mod negotiator;
pub mod rendezvous_client;
pub mod ride_client;
pub mod session;

pub use error::{ClientError, NegotiateError};
pub use negotiator::{initiator_role, Negotiator, NegotiatorSettings, Role};
pub use rendezvous_client::{PeerInfo, RendezvousClient};
pub use ride_client::RideClient;
pub use session::{PeerSession, SessionSlot};
