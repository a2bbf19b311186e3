//! ridelink-core: shared data model, wire format, errors and configuration.
//! All other ridelink crates depend on this one.

pub mod config;
pub mod error;
pub mod geo;
pub mod model;
pub mod wire;

pub use error::{ErrorReason, RideError};
pub use model::{
    Area, Candidate, Direction, DriverContact, GeoPoint, OfferId, RequestId, RideOffer, RideRequest,
};
