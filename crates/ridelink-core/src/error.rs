//! Business error taxonomy.
//!
//! Every variant maps to a stable `reason` string carried in error
//! responses. Only `Protocol` ever closes a connection; the rest are
//! answered in-band.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RideError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("caller does not own this offer")]
    NotOwner,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("no seats left on this ride")]
    CapacityExceeded,
    #[error("request already resolved")]
    AlreadyResolved,
    #[error("peer unreachable")]
    PeerUnreachable,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Wire form of an error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorReason {
    ValidationError,
    NotFound,
    NotOwner,
    Forbidden,
    CapacityExceeded,
    AlreadyResolved,
    PeerUnreachable,
    ProtocolError,
    StorageError,
}

impl RideError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            RideError::Validation(_) => ErrorReason::ValidationError,
            RideError::NotFound(_) => ErrorReason::NotFound,
            RideError::NotOwner => ErrorReason::NotOwner,
            RideError::Forbidden(_) => ErrorReason::Forbidden,
            RideError::CapacityExceeded => ErrorReason::CapacityExceeded,
            RideError::AlreadyResolved => ErrorReason::AlreadyResolved,
            RideError::PeerUnreachable => ErrorReason::PeerUnreachable,
            RideError::Protocol(_) => ErrorReason::ProtocolError,
            RideError::Storage(_) => ErrorReason::StorageError,
        }
    }

    /// Whether the connection that produced this error must be closed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RideError::Protocol(_))
    }
}
