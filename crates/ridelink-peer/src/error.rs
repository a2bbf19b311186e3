use ridelink_core::wire::{ServiceError, WireError};

/// Failure talking to the ride service.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(std::io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("server closed the connection")]
    Closed,
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("reply is missing `{0}`")]
    MissingField(&'static str),
}

/// Failure setting up or using a direct peer session.
#[derive(Debug, thiserror::Error)]
pub enum NegotiateError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("peer {0} unreachable")]
    PeerUnreachable(String),
    #[error("already in a session with {0}")]
    SessionActive(String),
    #[error("registry refused registration: {0}")]
    Rejected(String),
    #[error("registry connection closed")]
    RegistryClosed,
    #[error("peer sent an unexpected message")]
    UnexpectedMessage,
}
