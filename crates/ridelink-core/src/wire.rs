//! ridelink wire format: framing and message types for both services.
//!
//! Every message on every ridelink socket (ride service, rendezvous service
//! and the direct peer channel) is one frame:
//!
//! ```text
//! +----------------------+---------------------------+
//! | length: u32, BE      | `length` bytes UTF-8 JSON |
//! +----------------------+---------------------------+
//! ```
//!
//! Readers never assume a single `read` returns a whole frame. A stream that
//! ends between frames is a clean close; one that ends inside a frame, or a
//! header announcing more than [`MAX_FRAME_LEN`], is a protocol violation.

use std::net::IpAddr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ErrorReason, RideError};
use crate::model::{
    Area, Candidate, Direction, DriverContact, OfferId, RequestId, RideOffer, RideRequest,
};

// ── Framing ───────────────────────────────────────────────────────────────────

/// Size of the big-endian length header.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest accepted frame body. Anything bigger is treated as garbage.
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream ended inside a frame")]
    Truncated,
    #[error("frame of {0} bytes exceeds the 1 MiB limit")]
    TooLarge(u64),
    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),
    #[error("malformed message: {0}")]
    Decode(serde_json::Error),
}

impl From<WireError> for RideError {
    fn from(e: WireError) -> Self {
        RideError::Protocol(e.to_string())
    }
}

/// Prefix `body` with its length.
pub fn encode_frame(body: &[u8]) -> Result<Bytes, WireError> {
    if body.len() as u64 > u64::from(MAX_FRAME_LEN) {
        return Err(WireError::TooLarge(body.len() as u64));
    }
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Read one frame body. `Ok(None)` means the peer closed between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(WireError::Truncated)
            };
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(WireError::TooLarge(u64::from(len)));
    }

    let mut body = BytesMut::zeroed(len as usize);
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            WireError::Truncated
        } else {
            WireError::Io(e)
        }
    })?;
    Ok(Some(body.freeze()))
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(body)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Serialize `msg` as JSON and write it as one frame.
pub async fn write_json<W, T>(writer: &mut W, msg: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(msg).map_err(WireError::Encode)?;
    write_frame(writer, &body).await
}

/// Read one frame and decode it as JSON. `Ok(None)` on clean close.
pub async fn read_json<R, T>(reader: &mut R) -> Result<Option<T>, WireError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader).await? {
        Some(body) => serde_json::from_slice(&body)
            .map(Some)
            .map_err(WireError::Decode),
        None => Ok(None),
    }
}

// ── Ride service: commands ────────────────────────────────────────────────────

/// A request to the match/lifecycle service.
///
/// Encoded as `{"type": "ADD_OFFER", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideCommand {
    AddOffer(AddOffer),
    RequestRide(RequestRide),
    AcceptRide(AcceptRide),
    CancelOffer(CancelOffer),
    RejectRequest(RejectRequest),
    ListOffers(ListOffers),
    PendingRequests(PendingRequests),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOffer {
    pub owner_id: String,
    pub area: Area,
    pub direction: Direction,
    pub start_minute: u16,
    pub end_minute: u16,
    pub capacity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_ref: Option<String>,
}

impl AddOffer {
    /// Materialize into an offer once the store has assigned an id.
    pub fn into_offer(self, id: OfferId) -> RideOffer {
        RideOffer {
            id,
            owner_id: self.owner_id,
            area: self.area,
            direction: self.direction,
            start_minute: self.start_minute,
            end_minute: self.end_minute,
            capacity: self.capacity,
            vehicle_ref: self.vehicle_ref,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRide {
    pub rider_id: String,
    pub area: Area,
    pub desired_minute: u16,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance_km: Option<f64>,
}

impl RequestRide {
    pub fn into_request(self, id: RequestId) -> RideRequest {
        RideRequest {
            id,
            rider_id: self.rider_id,
            area: self.area,
            desired_minute: self.desired_minute,
            direction: self.direction,
            min_rating: self.min_rating,
            max_distance_km: self.max_distance_km,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRide {
    pub request_id: RequestId,
    pub driver_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOffer {
    pub offer_id: OfferId,
    pub owner_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    pub request_id: RequestId,
    pub rider_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOffers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<Area>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingRequests {}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

fn payload<T: DeserializeOwned>(kind: &str, value: serde_json::Value) -> Result<T, RideError> {
    let value = if value.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        value
    };
    serde_json::from_value(value)
        .map_err(|e| RideError::Validation(format!("invalid {kind} payload: {e}")))
}

impl RideCommand {
    /// Decode a frame body. Unknown `type` values and bad payloads are
    /// validation errors; the frame itself was well formed.
    pub fn decode(body: &[u8]) -> Result<Self, RideError> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| RideError::Validation(format!("malformed message: {e}")))?;
        let kind = envelope.kind.as_str();
        let command = match kind {
            "ADD_OFFER" => RideCommand::AddOffer(payload(kind, envelope.payload)?),
            "REQUEST_RIDE" => RideCommand::RequestRide(payload(kind, envelope.payload)?),
            "ACCEPT_RIDE" => RideCommand::AcceptRide(payload(kind, envelope.payload)?),
            "CANCEL_OFFER" => RideCommand::CancelOffer(payload(kind, envelope.payload)?),
            "REJECT_REQUEST" => RideCommand::RejectRequest(payload(kind, envelope.payload)?),
            "LIST_OFFERS" => RideCommand::ListOffers(payload(kind, envelope.payload)?),
            "PENDING_REQUESTS" => RideCommand::PendingRequests(payload(kind, envelope.payload)?),
            other => {
                return Err(RideError::Validation(format!(
                    "unknown message type `{other}`"
                )))
            }
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            RideCommand::AddOffer(_) => "ADD_OFFER",
            RideCommand::RequestRide(_) => "REQUEST_RIDE",
            RideCommand::AcceptRide(_) => "ACCEPT_RIDE",
            RideCommand::CancelOffer(_) => "CANCEL_OFFER",
            RideCommand::RejectRequest(_) => "REJECT_REQUEST",
            RideCommand::ListOffers(_) => "LIST_OFFERS",
            RideCommand::PendingRequests(_) => "PENDING_REQUESTS",
        }
    }
}

// ── Ride service: responses ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Reply to any [`RideCommand`]. Fields not relevant to the command are
/// omitted from the JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<OfferId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<Candidate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<DriverContact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offers: Option<Vec<RideOffer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<Vec<RideRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified_riders: Option<usize>,
}

/// An `ERROR` response as seen by a client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason:?}: {message}")]
pub struct ServiceError {
    pub reason: ErrorReason,
    pub message: String,
}

impl RideResponse {
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            reason: None,
            message: None,
            offer_id: None,
            request_id: None,
            candidates: None,
            peer: None,
            offers: None,
            requests: None,
            notified_riders: None,
        }
    }

    pub fn error(err: &RideError) -> Self {
        Self {
            status: ResponseStatus::Error,
            reason: Some(err.reason()),
            message: Some(err.to_string()),
            ..Self::ok()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Split into success / [`ServiceError`].
    pub fn into_result(self) -> Result<Self, ServiceError> {
        match self.status {
            ResponseStatus::Ok => Ok(self),
            ResponseStatus::Error => Err(ServiceError {
                reason: self.reason.unwrap_or(ErrorReason::ProtocolError),
                message: self.message.unwrap_or_default(),
            }),
        }
    }
}

// ── Rendezvous service ────────────────────────────────────────────────────────

/// Client → registry. The caller's address is taken from the socket, never
/// from the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub username: String,
    pub p2p_port: u16,
    pub destination_username: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), RideError> {
        if self.username.trim().is_empty() {
            return Err(RideError::Validation("username must not be empty".into()));
        }
        if self.destination_username.trim().is_empty() {
            return Err(RideError::Validation(
                "destinationUsername must not be empty".into(),
            ));
        }
        if self.username == self.destination_username {
            return Err(RideError::Validation(
                "destinationUsername must differ from username".into(),
            ));
        }
        if self.p2p_port == 0 {
            return Err(RideError::Validation("p2pPort must not be 0".into()));
        }
        Ok(())
    }
}

/// Direct reply to a [`Registration`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RegistrationStatus {
    #[serde(rename_all = "camelCase")]
    Online {
        peer_username: String,
        address: IpAddr,
        port: u16,
    },
    Waiting,
    Error {
        reason: ErrorReason,
        message: String,
    },
}

/// Pushed by the registry on a client's long-lived connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RendezvousPush {
    #[serde(rename = "peerArrived")]
    PeerArrived {
        username: String,
        address: IpAddr,
        port: u16,
    },
}

/// Anything the registry may send down a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RendezvousEvent {
    Status(RegistrationStatus),
    Push(RendezvousPush),
}

impl RendezvousEvent {
    pub fn online(peer_username: impl Into<String>, address: IpAddr, port: u16) -> Self {
        RendezvousEvent::Status(RegistrationStatus::Online {
            peer_username: peer_username.into(),
            address,
            port,
        })
    }

    pub fn peer_arrived(username: impl Into<String>, address: IpAddr, port: u16) -> Self {
        RendezvousEvent::Push(RendezvousPush::PeerArrived {
            username: username.into(),
            address,
            port,
        })
    }

    pub fn error(err: &RideError) -> Self {
        RendezvousEvent::Status(RegistrationStatus::Error {
            reason: err.reason(),
            message: err.to_string(),
        })
    }
}

// ── Direct peer channel ───────────────────────────────────────────────────────

/// Messages exchanged directly between two clients once a peer session is up.
/// The dialing side sends `hello` first so the listener knows who called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PeerMessage {
    Hello {
        username: String,
    },
    #[serde(rename_all = "camelCase")]
    Chat {
        from: String,
        text: String,
        sent_at: u64,
    },
}
