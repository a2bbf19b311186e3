//! Typed client for the ride service.

use tokio::net::{TcpStream, ToSocketAddrs};

use ridelink_core::wire::{
    read_json, write_json, AcceptRide, AddOffer, CancelOffer, ListOffers, PendingRequests,
    RejectRequest, RequestRide, RideCommand, RideResponse,
};
use ridelink_core::{Candidate, DriverContact, OfferId, RequestId, RideOffer, RideRequest};

use crate::error::ClientError;

pub struct RideClient {
    stream: TcpStream,
}

impl RideClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Connect)?;
        Ok(Self { stream })
    }

    /// Send one command and wait for its reply. `ERROR` replies become
    /// [`ClientError::Service`].
    pub async fn call(&mut self, command: &RideCommand) -> Result<RideResponse, ClientError> {
        write_json(&mut self.stream, command).await?;
        let reply: RideResponse = read_json(&mut self.stream)
            .await?
            .ok_or(ClientError::Closed)?;
        Ok(reply.into_result()?)
    }

    pub async fn add_offer(&mut self, add: AddOffer) -> Result<OfferId, ClientError> {
        let reply = self.call(&RideCommand::AddOffer(add)).await?;
        reply.offer_id.ok_or(ClientError::MissingField("offerId"))
    }

    /// Submit a request. Returns its id and the ranked candidates plus the
    /// server's summary line.
    pub async fn request_ride(
        &mut self,
        ask: RequestRide,
    ) -> Result<(RequestId, Vec<Candidate>, Option<String>), ClientError> {
        let reply = self.call(&RideCommand::RequestRide(ask)).await?;
        let id = reply.request_id.ok_or(ClientError::MissingField("requestId"))?;
        Ok((id, reply.candidates.unwrap_or_default(), reply.message))
    }

    pub async fn accept(
        &mut self,
        request_id: RequestId,
        driver_id: &str,
    ) -> Result<DriverContact, ClientError> {
        let reply = self
            .call(&RideCommand::AcceptRide(AcceptRide {
                request_id,
                driver_id: driver_id.to_string(),
            }))
            .await?;
        reply.peer.ok_or(ClientError::MissingField("peer"))
    }

    /// Cancel an offer. Returns how many booked riders were released.
    pub async fn cancel_offer(
        &mut self,
        offer_id: OfferId,
        owner_id: &str,
    ) -> Result<usize, ClientError> {
        let reply = self
            .call(&RideCommand::CancelOffer(CancelOffer {
                offer_id,
                owner_id: owner_id.to_string(),
            }))
            .await?;
        Ok(reply.notified_riders.unwrap_or(0))
    }

    pub async fn reject(&mut self, request_id: RequestId, rider_id: &str) -> Result<(), ClientError> {
        self.call(&RideCommand::RejectRequest(RejectRequest {
            request_id,
            rider_id: rider_id.to_string(),
        }))
        .await?;
        Ok(())
    }

    pub async fn list_offers(&mut self, filter: ListOffers) -> Result<Vec<RideOffer>, ClientError> {
        let reply = self.call(&RideCommand::ListOffers(filter)).await?;
        Ok(reply.offers.unwrap_or_default())
    }

    pub async fn pending_requests(&mut self) -> Result<Vec<RideRequest>, ClientError> {
        let reply = self
            .call(&RideCommand::PendingRequests(PendingRequests {}))
            .await?;
        Ok(reply.requests.unwrap_or_default())
    }
}
