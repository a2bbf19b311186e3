//! Ride service connection handler.
//!
//! Requests are answered in order on the same connection, so clients may
//! pipeline. Business failures become `ERROR` responses and the connection
//! stays open; only framing failures close it.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use ridelink_core::wire::{read_frame, write_json, RideCommand, RideResponse};
use ridelink_core::RideError;

use super::ApiState;

pub async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    state: ApiState,
) -> anyhow::Result<()> {
    tracing::info!(%peer, "ride client connected");
    let result = serve(&mut stream, &state).await;
    tracing::info!(%peer, "ride client disconnected");
    result
}

/// Read-dispatch-reply loop over any byte stream.
pub async fn serve<S>(stream: &mut S, state: &ApiState) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let body = match read_frame(stream).await {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "closing ride connection on protocol error");
                let reply = RideResponse::error(&RideError::Protocol(e.to_string()));
                let _ = write_json(stream, &reply).await;
                return Err(e.into());
            }
        };

        let response = match RideCommand::decode(&body) {
            Ok(command) => {
                let name = command.name();
                let response = dispatch(state, command).await;
                if let Some(reason) = response.reason {
                    tracing::debug!(command = name, ?reason, "command failed");
                }
                response
            }
            Err(e) => {
                tracing::debug!(error = %e, "rejected malformed command");
                RideResponse::error(&e)
            }
        };
        write_json(stream, &response).await?;
    }
}

async fn dispatch(state: &ApiState, command: RideCommand) -> RideResponse {
    let lifecycle = &state.lifecycle;
    let result = match command {
        RideCommand::AddOffer(add) => lifecycle.add_offer(add).await.map(|offer| RideResponse {
            offer_id: Some(offer.id),
            ..RideResponse::ok()
        }),

        RideCommand::RequestRide(ask) => lifecycle.submit(ask).await.map(|s| {
            let message = format!("Found {} matching rides", s.candidates.len());
            RideResponse {
                request_id: Some(s.request_id),
                candidates: Some(s.candidates),
                ..RideResponse::ok()
            }
            .with_message(message)
        }),

        RideCommand::AcceptRide(accept) => lifecycle
            .accept(accept.request_id, &accept.driver_id)
            .await
            .map(|contact| RideResponse {
                request_id: Some(accept.request_id),
                peer: Some(contact),
                ..RideResponse::ok()
            }),

        RideCommand::CancelOffer(cancel) => lifecycle
            .cancel_offer(cancel.offer_id, &cancel.owner_id)
            .map(|c| RideResponse {
                offer_id: Some(c.offer.id),
                notified_riders: Some(c.notified_riders),
                ..RideResponse::ok()
            }),

        RideCommand::RejectRequest(reject) => lifecycle
            .reject(reject.request_id, &reject.rider_id)
            .map(|()| RideResponse {
                request_id: Some(reject.request_id),
                ..RideResponse::ok()
            }),

        RideCommand::ListOffers(filter) => Ok(RideResponse {
            offers: Some(lifecycle.offers().list(&filter)),
            ..RideResponse::ok()
        }),

        RideCommand::PendingRequests(_) => Ok(RideResponse {
            requests: Some(lifecycle.pending()),
            ..RideResponse::ok()
        }),
    };

    match result {
        Ok(response) => response,
        Err(e) => RideResponse::error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridelink_core::config::RideLinkConfig;
    use ridelink_core::wire::{encode_frame, read_json};
    use ridelink_core::ErrorReason;
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    fn state() -> ApiState {
        ApiState::from_config(&RideLinkConfig::default()).unwrap()
    }

    fn spawn_server() -> (DuplexStream, tokio::task::JoinHandle<anyhow::Result<()>>) {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let state = state();
        let handle = tokio::spawn(async move { serve(&mut server, &state).await });
        (client, handle)
    }

    async fn call(client: &mut DuplexStream, msg: serde_json::Value) -> serde_json::Value {
        write_json(client, &msg).await.unwrap();
        read_json(client).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn offer_then_request_matches() {
        let (mut client, _server) = spawn_server();

        let added = call(
            &mut client,
            json!({"type": "ADD_OFFER", "payload": {
                "ownerId": "d1", "area": "Hamra", "direction": "toHub",
                "startMinute": 480, "endMinute": 495, "capacity": 1}}),
        )
        .await;
        assert_eq!(added["status"], "OK");
        let offer_id = added["offerId"].as_u64().unwrap();

        let matched = call(
            &mut client,
            json!({"type": "REQUEST_RIDE", "payload": {
                "riderId": "r1", "area": "Hamra", "desiredMinute": 500, "direction": "toHub"}}),
        )
        .await;
        assert_eq!(matched["status"], "OK");
        assert_eq!(matched["candidates"][0]["offerId"].as_u64(), Some(offer_id));

        let none = call(
            &mut client,
            json!({"type": "REQUEST_RIDE", "payload": {
                "riderId": "r1", "area": "Hamra", "desiredMinute": 520, "direction": "toHub"}}),
        )
        .await;
        assert_eq!(none["status"], "OK");
        assert_eq!(none["candidates"], json!([]));
        assert_eq!(none["message"], "Found 0 matching rides");
    }

    #[tokio::test]
    async fn unknown_type_keeps_connection_open() {
        let (mut client, _server) = spawn_server();

        let err = call(&mut client, json!({"type": "TELEPORT", "payload": {}})).await;
        assert_eq!(err["status"], "ERROR");
        assert_eq!(err["reason"], "ValidationError");

        let ok = call(&mut client, json!({"type": "PENDING_REQUESTS"})).await;
        assert_eq!(ok["status"], "OK");
        assert_eq!(ok["requests"], json!([]));
    }

    #[tokio::test]
    async fn non_json_body_is_a_validation_error() {
        let (mut client, _server) = spawn_server();
        client.write_all(&encode_frame(b"not json").unwrap()).await.unwrap();
        let reply: RideResponse = read_json(&mut client).await.unwrap().unwrap();
        assert_eq!(reply.reason, Some(ErrorReason::ValidationError));

        let ok = call(&mut client, json!({"type": "LIST_OFFERS", "payload": {}})).await;
        assert_eq!(ok["status"], "OK");
    }

    #[tokio::test]
    async fn oversize_frame_closes_connection() {
        let (mut client, server) = spawn_server();
        client.write_all(&[0x7f, 0xff, 0xff, 0xff]).await.unwrap();

        let reply: RideResponse = read_json(&mut client).await.unwrap().unwrap();
        assert_eq!(reply.reason, Some(ErrorReason::ProtocolError));
        assert!(server.await.unwrap().is_err());
        assert!(read_frame(&mut client).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_by_stranger_is_not_owner() {
        let (mut client, _server) = spawn_server();
        let added = call(
            &mut client,
            json!({"type": "ADD_OFFER", "payload": {
                "ownerId": "d1", "area": "Hamra", "direction": "fromHub",
                "startMinute": 1000, "endMinute": 1010, "capacity": 2}}),
        )
        .await;
        let offer_id = added["offerId"].clone();

        let denied = call(
            &mut client,
            json!({"type": "CANCEL_OFFER", "payload": {"offerId": offer_id, "ownerId": "d2"}}),
        )
        .await;
        assert_eq!(denied["reason"], "NotOwner");

        let done = call(
            &mut client,
            json!({"type": "CANCEL_OFFER", "payload": {"offerId": offer_id, "ownerId": "d1"}}),
        )
        .await;
        assert_eq!(done["status"], "OK");
        assert_eq!(done["notifiedRiders"], 0);
    }
}
