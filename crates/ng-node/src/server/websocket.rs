//! WebSocket client transport
//!
//! Browser clients reach the gate over WebSocket. Every binary WebSocket
//! message carries exactly one packet in either direction; text messages
//! are a protocol violation. Once the upgrade is done the session runs
//! exactly like a raw TCP client.

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use futures::{future, SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use ng_core::NgError;
use ng_protocol::{decode_packet, Packet, ProtocolError, HEADER_SIZE};

use super::handler::serve_packets;
use crate::state::NodeState;

/// Failure writing a packet to a WebSocket client
#[derive(Error, Debug)]
pub enum WsTransportError {
    /// WebSocket layer failed
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Packet could not be encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Decode the single packet carried by one binary WebSocket message
pub fn packet_from_frame(frame: &[u8]) -> Result<Packet, ProtocolError> {
    let (kind, body, consumed) = decode_packet(frame)?;
    if consumed != frame.len() {
        return Err(ProtocolError::MalformedPacket(
            "trailing bytes after packet in WebSocket message",
        ));
    }
    Ok(Packet::new(kind, body))
}

/// Encode a packet as one binary WebSocket message
pub fn packet_to_frame(packet: &Packet) -> Result<WsMessage, ProtocolError> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + packet.body.len());
    packet.encode_into(&mut buf)?;
    Ok(WsMessage::Binary(buf.to_vec()))
}

fn inbound(message: Result<WsMessage, tungstenite::Error>) -> Option<Result<Packet, ProtocolError>> {
    match message {
        Ok(WsMessage::Binary(data)) => Some(packet_from_frame(&data)),
        Ok(WsMessage::Text(_)) => Some(Err(ProtocolError::MalformedPacket(
            "text WebSocket messages are not allowed",
        ))),
        // tungstenite answers pings itself and ends the stream after a close
        Ok(_) => None,
        Err(e) => Some(Err(ProtocolError::Io(io::Error::other(e)))),
    }
}

/// Upgrade `stream` to a WebSocket on `path` and serve the client
pub async fn serve_websocket<S>(
    state: Arc<NodeState>,
    stream: S,
    path: &str,
    cancel: CancellationToken,
) -> Result<(), NgError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let expected = path.to_string();
    let check_path = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == expected {
            return Ok(response);
        }
        tracing::debug!("Refusing WebSocket upgrade on {}", request.uri().path());
        let mut refusal = ErrorResponse::new(Some(format!(
            "no WebSocket endpoint at {}",
            request.uri().path()
        )));
        *refusal.status_mut() = StatusCode::NOT_FOUND;
        Err(refusal)
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, check_path)
        .await
        .map_err(|e| NgError::Io(io::Error::other(e)))?;

    let (sink, messages) = ws.split();
    let sink = sink.with(|packet: Packet| {
        future::ready(packet_to_frame(&packet).map_err(WsTransportError::from))
    });
    let packets = messages.filter_map(|message| future::ready(inbound(message)));

    serve_packets(state, sink, packets, cancel).await
}
