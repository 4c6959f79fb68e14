//! Client connection handler
//!
//! One task per connection reads packets in order and drives the session
//! state machine. Everything written to the client, from this task or from
//! forwarding waiters and cluster links, goes through the session's
//! outbound channel to a dedicated writer task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use ng_core::traits::Session;
use ng_core::{NgError, RouteError, SessionError, SessionState};
use ng_protocol::{Message, Packet, PacketCodec, PacketType, ProtocolError};

use super::health::HealthMonitor;
use crate::session::{Action, ClientSession, SessionMachine};
use crate::state::NodeState;

/// Channel capacity for packets queued to one client
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Body of the server's Handshake response
pub fn handshake_response(heartbeat: Duration) -> Bytes {
    let body = serde_json::json!({
        "code": 200,
        "sys": { "heartbeat": heartbeat.as_secs() },
    });
    Bytes::from(body.to_string())
}

/// Serve one client connection until it closes, fails, or `cancel` fires
pub async fn serve_connection<S>(
    state: Arc<NodeState>,
    stream: S,
    cancel: CancellationToken,
) -> Result<(), NgError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, packets) = Framed::new(stream, PacketCodec::new()).split();
    serve_packets(state, sink, packets, cancel).await
}

/// Serve a client over an already framed packet transport.
///
/// `sink` is moved to the writer task; `packets` is read on the caller's
/// task in arrival order.
pub async fn serve_packets<W, R>(
    state: Arc<NodeState>,
    mut sink: W,
    mut packets: R,
    cancel: CancellationToken,
) -> Result<(), NgError>
where
    W: Sink<Packet> + Unpin + Send + 'static,
    W::Error: fmt::Display,
    R: Stream<Item = Result<Packet, ProtocolError>> + Unpin,
{
    let (tx, mut rx) = mpsc::channel::<Packet>(OUTBOUND_CHANNEL_CAPACITY);

    let session = state.sessions.create(tx, state.config.max_pending);
    let closed = session.closed_token();
    tracing::debug!("{} opened", session.id());

    let writer_closed = closed.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                packet = rx.recv() => {
                    let Some(packet) = packet else { break };
                    if let Err(e) = sink.send(packet).await {
                        tracing::debug!("Write failed: {}", e);
                        return;
                    }
                }

                _ = writer_closed.cancelled() => {
                    // Flush what was queued before the close, such as a Kick
                    while let Ok(packet) = rx.try_recv() {
                        if sink.send(packet).await.is_err() {
                            return;
                        }
                    }
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    let result = drive(&state, &session, &mut packets, &cancel, &closed).await;

    session.set_state(SessionState::Closed);
    session.close().await;
    let failed = session.pending().close(RouteError::SessionClosed);
    state.sessions.remove(session.id());

    for node in session.remotes() {
        if let Some(link) = state.remotes.get(&node) {
            if let Err(e) = link.notify_closed(session.id()).await {
                tracing::debug!("Could not tell {} about {}: {}", node, session.id(), e);
            }
        }
    }

    let _ = writer.await;

    match &result {
        Ok(()) => tracing::debug!("{} closed ({} pending failed)", session.id(), failed),
        Err(e) => tracing::info!("{} closed: {} ({} pending failed)", session.id(), e, failed),
    }
    result
}

async fn drive<R>(
    state: &NodeState,
    session: &Arc<ClientSession>,
    packets: &mut R,
    cancel: &CancellationToken,
    closed: &CancellationToken,
) -> Result<(), NgError>
where
    R: Stream<Item = Result<Packet, ProtocolError>> + Unpin,
{
    let mut machine = SessionMachine::new();
    let mut health = HealthMonitor::new(
        state.config.heartbeat_interval,
        state.config.heartbeat_timeout,
    );
    let mut ticker = health.ticker();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                session.kick("server shutting down").await;
                return Ok(());
            }

            _ = closed.cancelled() => return Ok(()),

            _ = ticker.tick() => {
                if health.is_expired() {
                    tracing::debug!("{} idle for {:?}", session.id(), health.idle());
                    return Err(SessionError::IdleTimeout.into());
                }
                if machine.state() == SessionState::Working {
                    session.send_packet(Packet::empty(PacketType::Heartbeat)).await?;
                }
                continue;
            }

            frame = packets.next() => frame,
        };

        let packet = match frame {
            Some(Ok(packet)) => packet,
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(()),
        };
        health.touch();

        match machine.on_packet(packet.kind)? {
            Action::Validate => {
                if let Some(validator) = &state.validator {
                    if let Err(reason) = validator.validate(&**session, &packet.body).await {
                        let err = machine.reject_handshake(reason.clone());
                        session.kick(&reason).await;
                        return Err(err.into());
                    }
                }
                machine.accept_handshake()?;
                session.set_state(machine.state());
                session
                    .send_packet(Packet::new(
                        PacketType::Handshake,
                        handshake_response(health.interval),
                    ))
                    .await?;
            }

            Action::Ready => {
                session.set_state(machine.state());
                tracing::debug!("{} working", session.id());
            }

            Action::Heartbeat => {}

            Action::Dispatch => {
                let message = Message::decode(&packet.body)?;
                state.router.dispatch(session, message).await?;
            }

            Action::Ignore => {
                tracing::trace!("{} ignoring {:?} packet", session.id(), packet.kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_response_shape() {
        let body = handshake_response(Duration::from_secs(30));
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["code"], 200);
        assert_eq!(value["sys"]["heartbeat"], 30);
    }
}
