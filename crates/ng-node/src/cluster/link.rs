//! Gate side of a link to one backend node

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashSet;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use ng_core::traits::Session;
use ng_core::types::NodeId;
use ng_core::{RouteError, SessionError};
use ng_protocol::{ClusterCodec, ClusterMessage, Message, MessageKind, SessionId};

use crate::session::SessionManager;

/// Channel capacity for outbound cluster messages
const LINK_CHANNEL_CAPACITY: usize = 1024;

/// Connection to a backend node.
///
/// Forwarded requests are tracked until their reply arrives so that a lost
/// link fails them immediately instead of leaving them to the forward
/// timeout.
pub struct RemoteLink {
    node: NodeId,
    tx: mpsc::Sender<ClusterMessage>,
    in_flight: DashSet<(SessionId, u64)>,
    closed: CancellationToken,
}

impl RemoteLink {
    /// Start reader and writer tasks over `stream`.
    ///
    /// `local` is announced to the peer in the opening `Hello`.
    pub fn spawn<S>(
        stream: S,
        local: NodeId,
        remote: NodeId,
        sessions: Arc<SessionManager>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let link = Arc::new(Self {
            node: remote,
            tx,
            in_flight: DashSet::new(),
            closed: CancellationToken::new(),
        });

        let (mut sink, mut stream) = Framed::new(stream, ClusterCodec::new()).split();

        let writer_link = Arc::clone(&link);
        tokio::spawn(async move {
            let hello = ClusterMessage::Hello {
                node: local.to_string(),
            };
            if let Err(e) = sink.send(hello).await {
                tracing::warn!("Failed to greet {}: {}", writer_link.node, e);
                writer_link.shutdown();
                return;
            }

            loop {
                let msg = tokio::select! {
                    _ = writer_link.closed.cancelled() => break,
                    msg = rx.recv() => msg,
                };
                let Some(msg) = msg else { break };

                tracing::trace!("-> {} {}", writer_link.node, msg.name());
                if let Err(e) = sink.send(msg).await {
                    tracing::warn!("Write to {} failed: {}", writer_link.node, e);
                    break;
                }
            }
            writer_link.shutdown();
        });

        let reader_link = Arc::clone(&link);
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = reader_link.closed.cancelled() => break,
                    frame = stream.next() => frame,
                };

                match frame {
                    Some(Ok(msg)) => reader_link.handle_inbound(msg, &sessions).await,
                    Some(Err(e)) => {
                        tracing::warn!("Link to {} failed: {}", reader_link.node, e);
                        break;
                    }
                    None => {
                        tracing::info!("Link to {} closed by peer", reader_link.node);
                        break;
                    }
                }
            }
            reader_link.shutdown();
            reader_link.fail_in_flight(&sessions);
        });

        link
    }

    /// Remote node id
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Whether the link is gone
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the link goes away
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Close the link
    pub fn shutdown(&self) {
        self.closed.cancel();
    }

    /// Relay a client Request or Notify
    pub async fn forward(
        &self,
        gate: &NodeId,
        session_id: SessionId,
        kind: MessageKind,
        id: Option<u64>,
        route: &str,
        body: Bytes,
    ) -> Result<(), RouteError> {
        self.send(ClusterMessage::Forward {
            gate: gate.to_string(),
            session_id,
            kind,
            id,
            route: route.to_string(),
            body,
        })
        .await
    }

    /// Tell the backend a session went away
    pub async fn notify_closed(&self, session_id: SessionId) -> Result<(), RouteError> {
        self.send(ClusterMessage::SessionClosed { session_id }).await
    }

    /// Start tracking a forwarded request
    pub fn track(&self, session_id: SessionId, id: u64) {
        self.in_flight.insert((session_id, id));
    }

    /// Stop tracking a forwarded request
    pub fn untrack(&self, session_id: SessionId, id: u64) -> bool {
        self.in_flight.remove(&(session_id, id)).is_some()
    }

    /// Number of forwarded requests awaiting a reply
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    async fn send(&self, msg: ClusterMessage) -> Result<(), RouteError> {
        if self.is_closed() {
            return Err(RouteError::ForwardingFailed(format!(
                "link to {} is closed",
                self.node
            )));
        }
        self.tx.send(msg).await.map_err(|_| {
            RouteError::ForwardingFailed(format!("link to {} is closed", self.node))
        })
    }

    async fn handle_inbound(&self, msg: ClusterMessage, sessions: &SessionManager) {
        tracing::trace!("<- {} {}", self.node, msg.name());

        match msg {
            ClusterMessage::Hello { node } => {
                if node != self.node.as_str() {
                    tracing::warn!("Expected node {} but peer introduced itself as {}", self.node, node);
                } else {
                    tracing::debug!("Link to {} established", node);
                }
            }

            ClusterMessage::Reply {
                session_id,
                id,
                outcome,
            } => {
                self.untrack(session_id, id);
                let Some(session) = sessions.get(session_id) else {
                    tracing::debug!("Reply {} for vanished {}", id, session_id);
                    return;
                };
                let outcome =
                    outcome.map_err(|f| RouteError::from_remote(f.code, f.message));
                if let Err(e) = session.pending().complete(id, outcome) {
                    tracing::warn!("{} from {}: {}", session_id, self.node, e);
                }
            }

            ClusterMessage::Push {
                session_id,
                route,
                body,
            } => {
                let Some(session) = sessions.get(session_id) else {
                    tracing::debug!("Push {} for vanished {}", route, session_id);
                    return;
                };
                // Never wait on one client here; replies for every other
                // session on this link come through the same reader.
                match session.try_send_message(&Message::push(route.as_str(), body)) {
                    Ok(()) => {}
                    Err(SessionError::Backlogged) => {
                        tracing::warn!("{} is not reading its pushes, closing it", session_id);
                        session.close().await;
                    }
                    Err(e) => tracing::debug!("Push {} to {} dropped: {}", route, session_id, e),
                }
            }

            ClusterMessage::CloseSession { session_id } => {
                if let Some(session) = sessions.get(session_id) {
                    tracing::info!("{} closed by {}", session_id, self.node);
                    session.close().await;
                }
            }

            other => {
                tracing::warn!("Unexpected {} message from {}", other.name(), self.node);
            }
        }
    }

    fn fail_in_flight(&self, sessions: &SessionManager) {
        let lost: Vec<_> = self.in_flight.iter().map(|k| *k).collect();
        self.in_flight.clear();

        if !lost.is_empty() {
            tracing::warn!(
                "Failing {} forwarded requests after losing {}",
                lost.len(),
                self.node
            );
        }

        for (session_id, id) in lost {
            if let Some(session) = sessions.get(session_id) {
                let err = RouteError::ForwardingFailed(format!("lost link to {}", self.node));
                let _ = session.pending().complete(id, Err(err));
            }
        }
    }
}
