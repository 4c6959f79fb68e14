//! A live client connection as seen by routing and handlers

use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashSet;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use ng_core::traits::Session;
use ng_core::types::NodeId;
use ng_core::{SessionError, SessionState};
use ng_protocol::{Message, Packet, PacketType, SessionId};

use super::pending::PendingRequests;

fn state_to_u8(state: SessionState) -> u8 {
    match state {
        SessionState::New => 0,
        SessionState::Handshaking => 1,
        SessionState::Working => 2,
        SessionState::Closed => 3,
    }
}

fn state_from_u8(value: u8) -> SessionState {
    match value {
        0 => SessionState::New,
        1 => SessionState::Handshaking,
        2 => SessionState::Working,
        _ => SessionState::Closed,
    }
}

/// Shared handle to one client connection.
///
/// The connection task owns the read side and the state machine; everything
/// else (router, forwarding waiters, cluster links) reaches the client
/// through the outbound channel held here.
pub struct ClientSession {
    id: SessionId,
    state: AtomicU8,
    outbound: mpsc::Sender<Packet>,
    pending: PendingRequests,
    /// Remote nodes that have seen forwarded traffic from this session
    remotes: DashSet<NodeId>,
    closed: CancellationToken,
}

impl ClientSession {
    /// Create a new session writing to `outbound`
    pub fn new(id: SessionId, outbound: mpsc::Sender<Packet>, max_pending: usize) -> Self {
        Self {
            id,
            state: AtomicU8::new(state_to_u8(SessionState::New)),
            outbound,
            pending: PendingRequests::new(max_pending),
            remotes: DashSet::new(),
            closed: CancellationToken::new(),
        }
    }

    /// Pending forwarded requests
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Record the current state
    pub fn set_state(&self, state: SessionState) {
        self.state.store(state_to_u8(state), Ordering::SeqCst);
    }

    /// Remember that `node` holds state for this session
    pub fn note_remote(&self, node: &NodeId) {
        if !self.remotes.contains(node) {
            self.remotes.insert(node.clone());
        }
    }

    /// Remote nodes that have seen this session
    pub fn remotes(&self) -> Vec<NodeId> {
        self.remotes.iter().map(|n| n.key().clone()).collect()
    }

    /// Queue a raw packet for the client
    pub async fn send_packet(&self, packet: Packet) -> Result<(), SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed);
        }
        self.outbound
            .send(packet)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Encode and queue a message for the client
    pub async fn send_message(&self, message: &Message) -> Result<(), SessionError> {
        let body = message
            .encode()
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        self.send_packet(Packet::new(PacketType::Data, body)).await
    }

    /// Encode and queue a message without waiting for room.
    ///
    /// Fails with `Backlogged` when the client has stopped draining its
    /// outbound queue.
    pub fn try_send_message(&self, message: &Message) -> Result<(), SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed);
        }
        let body = message
            .encode()
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        self.outbound
            .try_send(Packet::new(PacketType::Data, body))
            .map_err(|e| match e {
                TrySendError::Full(_) => SessionError::Backlogged,
                TrySendError::Closed(_) => SessionError::Closed,
            })
    }

    /// Send a Kick packet carrying `reason`, then close
    pub async fn kick(&self, reason: &str) {
        let body = serde_json::json!({ "reason": reason }).to_string();
        if let Err(e) = self
            .send_packet(Packet::new(PacketType::Kick, Bytes::from(body)))
            .await
        {
            tracing::debug!("Could not kick {}: {}", self.id, e);
        }
        self.closed.cancel();
    }

    /// Token cancelled once the session is closed
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Session for ClientSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn state(&self) -> SessionState {
        state_from_u8(self.state.load(Ordering::SeqCst))
    }

    async fn push(&self, route: &str, body: Bytes) -> Result<(), SessionError> {
        self.send_message(&Message::push(route, body)).await
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}
