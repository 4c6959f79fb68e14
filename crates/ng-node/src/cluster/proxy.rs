//! Backend-side stand-in for a session living on a gate

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ng_core::traits::Session;
use ng_core::types::NodeId;
use ng_core::{SessionError, SessionState};
use ng_protocol::{ClusterMessage, SessionId};

/// A gate session as seen by handlers on a backend node.
///
/// Pushes and closes travel back over the link the session's requests
/// arrived on.
pub struct RemoteSession {
    id: SessionId,
    gate: NodeId,
    link: mpsc::Sender<ClusterMessage>,
    closed: CancellationToken,
}

impl RemoteSession {
    /// Create a proxy for `id` on `gate`
    pub fn new(id: SessionId, gate: NodeId, link: mpsc::Sender<ClusterMessage>) -> Self {
        Self {
            id,
            gate,
            link,
            closed: CancellationToken::new(),
        }
    }

    /// Whether the gate reported the session closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Record that the session is gone without telling the gate
    pub fn mark_closed(&self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl Session for RemoteSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn state(&self) -> SessionState {
        if self.is_closed() {
            SessionState::Closed
        } else {
            SessionState::Working
        }
    }

    async fn push(&self, route: &str, body: Bytes) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.link
            .send(ClusterMessage::Push {
                session_id: self.id,
                route: route.to_string(),
                body,
            })
            .await
            .map_err(|_| SessionError::Closed)
    }

    async fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.closed.cancel();
        if self
            .link
            .send(ClusterMessage::CloseSession {
                session_id: self.id,
            })
            .await
            .is_err()
        {
            tracing::debug!("Link to {} gone while closing {}", self.gate, self.id);
        }
    }
}
