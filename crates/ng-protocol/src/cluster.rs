//! Node-to-node messages
//!
//! A gate node keeps one link per backend node. Requests and notifies whose
//! service lives on a backend travel over that link as `Forward`, carrying
//! the originating session so the backend's answer can be steered back to
//! the same client connection.
//!
//! Message flow on a link:
//!
//! 1. Gate connects and sends `Hello` with its node id
//! 2. Backend answers with its own `Hello`
//! 3. Gate sends `Forward` for every remote Request/Notify
//! 4. Backend sends `Reply` for every forwarded Request, and `Push` whenever
//!    a handler pushes to the session
//! 5. Gate sends `SessionClosed` when a client connection goes away; the
//!    backend sends `CloseSession` when a handler closes the session

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::message::MessageKind;
use crate::session::SessionId;

/// Failure reported by a backend node instead of a reply body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    /// Error code, same space as client-visible error responses
    pub code: u16,
    /// Human-readable message
    pub message: String,
}

impl RemoteFailure {
    /// Create a new failure
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Messages exchanged between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterMessage {
    /// Link identification, sent once by each side
    Hello {
        /// Sender's node id
        node: String,
    },

    /// A client Request or Notify relayed by a gate
    Forward {
        /// Gate node the client is connected to
        gate: String,
        /// Session on that gate
        session_id: SessionId,
        /// Request or Notify
        kind: MessageKind,
        /// Correlation id, present for Request
        id: Option<u64>,
        /// Full `"Service.Method"` route
        route: String,
        /// Opaque payload
        body: Bytes,
    },

    /// Outcome of a forwarded Request
    Reply {
        /// Session the Request came from
        session_id: SessionId,
        /// Id of the Request
        id: u64,
        /// Response body or failure
        outcome: Result<Bytes, RemoteFailure>,
    },

    /// A backend handler pushing to a gate session
    Push {
        /// Target session
        session_id: SessionId,
        /// Push route
        route: String,
        /// Opaque payload
        body: Bytes,
    },

    /// A gate session closed
    SessionClosed {
        /// The closed session
        session_id: SessionId,
    },

    /// A backend handler asking the gate to drop a session
    CloseSession {
        /// Session to close
        session_id: SessionId,
    },
}

impl ClusterMessage {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ClusterMessage::Hello { .. } => "hello",
            ClusterMessage::Forward { .. } => "forward",
            ClusterMessage::Reply { .. } => "reply",
            ClusterMessage::Push { .. } => "push",
            ClusterMessage::SessionClosed { .. } => "session-closed",
            ClusterMessage::CloseSession { .. } => "close-session",
        }
    }
}
