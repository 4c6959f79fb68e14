//! Session traits

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SessionError;
use crate::types::SessionState;
use ng_protocol::SessionId;

/// What a handler can do with the session that sent it a message.
///
/// On a gate this is the client connection itself. On a backend node it is a
/// proxy whose calls travel back over the cluster link to the owning gate.
#[async_trait]
pub trait Session: Send + Sync {
    /// Session identifier
    fn id(&self) -> SessionId;

    /// Current session state
    fn state(&self) -> SessionState;

    /// Send an unsolicited Push message to the client
    async fn push(&self, route: &str, body: Bytes) -> Result<(), SessionError>;

    /// Close the session
    async fn close(&self);
}
