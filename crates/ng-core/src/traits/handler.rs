//! Handler traits

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::error::RouteError;
use crate::traits::Session;

/// A service bound into the route table.
///
/// One handler serves every method of one service; `method` is the part of
/// the route after the first dot.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle a Request or Notify.
    ///
    /// For a Request the returned body becomes the Response. For a Notify
    /// it is discarded.
    async fn call(
        &self,
        session: Arc<dyn Session>,
        method: &str,
        body: Bytes,
    ) -> Result<Bytes, RouteError>;
}

/// Decides whether a client's handshake is accepted.
///
/// The handshake body is passed through untouched; its structure is a
/// contract between the embedding application and its clients.
#[async_trait]
pub trait HandshakeValidator: Send + Sync {
    /// Return `Err(reason)` to reject the client
    async fn validate(&self, session: &dyn Session, body: &[u8]) -> Result<(), String>;
}
