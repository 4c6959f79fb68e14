//! Token check on the client handshake

use async_trait::async_trait;

use ng_core::traits::{HandshakeValidator, Session};

/// Accepts handshakes of the form `{"auth":{"token":"<token>"}}`
pub struct TokenValidator {
    token: String,
}

impl TokenValidator {
    /// Require `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl HandshakeValidator for TokenValidator {
    async fn validate(&self, session: &dyn Session, body: &[u8]) -> Result<(), String> {
        let doc: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| format!("malformed handshake: {}", e))?;

        match doc.pointer("/auth/token").and_then(|t| t.as_str()) {
            Some(token) if token == self.token => {
                tracing::debug!("{} authenticated", session.id());
                Ok(())
            }
            Some(_) => Err("invalid token".to_string()),
            None => Err("missing auth token".to_string()),
        }
    }
}
