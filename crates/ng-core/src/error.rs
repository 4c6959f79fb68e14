//! Core error types for nanogate

use ng_protocol::{PacketType, ProtocolError};
use std::path::PathBuf;
use thiserror::Error;

use crate::types::SessionState;

/// Top-level error type for the nanogate workspace
#[derive(Error, Debug)]
pub enum NgError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Routing error
    #[error("Routing error: {0}")]
    Route(#[from] RouteError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors local to a single routed message.
///
/// None of these are fatal to the session that sent the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// No binding for the route's service
    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    /// Routable message with an empty or malformed route
    #[error("Unroutable message: route {0:?} is not of the form Service.Method")]
    UnroutableMessage(String),

    /// Response whose id has no pending entry
    #[error("Unmatched response: no pending request with id {0}")]
    UnmatchedResponse(u64),

    /// Request id already awaiting a response on this session
    #[error("Duplicate request id {0}")]
    DuplicateRequest(u64),

    /// Pending table is full
    #[error("Too many pending requests (limit {limit})")]
    TooManyPending { limit: usize },

    /// Peer has too much queued work for the session
    #[error("Overloaded: {0}")]
    Overloaded(String),

    /// Session closed before the request completed
    #[error("Session closed")]
    SessionClosed,

    /// Remote node unreachable, errored or timed out
    #[error("Forwarding failed: {0}")]
    ForwardingFailed(String),

    /// Handler returned an error
    #[error("Handler failed: {0}")]
    Handler(String),
}

impl RouteError {
    /// Code carried in client-visible error responses
    pub fn code(&self) -> u16 {
        match self {
            RouteError::UnroutableMessage(_) => 400,
            RouteError::UnknownRoute(_) => 404,
            RouteError::DuplicateRequest(_) => 409,
            RouteError::TooManyPending { .. } | RouteError::Overloaded(_) => 429,
            RouteError::Handler(_) | RouteError::UnmatchedResponse(_) => 500,
            RouteError::ForwardingFailed(_) => 502,
            RouteError::SessionClosed => 503,
        }
    }

    /// Payload of the error without the variant prefix, as sent between nodes
    pub fn detail(&self) -> String {
        match self {
            RouteError::UnknownRoute(s)
            | RouteError::UnroutableMessage(s)
            | RouteError::ForwardingFailed(s)
            | RouteError::Overloaded(s)
            | RouteError::Handler(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuild an error from a code and message received from another node
    pub fn from_remote(code: u16, message: String) -> Self {
        match code {
            400 => RouteError::UnroutableMessage(message),
            404 => RouteError::UnknownRoute(message),
            429 => RouteError::Overloaded(message),
            503 => RouteError::SessionClosed,
            500 => RouteError::Handler(message),
            _ => RouteError::ForwardingFailed(message),
        }
    }
}

/// Session lifecycle errors. All of them close the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Handshake validator rejected the client
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Packet not allowed in the current state
    #[error("Protocol violation: {packet:?} packet in {state:?} state")]
    ProtocolViolation {
        state: SessionState,
        packet: PacketType,
    },

    /// Session is already closed
    #[error("Session closed")]
    Closed,

    /// Outbound queue is full and the client is not draining it
    #[error("Outbound queue full")]
    Backlogged,

    /// No packet within the heartbeat timeout
    #[error("Session idle for longer than the heartbeat timeout")]
    IdleTimeout,

    /// Outbound message could not be encoded
    #[error("Failed to encode outbound message: {0}")]
    Encode(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_error_codes() {
        assert_eq!(RouteError::UnknownRoute("A".into()).code(), 404);
        assert_eq!(RouteError::UnroutableMessage(String::new()).code(), 400);
        assert_eq!(RouteError::ForwardingFailed("down".into()).code(), 502);
        assert_eq!(RouteError::SessionClosed.code(), 503);
    }

    #[test]
    fn test_remote_roundtrip_keeps_kind() {
        let err = RouteError::UnknownRoute("Nope".into());
        let rebuilt = RouteError::from_remote(err.code(), err.detail());
        assert_eq!(rebuilt, err);

        let busy = RouteError::from_remote(429, "queue full".into());
        assert_eq!(busy, RouteError::Overloaded("queue full".into()));
        assert_eq!(busy.code(), 429);

        let other = RouteError::from_remote(418, "teapot".into());
        assert!(matches!(other, RouteError::ForwardingFailed(_)));
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::ProtocolViolation {
            state: SessionState::Handshaking,
            packet: PacketType::Data,
        };
        assert_eq!(
            err.to_string(),
            "Protocol violation: Data packet in Handshaking state"
        );
    }
}
