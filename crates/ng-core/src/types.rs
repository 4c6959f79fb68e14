//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RouteError;

/// Unique identifier for a node in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a new node ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A parsed `"Service.Method"` route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route<'a> {
    /// Service name, the routing key
    pub service: &'a str,
    /// Method name, interpreted by the service's handler
    pub method: &'a str,
}

impl<'a> Route<'a> {
    /// Split a route at its first dot.
    ///
    /// Both halves must be non-empty.
    pub fn parse(route: &'a str) -> Result<Self, RouteError> {
        match route.split_once('.') {
            Some((service, method)) if !service.is_empty() && !method.is_empty() => {
                Ok(Self { service, method })
            }
            _ => Err(RouteError::UnroutableMessage(route.to_string())),
        }
    }
}

impl fmt::Display for Route<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.method)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Connection accepted, no handshake yet
    New,
    /// Handshake answered, waiting for the client's ack
    Handshaking,
    /// Ready for data
    Working,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::New => write!(f, "new"),
            SessionState::Handshaking => write!(f, "handshaking"),
            SessionState::Working => write!(f, "working"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Role a node plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Terminates client connections and forwards remote routes
    Gate,
    /// Serves routes for gates over cluster links
    Game,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Gate => write!(f, "gate"),
            NodeRole::Game => write!(f, "game"),
        }
    }
}
