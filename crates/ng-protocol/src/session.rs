//! Session identifier type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a client connection, unique within one gate node.
///
/// Travels in cluster messages so a backend's reply can find its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_raw_value() {
        let id = SessionId::from(42);
        assert_eq!(id.to_string(), "session-42");
        assert_eq!(id.as_u64(), 42);
    }

    #[test]
    fn test_bincode_is_plain_u64() {
        let bytes = bincode::serialize(&SessionId::new(7)).unwrap();
        assert_eq!(bytes, 7u64.to_le_bytes());
        let back: SessionId = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, SessionId::new(7));
    }
}
