//! Session manager implementation

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use ng_protocol::{Packet, SessionId};

use super::client::ClientSession;

/// All live client sessions on this node
pub struct SessionManager {
    /// Sessions indexed by session ID
    sessions: DashMap<SessionId, Arc<ClientSession>>,
    /// Next session ID to allocate
    next_session_id: AtomicU64,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Allocate an ID and register a new session
    pub fn create(&self, outbound: mpsc::Sender<Packet>, max_pending: usize) -> Arc<ClientSession> {
        let id = SessionId::new(self.next_session_id.fetch_add(1, Ordering::SeqCst));
        let session = Arc::new(ClientSession::new(id, outbound, max_pending));
        self.sessions.insert(id, Arc::clone(&session));
        session
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Option<Arc<ClientSession>> {
        self.sessions.get(&id).map(|r| r.value().clone())
    }

    /// Remove a session
    pub fn remove(&self, id: SessionId) -> Option<Arc<ClientSession>> {
        self.sessions.remove(&id).map(|(_, s)| s)
    }

    /// Number of active sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
