//! Shared node state

use std::sync::Arc;

use ng_core::config::NodeConfig;
use ng_core::traits::HandshakeValidator;
use ng_core::types::NodeId;

use crate::cluster::RemotePool;
use crate::router::{RouteTable, Router};
use crate::session::SessionManager;

/// Everything connection and link tasks share on one node
pub struct NodeState {
    /// Configuration
    pub config: NodeConfig,
    /// This node's id
    pub node_id: NodeId,
    /// Route bindings
    pub routes: Arc<RouteTable>,
    /// Live client sessions
    pub sessions: Arc<SessionManager>,
    /// Links to backend nodes
    pub remotes: Arc<RemotePool>,
    /// Dispatcher over `routes` and `remotes`
    pub router: Arc<Router>,
    /// Handshake check; `None` accepts every client
    pub validator: Option<Arc<dyn HandshakeValidator>>,
}

impl NodeState {
    /// Create node state that accepts every handshake
    pub fn new(config: NodeConfig) -> Self {
        let node_id = NodeId::new(config.node_id.clone());
        let routes = Arc::new(RouteTable::new());
        let remotes = Arc::new(RemotePool::new());
        let router = Arc::new(Router::new(
            node_id.clone(),
            Arc::clone(&routes),
            Arc::clone(&remotes),
            config.forward_timeout,
        ));

        Self {
            config,
            node_id,
            routes,
            sessions: Arc::new(SessionManager::new()),
            remotes,
            router,
            validator: None,
        }
    }

    /// Create node state with a handshake validator
    pub fn with_validator(config: NodeConfig, validator: Arc<dyn HandshakeValidator>) -> Self {
        Self {
            validator: Some(validator),
            ..Self::new(config)
        }
    }
}
