//! Route binding table

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use ng_core::traits::Handler;
use ng_core::types::NodeId;

/// Where a service is served
#[derive(Clone)]
pub enum Binding {
    /// Handler running on this node
    Local(Arc<dyn Handler>),
    /// Another node, reached over a cluster link
    Remote(NodeId),
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Local(_) => write!(f, "Local"),
            Binding::Remote(node) => write!(f, "Remote({})", node),
        }
    }
}

/// Immutable view of the table at one point in time
pub type RouteSnapshot = Arc<HashMap<String, Binding>>;

/// Service name to binding.
///
/// Writers replace the whole map; readers clone the current `Arc`, so a
/// lookup never observes a half-applied update.
pub struct RouteTable {
    bindings: RwLock<RouteSnapshot>,
}

impl RouteTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Current bindings
    pub fn snapshot(&self) -> RouteSnapshot {
        self.bindings.read().clone()
    }

    /// Look up the binding for `service`
    pub fn resolve(&self, service: &str) -> Option<Binding> {
        self.snapshot().get(service).cloned()
    }

    /// Serve `service` with a local handler
    pub fn bind_local(&self, service: impl Into<String>, handler: Arc<dyn Handler>) {
        self.update(|map| {
            map.insert(service.into(), Binding::Local(handler));
        });
    }

    /// Serve `service` from `node`
    pub fn bind_remote(&self, service: impl Into<String>, node: NodeId) {
        self.update(|map| {
            map.insert(service.into(), Binding::Remote(node));
        });
    }

    /// Drop every binding pointing at `node`, returning the affected services
    pub fn unbind_node(&self, node: &NodeId) -> Vec<String> {
        let mut removed = Vec::new();
        self.update(|map| {
            map.retain(|service, binding| match binding {
                Binding::Remote(n) if n == node => {
                    removed.push(service.clone());
                    false
                }
                _ => true,
            });
        });
        removed
    }

    /// Bound service names
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<_> = self.snapshot().keys().cloned().collect();
        services.sort();
        services
    }

    fn update(&self, f: impl FnOnce(&mut HashMap<String, Binding>)) {
        let mut guard = self.bindings.write();
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
