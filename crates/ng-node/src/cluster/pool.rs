//! Links to backend nodes

use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use ng_core::config::BackoffConfig;
use ng_core::types::NodeId;

use super::backoff::ExponentialBackoff;
use super::link::RemoteLink;
use crate::router::RouteTable;
use crate::session::SessionManager;

/// Pool of live links, keyed by remote node
pub struct RemotePool {
    links: DashMap<NodeId, Arc<RemoteLink>>,
}

impl RemotePool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            links: DashMap::new(),
        }
    }

    /// Live link to `node`
    pub fn get(&self, node: &NodeId) -> Option<Arc<RemoteLink>> {
        self.links
            .get(node)
            .map(|r| r.value().clone())
            .filter(|link| !link.is_closed())
    }

    /// Register a link, closing any previous link to the same node
    pub fn insert(&self, link: Arc<RemoteLink>) {
        if let Some(old) = self.links.insert(link.node().clone(), link) {
            old.shutdown();
        }
    }

    /// Remove the link to `node`
    pub fn remove(&self, node: &NodeId) -> Option<Arc<RemoteLink>> {
        self.links.remove(node).map(|(_, link)| link)
    }

    /// Number of registered links
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Close every link
    pub fn shutdown(&self) {
        for link in self.links.iter() {
            link.shutdown();
        }
        self.links.clear();
    }
}

impl Default for RemotePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Dials one backend node and keeps the link up
pub struct Connector {
    /// This node
    pub local: NodeId,
    /// Backend node
    pub remote: NodeId,
    /// Backend cluster address
    pub address: String,
    /// Retry policy
    pub backoff: BackoffConfig,
}

impl Connector {
    /// Connect, retrying with backoff until attempts run out
    pub async fn connect_with_retry(
        &self,
        sessions: &Arc<SessionManager>,
        cancel: &CancellationToken,
    ) -> Option<Arc<RemoteLink>> {
        let mut backoff = ExponentialBackoff::from_config(&self.backoff);

        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return None,
                result = TcpStream::connect(&self.address) => result,
            };

            match attempt {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("set_nodelay on {} failed: {}", self.address, e);
                    }
                    tracing::info!("Connected to {} at {}", self.remote, self.address);
                    return Some(RemoteLink::spawn(
                        stream,
                        self.local.clone(),
                        self.remote.clone(),
                        Arc::clone(sessions),
                    ));
                }
                Err(e) => {
                    let Some(delay) = backoff.next_delay() else {
                        tracing::error!(
                            "Giving up on {} after {} attempts: {}",
                            self.remote,
                            backoff.attempts(),
                            e
                        );
                        return None;
                    };
                    tracing::warn!(
                        "Connection to {} failed: {}. Retrying in {:?}",
                        self.remote,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Keep a link to the backend registered in `pool` until `cancel` fires.
    ///
    /// A lost link is replaced by a fresh connection. Requests in flight on
    /// the lost link have already failed by the time it is replaced. Once
    /// reconnecting gives up, the node's services are dropped from `routes`
    /// and later calls to them get `UnknownRoute`.
    pub fn supervise(
        self,
        pool: Arc<RemotePool>,
        sessions: Arc<SessionManager>,
        routes: Arc<RouteTable>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let Some(link) = self.connect_with_retry(&sessions, &cancel).await else {
                    if !cancel.is_cancelled() {
                        let services = routes.unbind_node(&self.remote);
                        tracing::error!(
                            "{} is unreachable, unbound {:?}",
                            self.remote,
                            services
                        );
                    }
                    break;
                };
                let closed = link.closed_token();
                pool.insert(link);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = closed.cancelled() => {
                        tracing::warn!("Lost link to {}, reconnecting", self.remote);
                    }
                }
            }

            if let Some(link) = pool.remove(&self.remote) {
                link.shutdown();
            }
            tracing::debug!("Stopped supervising {}", self.remote);
        })
    }
}
