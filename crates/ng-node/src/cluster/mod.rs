//! Node-to-node forwarding

mod backoff;
mod link;
mod pool;
mod proxy;
mod server;

pub use backoff::ExponentialBackoff;
pub use link::RemoteLink;
pub use pool::{Connector, RemotePool};
pub use proxy::RemoteSession;
pub use server::{serve_link, ClusterServer};
