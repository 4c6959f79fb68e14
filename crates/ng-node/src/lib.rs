//! ng-node: gate and game nodes for nanogate
//!
//! A gate node terminates client connections, runs each through the
//! handshake state machine, and dispatches their messages. Services bound
//! locally are called in place; services living on game nodes are forwarded
//! over cluster links and their replies steered back to the originating
//! session.

pub mod cluster;
pub mod router;
pub mod server;
pub mod services;
pub mod session;
pub mod state;

pub use router::Router;
pub use state::NodeState;
