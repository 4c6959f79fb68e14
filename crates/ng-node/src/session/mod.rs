//! Session management

mod client;
mod machine;
mod manager;
mod pending;

pub use client::ClientSession;
pub use machine::{Action, SessionMachine};
pub use manager::SessionManager;
pub use pending::{PendingOutcome, PendingRequests};
