//! Core trait definitions

mod handler;
mod session;

pub use handler::{Handler, HandshakeValidator};
pub use session::Session;
