//! ng-core: Core abstractions and configuration for nanogate
//!
//! This crate provides the error taxonomy, shared types, the handler and
//! validator traits, and the configuration structures used by gate and game
//! nodes.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{NgError, RouteError, SessionError};
pub use types::{NodeId, NodeRole, Route, SessionState};
