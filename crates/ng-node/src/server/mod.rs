//! Client-facing server

mod handler;
mod health;
mod listener;
mod websocket;

pub use handler::{handshake_response, serve_connection, serve_packets};
pub use health::HealthMonitor;
pub use listener::ClientListener;
pub use websocket::{packet_from_frame, packet_to_frame, serve_websocket, WsTransportError};
