//! Client listener
//!
//! Accepts incoming connections and spawns a handler for each client.
//! Clients speak raw packets over TCP, or WebSocket when the node is
//! configured with a WebSocket path.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::server::handler::serve_connection;
use crate::server::websocket::serve_websocket;
use crate::state::NodeState;

/// Listener for game clients
pub struct ClientListener {
    /// Shared node state
    state: Arc<NodeState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl ClientListener {
    /// Create a new listener
    pub fn new(state: Arc<NodeState>, cancel: CancellationToken) -> Self {
        Self { state, cancel }
    }

    /// Bind `bind_addr` and serve clients until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.serve(listener).await
    }

    /// Serve clients on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        match &self.state.config.websocket_path {
            Some(path) => tracing::info!("Accepting WebSocket clients on ws://{}{}", local_addr, path),
            None => tracing::info!("Accepting clients on {}", local_addr),
        }

        loop {
            tokio::select! {
                // Check for shutdown
                _ = self.cancel.cancelled() => {
                    tracing::info!("Client listener shutting down");
                    break;
                }

                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => tracing::error!("Failed to accept connection: {}", e),
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::debug!("New connection from {}", peer_addr);
        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!("set_nodelay for {} failed: {}", peer_addr, e);
        }

        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let websocket_path = state.config.websocket_path.clone();

        tokio::spawn(async move {
            let result = match websocket_path {
                Some(path) => serve_websocket(state, socket, &path, cancel).await,
                None => serve_connection(state, socket, cancel).await,
            };
            match result {
                Ok(()) => tracing::debug!("Connection from {} closed normally", peer_addr),
                Err(e) => tracing::warn!("Connection from {} closed with error: {}", peer_addr, e),
            }
        });
    }
}
