//! nanogate node daemon
//!
//! `ng-node gate` accepts client connections and forwards remote services
//! to game nodes; `ng-node game` serves forwarded calls from gates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ng_core::config::{self, NodeConfig};
use ng_core::traits::HandshakeValidator;
use ng_core::types::NodeId;
use ng_core::NodeRole;
use ng_node::cluster::{ClusterServer, Connector};
use ng_node::server::ClientListener;
use ng_node::services::{GameService, TokenValidator, GAME_SERVICE};
use ng_node::NodeState;

#[derive(Parser)]
#[command(name = "ng-node")]
#[command(about = "nanogate gate/game node")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    role: RoleArg,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Client listen address (overrides config)
    #[arg(short, long, global = true)]
    listen: Option<String>,

    /// Cluster listen address (overrides config)
    #[arg(long, global = true)]
    cluster: Option<String>,

    /// Serve clients over WebSocket at this path, e.g. /nano (overrides config)
    #[arg(long, global = true)]
    ws_path: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Clone, Copy)]
enum RoleArg {
    /// Accept clients and forward to game nodes
    Gate,
    /// Serve forwarded calls
    Game,
}

impl From<RoleArg> for NodeRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Gate => NodeRole::Gate,
            RoleArg::Game => NodeRole::Game,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let role = NodeRole::from(args.role);
    let mut config = load_config(args.config.as_ref(), &config::default_config_path(), role)?;
    config.role = role;
    if let Some(listen) = args.listen {
        config.client_address = Some(listen);
    }
    if let Some(cluster) = args.cluster {
        config.cluster_address = cluster;
    }
    if let Some(ws_path) = args.ws_path {
        config.websocket_path = Some(ws_path);
    }
    config.validate().context("Invalid configuration")?;

    tracing::info!("nanogate {} node {} starting...", config.role, config.node_id);

    let state = Arc::new(match &config.handshake_token {
        Some(token) => {
            let validator: Arc<dyn HandshakeValidator> = Arc::new(TokenValidator::new(token.clone()));
            NodeState::with_validator(config.clone(), validator)
        }
        None => {
            tracing::warn!("No handshake token configured - every client will be accepted");
            NodeState::new(config.clone())
        }
    });

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    match role {
        NodeRole::Gate => run_gate(&state, &config, cancel).await?,
        NodeRole::Game => run_game(&state, &config, cancel).await?,
    }

    state.remotes.shutdown();
    tracing::info!("Node {} shutdown complete", config.node_id);
    Ok(())
}

/// Explicit path, else `default_path` if it exists, else built-in defaults.
/// A file that exists but does not parse is always an error.
fn load_config(path: Option<&PathBuf>, default_path: &Path, role: NodeRole) -> Result<NodeConfig> {
    if let Some(config_path) = path {
        return config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path));
    }

    if default_path.exists() {
        return config::load_config(default_path)
            .with_context(|| format!("Failed to load config from {:?}", default_path));
    }

    tracing::info!("Using default configuration");
    let mut config = NodeConfig::default();
    if role == NodeRole::Game {
        config.node_id = "game-1".to_string();
    }
    Ok(config)
}

async fn run_gate(state: &Arc<NodeState>, config: &NodeConfig, cancel: CancellationToken) -> Result<()> {
    // One link per backend node, however many services it serves
    let mut nodes: BTreeMap<String, String> = BTreeMap::new();
    for remote in &config.remotes {
        state
            .routes
            .bind_remote(remote.service.clone(), NodeId::new(remote.node.clone()));
        nodes.insert(remote.node.clone(), remote.address.clone());
        tracing::info!("{} -> {} ({})", remote.service, remote.node, remote.address);
    }

    if state.routes.resolve(GAME_SERVICE).is_none() {
        tracing::info!("Serving GameService locally");
        state.routes.bind_local(GAME_SERVICE, Arc::new(GameService));
    }

    for (node, address) in nodes {
        let connector = Connector {
            local: state.node_id.clone(),
            remote: NodeId::new(node),
            address,
            backoff: config.backoff.clone(),
        };
        connector.supervise(
            Arc::clone(&state.remotes),
            Arc::clone(&state.sessions),
            Arc::clone(&state.routes),
            cancel.clone(),
        );
    }
    tracing::info!("Routes: {}", state.routes.services().join(", "));

    let bind_addr = config
        .client_address
        .clone()
        .context("Gate needs a client address")?;
    ClientListener::new(Arc::clone(state), cancel)
        .run(&bind_addr)
        .await
}

async fn run_game(state: &Arc<NodeState>, config: &NodeConfig, cancel: CancellationToken) -> Result<()> {
    state.routes.bind_local(GAME_SERVICE, Arc::new(GameService));
    tracing::info!("Routes: {}", state.routes.services().join(", "));

    ClusterServer::new(Arc::clone(state), cancel)
        .run(&config.cluster_address)
        .await
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
