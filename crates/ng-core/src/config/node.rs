//! Node configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::types::NodeRole;

/// Configuration for a gate or game node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identifier announced to other nodes
    pub node_id: String,

    /// Role of this node
    pub role: NodeRole,

    /// Address clients connect to (gate only)
    pub client_address: Option<String>,

    /// Serve clients over WebSocket at this path instead of raw TCP
    pub websocket_path: Option<String>,

    /// Address other nodes connect to for forwarded calls
    pub cluster_address: String,

    /// Interval between server heartbeats once a session is working
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// How long a session may stay silent before it is closed
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,

    /// Upper bound on how long a forwarded request may stay pending
    #[serde(with = "duration_secs")]
    pub forward_timeout: Duration,

    /// Maximum pending requests per session
    pub max_pending: usize,

    /// Token required in the client handshake (`{"auth":{"token":...}}`).
    /// No token means every handshake is accepted.
    pub handshake_token: Option<String>,

    /// Backoff configuration for connecting to remote nodes
    pub backoff: BackoffConfig,

    /// Services served by remote nodes
    pub remotes: Vec<RemoteBinding>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "gate-1".to_string(),
            role: NodeRole::Gate,
            client_address: Some("127.0.0.1:34590".to_string()),
            websocket_path: None,
            cluster_address: "127.0.0.1:34569".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            forward_timeout: Duration::from_secs(10),
            max_pending: 256,
            handshake_token: None,
            backoff: BackoffConfig::default(),
            remotes: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Check that the configuration is internally consistent
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::MissingField("node_id".into()));
        }
        if self.role == NodeRole::Gate && self.client_address.is_none() {
            return Err(ConfigError::MissingField("client_address".into()));
        }
        if let Some(path) = &self.websocket_path {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "websocket_path {:?} must start with '/'",
                    path
                )));
            }
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid("heartbeat_interval must be > 0".into()));
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout must be longer than heartbeat_interval".into(),
            ));
        }
        if self.forward_timeout.is_zero() {
            return Err(ConfigError::Invalid("forward_timeout must be > 0".into()));
        }
        if self.max_pending == 0 {
            return Err(ConfigError::Invalid("max_pending must be > 0".into()));
        }
        for remote in &self.remotes {
            if remote.service.is_empty() || remote.service.contains('.') {
                return Err(ConfigError::Invalid(format!(
                    "invalid remote service name {:?}",
                    remote.service
                )));
            }
        }
        Ok(())
    }
}

/// A service served by another node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBinding {
    /// Service name (the part of a route before the dot)
    pub service: String,
    /// Node serving it
    pub node: String,
    /// That node's cluster address
    pub address: String,
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,

    /// Attempts before giving up on a remote node
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
            max_attempts: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        NodeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_parse_gate_config() {
        let toml = r#"
            node_id = "gate-7"
            role = "gate"
            client_address = "0.0.0.0:34590"
            forward_timeout = 3

            [[remotes]]
            service = "GameService"
            node = "game-1"
            address = "127.0.0.1:34568"
        "#;

        let config: NodeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.node_id, "gate-7");
        assert_eq!(config.forward_timeout, Duration::from_secs(3));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.remotes.len(), 1);
        assert_eq!(config.remotes[0].service, "GameService");
        config.validate().unwrap();
    }

    #[test]
    fn test_game_without_client_address() {
        let config = NodeConfig {
            role: NodeRole::Game,
            client_address: None,
            ..NodeConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_gate_requires_client_address() {
        let config = NodeConfig {
            client_address: None,
            ..NodeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(field)) if field == "client_address"
        ));
    }

    #[test]
    fn test_websocket_path_must_be_absolute() {
        let config: NodeConfig = toml::from_str(r#"websocket_path = "/nano""#).unwrap();
        assert_eq!(config.websocket_path.as_deref(), Some("/nano"));
        config.validate().unwrap();

        let config = NodeConfig {
            websocket_path: Some("nano".into()),
            ..NodeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_heartbeat_timeout_must_exceed_interval() {
        let config = NodeConfig {
            heartbeat_timeout: Duration::from_secs(30),
            ..NodeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_remote_service_with_dot_rejected() {
        let config = NodeConfig {
            remotes: vec![RemoteBinding {
                service: "GameService.Hello".into(),
                node: "game-1".into(),
                address: "127.0.0.1:1".into(),
            }],
            ..NodeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
