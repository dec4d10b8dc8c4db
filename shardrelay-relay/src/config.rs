//! Configuration management for the ShardRelay relay
//!
//! Supports loading from TOML files, environment variables and CLI overrides.

use crate::node_client::NodeClientConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Complete relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// HTTP listener
    #[serde(default)]
    pub server: ServerSettings,

    /// Session protocol parameters
    #[serde(default)]
    pub session: SessionSettings,

    /// Backend nodes (forward mode)
    #[serde(default)]
    pub nodes: NodeSettings,
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// File (if given) then environment, validated
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nodes = self.session.node_count;
        if nodes == 0 || nodes > 255 {
            return Err(ConfigError::ValidationError(format!(
                "node_count must be in 1..=255, got {}",
                nodes
            )));
        }

        if !self.nodes.endpoints.is_empty() && self.nodes.endpoints.len() != nodes {
            return Err(ConfigError::ValidationError(format!(
                "{} node endpoints configured for node_count {}",
                self.nodes.endpoints.len(),
                nodes
            )));
        }

        // No built-in owner; local mode refuses to start without one
        if !self.is_forwarding() && self.session.owner_secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "owner_secret must be set (config or RELAY_OWNER_SECRET) in local mode".to_string(),
            ));
        }

        if self.nodes.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Override config with CLI arguments
    pub fn with_overrides(
        mut self,
        bind_address: Option<String>,
        port: Option<u16>,
        node_count: Option<usize>,
        endpoints: Option<Vec<String>>,
    ) -> Self {
        if let Some(addr) = bind_address {
            self.server.bind_address = addr;
        }
        if let Some(p) = port {
            self.server.port = p;
        }
        if let Some(n) = node_count {
            self.session.node_count = n;
        }
        if let Some(e) = endpoints {
            self.nodes.endpoints = e;
        }
        self
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = std::env::var("RELAY_BIND_ADDR") {
            self.server.bind_address = addr;
        }

        if let Ok(port) = std::env::var("RELAY_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(count) = std::env::var("RELAY_NODE_COUNT") {
            if let Ok(n) = count.parse() {
                self.session.node_count = n;
            }
        }

        if let Ok(secret) = std::env::var("RELAY_OWNER_SECRET") {
            self.session.owner_secret = secret;
        }

        // Comma-separated endpoint list
        if let Ok(nodes) = std::env::var("RELAY_NODES") {
            self.nodes.endpoints = parse_endpoints(&nodes);
        }

        if let Ok(timeout) = std::env::var("RELAY_NODE_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                self.nodes.request_timeout_secs = secs;
            }
        }

        self
    }

    /// Forward mode when backend endpoints are configured
    pub fn is_forwarding(&self) -> bool {
        !self.nodes.endpoints.is_empty()
    }
}

/// Split a comma-separated endpoint list, dropping blanks and trailing slashes
pub fn parse_endpoints(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().trim_end_matches('/'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_addr(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    /// Get the HTTP listen address
    pub fn http_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("bad listen address: {}", e)))
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Session protocol configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Number of storage nodes; key fans hold `node_count + 1` entries
    #[serde(default = "default_node_count")]
    pub node_count: usize,

    /// Root secret of the owner identity, provisioned at startup. Unset by
    /// default.
    #[serde(default)]
    pub owner_secret: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            node_count: default_node_count(),
            owner_secret: String::new(),
        }
    }
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("node_count", &self.node_count)
            .field("owner_secret", &"<redacted>")
            .finish()
    }
}

fn default_node_count() -> usize {
    3
}

/// Backend node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Base URLs, one per node, in node order. Empty runs the relay locally.
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Overall timeout of one node request in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl NodeSettings {
    pub fn node_client_config(&self) -> NodeClientConfig {
        NodeClientConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

fn default_request_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.node_count, 3);
        assert_eq!(config.nodes.request_timeout_secs, 300);
        assert!(!config.is_forwarding());
        assert!(config.session.owner_secret.is_empty());
    }

    #[test]
    fn test_local_mode_requires_owner_secret() {
        let mut config = RelayConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[server]\nport = 9000\n").unwrap();
        assert!(matches!(
            RelayConfig::from_file(file.path()).unwrap().validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.session.owner_secret = "owner code".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn test_forward_mode_needs_no_owner_secret() {
        let mut config = RelayConfig::default();
        config.nodes.endpoints = parse_endpoints("http://a,http://b,http://c");
        config.validate().unwrap();
    }

    #[test]
    fn test_config_from_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [server]
            port = 9000

            [session]
            node_count = 2
            owner_secret = "owner code"

            [nodes]
            endpoints = ["http://node-a:8000", "http://node-b:8000"]
            request_timeout_secs = 30
            "#
        )
        .unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.session.node_count, 2);
        assert_eq!(config.nodes.endpoints.len(), 2);
        assert!(config.is_forwarding());
        assert_eq!(
            config.nodes.node_client_config().request_timeout,
            Duration::from_secs(30)
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_load_validates() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[session]\nnode_count = 0\n").unwrap();
        assert!(matches!(
            RelayConfig::load(Some(file.path())),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            RelayConfig::from_file("/nonexistent/relay.toml"),
            Err(ConfigError::ReadError(_))
        ));
    }

    #[test]
    fn test_bad_toml() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[session]\nnode_count = \"three\"\n").unwrap();
        assert!(matches!(
            RelayConfig::from_file(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        let mut config = RelayConfig::default();
        config.session.owner_secret = "owner code".to_string();
        config.session.node_count = 0;
        assert!(config.validate().is_err());

        config.session.node_count = 256;
        assert!(config.validate().is_err());

        config.session.node_count = 3;
        config.nodes.endpoints = parse_endpoints("http://a,http://b");
        assert!(config.validate().is_err());

        config.nodes.endpoints.clear();
        config.session.owner_secret.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let config = RelayConfig::default().with_overrides(
            Some("127.0.0.1".to_string()),
            Some(7000),
            Some(1),
            Some(vec!["http://only".to_string()]),
        );
        assert_eq!(
            config.server.http_addr().unwrap(),
            "127.0.0.1:7000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.session.node_count, 1);
        assert!(config.is_forwarding());
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_endpoints() {
        assert_eq!(
            parse_endpoints(" http://a:1/ ,, http://b:2"),
            vec!["http://a:1".to_string(), "http://b:2".to_string()]
        );
        assert!(parse_endpoints("").is_empty());
    }

    #[test]
    fn test_owner_secret_not_in_debug() {
        let mut config = RelayConfig::default();
        config.session.owner_secret = "hunter2-owner".to_string();
        assert!(!format!("{:?}", config).contains("hunter2-owner"));
    }
}
