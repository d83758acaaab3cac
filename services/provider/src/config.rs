//! Provider configuration (TOML)

use std::net::SocketAddr;
use std::path::PathBuf;

use emberplus_network::TcpServerConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level provider configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub server: ServerSection,
    /// JSON tree definition; a built-in sample tree is served when absent
    pub tree: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind_address: SocketAddr,
    pub outbound_queue_depth: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        let defaults = TcpServerConfig::default();
        Self {
            bind_address: defaults.bind_address,
            outbound_queue_depth: defaults.outbound_queue_depth,
        }
    }
}

impl ProviderConfig {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn tcp(&self) -> TcpServerConfig {
        TcpServerConfig {
            bind_address: self.server.bind_address,
            outbound_queue_depth: self.server.outbound_queue_depth,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_transport_defaults() {
        let config = ProviderConfig::default();
        let defaults = TcpServerConfig::default();
        assert_eq!(config.server.bind_address, defaults.bind_address);
        assert!(config.tree.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let config: ProviderConfig = toml::from_str(
            r#"
            tree = "tree.json"

            [server]
            bind_address = "127.0.0.1:9092"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9092".parse().unwrap());
        assert_eq!(config.tree, Some(PathBuf::from("tree.json")));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(toml::from_str::<ProviderConfig>("bogus = 1").is_err());
    }
}
