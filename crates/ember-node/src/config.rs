//! Node configuration.

use crate::Args;
use anyhow::{Context, Result};
use ember_chain::BootnodeEndpoint;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name advertised to peers.
    pub node_name: String,
    /// Network (mainnet, poanet).
    pub network: String,
    /// P2P configuration.
    #[serde(default)]
    pub p2p: P2pConfig,
}

/// P2P section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    /// TCP listen port.
    pub listen_port: u16,
    /// UDP discovery port; 0 disables discovery.
    pub discovery_port: u16,
    /// Maximum concurrent peers.
    pub max_peers: usize,
    /// Discovery refresh interval in milliseconds.
    pub refresh_interval_ms: u64,
    /// Allow-list of remote client-id substrings; empty allows all.
    #[serde(default)]
    pub client_filter: Vec<String>,
    /// Bootnode overrides; empty uses the chain's defaults.
    #[serde(default)]
    pub bootnodes: Vec<String>,
    /// Hex-encoded 32-byte node secret; generated when absent.
    pub private_key: Option<String>,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_port: ember_chain::DEFAULT_PORT,
            discovery_port: ember_chain::DEFAULT_PORT,
            max_peers: 25,
            refresh_interval_ms: 30_000,
            client_filter: Vec::new(),
            bootnodes: Vec::new(),
            private_key: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default_for_network(&args.network)
        };

        config.network = args.network.clone();

        // Only override when explicitly provided via CLI.
        if let Some(port) = args.port {
            config.p2p.listen_port = port;
        }
        if let Some(port) = args.discovery_port {
            config.p2p.discovery_port = port;
        }
        if let Some(max_peers) = args.max_peers {
            config.p2p.max_peers = max_peers;
        }
        if !args.bootnodes.is_empty() {
            config.p2p.bootnodes = args.bootnodes.clone();
        }

        Ok(config)
    }

    /// Create default config for a network.
    pub fn default_for_network(network: &str) -> Self {
        Self {
            node_name: "ember-node".to_string(),
            network: network.to_string(),
            p2p: P2pConfig::default(),
        }
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parse the configured bootnode strings (`host:port` with an optional
    /// `tcp` port after a second colon being the same).
    pub fn parsed_bootnodes(&self) -> Vec<BootnodeEndpoint> {
        self.p2p
            .bootnodes
            .iter()
            .filter_map(|entry| {
                let (address, port) = entry.rsplit_once(':')?;
                let port: u16 = port.parse().ok()?;
                Some(BootnodeEndpoint {
                    address: address.to_string(),
                    udp_port: port,
                    tcp_port: port,
                })
            })
            .collect()
    }

    /// Decode the optional hex private key.
    pub fn private_key_bytes(&self) -> Result<Option<[u8; 32]>> {
        match &self.p2p.private_key {
            None => Ok(None),
            Some(hex_key) => {
                let stripped = hex_key.strip_prefix("0x").unwrap_or(hex_key);
                let bytes = hex::decode(stripped).context("private key is not valid hex")?;
                let key: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("private key must be 32 bytes"))?;
                Ok(Some(key))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_args() -> Args {
        Args {
            config: "ember-node.toml".into(),
            network: "mainnet".to_string(),
            port: None,
            discovery_port: None,
            max_peers: None,
            bootnodes: vec![],
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default_for_network("mainnet");
        assert_eq!(config.network, "mainnet");
        assert_eq!(config.p2p.listen_port, 30303);
        assert_eq!(config.p2p.max_peers, 25);
    }

    #[test]
    fn test_cli_overrides() {
        let mut args = default_args();
        args.port = Some(40404);
        args.max_peers = Some(5);
        args.bootnodes = vec!["10.0.0.1:30303".to_string()];

        let config = NodeConfig::load(Path::new("/nonexistent.toml"), &args).unwrap();
        assert_eq!(config.p2p.listen_port, 40404);
        assert_eq!(config.p2p.max_peers, 5);
        assert_eq!(config.p2p.bootnodes.len(), 1);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");

        let mut config = NodeConfig::default_for_network("poanet");
        config.p2p.client_filter = vec!["ember".to_string()];
        config.save(&path).unwrap();

        let mut args = default_args();
        args.network = "poanet".to_string();
        let loaded = NodeConfig::load(&path, &args).unwrap();
        assert_eq!(loaded.network, "poanet");
        assert_eq!(loaded.p2p.client_filter, vec!["ember".to_string()]);
    }

    #[test]
    fn test_parsed_bootnodes() {
        let mut config = NodeConfig::default_for_network("mainnet");
        config.p2p.bootnodes = vec![
            "18.138.108.67:30303".to_string(),
            "not-a-bootnode".to_string(),
        ];
        let parsed = config.parsed_bootnodes();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].address, "18.138.108.67");
        assert_eq!(parsed[0].udp_port, 30303);
    }

    #[test]
    fn test_private_key_parsing() {
        let mut config = NodeConfig::default_for_network("mainnet");
        assert!(config.private_key_bytes().unwrap().is_none());

        config.p2p.private_key = Some(format!("0x{}", "17".repeat(32)));
        let key = config.private_key_bytes().unwrap().unwrap();
        assert_eq!(key, [0x17u8; 32]);

        config.p2p.private_key = Some("zz".to_string());
        assert!(config.private_key_bytes().is_err());
    }
}
