//! Node implementation: wires the chain spec to the P2P server and logs
//! server events.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use ember_chain::ChainSpec;
use ember_network::{Capability, P2PServer, ServerConfig, ServerEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// The main node coordinating the networking stack.
pub struct Node {
    config: NodeConfig,
    chain: Arc<ChainSpec>,
    server: Arc<P2PServer>,
}

impl Node {
    /// Build a node from configuration.
    pub fn new(config: NodeConfig) -> Result<Arc<Self>> {
        let chain = Arc::new(
            ChainSpec::by_name(&config.network)
                .with_context(|| format!("unknown network '{}'", config.network))?,
        );

        let bootnodes = {
            let configured = config.parsed_bootnodes();
            if configured.is_empty() {
                chain.bootnodes().to_vec()
            } else {
                configured
            }
        };

        let server_config = ServerConfig {
            chain: Arc::clone(&chain),
            private_key: config.private_key_bytes()?,
            client_id: format!("{}/v{}", config.node_name, env!("CARGO_PKG_VERSION")),
            listen_port: config.p2p.listen_port,
            discovery_port: config.p2p.discovery_port,
            max_peers: config.p2p.max_peers,
            refresh_interval: Duration::from_millis(config.p2p.refresh_interval_ms),
            client_filter: config.p2p.client_filter.clone(),
            capabilities: vec![Capability::new("eth", 65)],
            bootnodes,
            ..Default::default()
        };
        let server = Arc::new(P2PServer::new(server_config).context("building p2p server")?);

        Ok(Arc::new(Self {
            config,
            chain,
            server,
        }))
    }

    /// Start the server and consume its events until shutdown.
    pub async fn run(&self) -> Result<()> {
        let mut events = self
            .server
            .take_events()
            .context("server events already taken")?;

        let started = self
            .server
            .start()
            .await
            .context("starting p2p server")?;
        anyhow::ensure!(started, "server was already started");

        let info = self.server.info();
        info!(
            network = %self.config.network,
            chain = %self.chain.name(),
            enode = info.enode.as_deref().unwrap_or("-"),
            "node started"
        );

        while let Some(event) = events.recv().await {
            match event {
                ServerEvent::Listening(listening) => {
                    info!(transport = %listening.transport, url = %listening.url, "listening");
                }
                ServerEvent::Connected(peer) => {
                    info!(
                        peer = %peer.id,
                        addr = %format!("{}:{}", peer.host, peer.port),
                        inbound = peer.inbound,
                        caps = peer.protocols.len(),
                        "peer connected"
                    );
                }
                ServerEvent::Disconnected { peer, reason } => {
                    info!(peer = %peer.id, reason = %reason, "peer disconnected");
                }
                ServerEvent::Error { error, peer } => match peer {
                    Some(peer) => warn!(peer = %peer.id, error = %error, "peer error"),
                    None => error!(error = %error, "server error"),
                },
            }
        }
        debug!("event stream ended");
        Ok(())
    }

    /// Stop the server.
    pub async fn shutdown(&self) {
        if self.server.stop().await {
            info!("node stopped");
        }
    }

    /// The P2P server.
    pub fn server(&self) -> &Arc<P2PServer> {
        &self.server
    }

    /// The resolved chain specification.
    pub fn chain(&self) -> &Arc<ChainSpec> {
        &self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> NodeConfig {
        let mut config = NodeConfig::default_for_network("mainnet");
        config.p2p.listen_port = 0;
        config.p2p.discovery_port = 0;
        config.p2p.bootnodes = vec![];
        config
    }

    #[tokio::test]
    async fn test_node_start_stop() {
        let node = Node::new(local_config()).unwrap();
        assert!(node.server().start().await.unwrap());
        assert!(node.server().info().enode.is_some());
        node.shutdown().await;
        assert!(!node.server().is_running());
    }

    #[test]
    fn test_unknown_network_is_error() {
        let mut config = local_config();
        config.network = "moonnet".to_string();
        assert!(Node::new(config).is_err());
    }
}
