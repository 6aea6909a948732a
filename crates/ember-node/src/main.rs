//! Ember Node - networking and header-consensus node.
//!
//! This is the main entry point for the ember-node binary.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod node;

use config::NodeConfig;
use node::Node;

/// Ember blockchain node.
#[derive(Parser, Debug)]
#[command(name = "ember-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ember-node.toml")]
    config: PathBuf,

    /// Network to connect to
    #[arg(short, long, default_value = "mainnet")]
    network: String,

    /// P2P listen port
    #[arg(long)]
    port: Option<u16>,

    /// UDP discovery port (0 disables discovery)
    #[arg(long)]
    discovery_port: Option<u16>,

    /// Maximum number of peers
    #[arg(long)]
    max_peers: Option<usize>,

    /// Bootnodes as host:port, overriding the chain defaults
    #[arg(long)]
    bootnodes: Vec<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Ember Node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::load(&args.config, &args)?;
    info!("Network: {}", config.network);
    info!("P2P port: {}", config.p2p.listen_port);
    info!("Discovery port: {}", config.p2p.discovery_port);

    let node = Node::new(config)?;

    let node_handle = std::sync::Arc::clone(&node);
    let shutdown_signal = async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        node_handle.shutdown().await;
    };

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!("Node error: {}", e);
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown complete");
        }
    }

    info!("Ember node stopped");
    Ok(())
}
