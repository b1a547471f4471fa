// src/main.rs

//! Braid node binary entry point.

use anyhow::{bail, Context};
use braid_node::{BraidNode, NodeConfig};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "braid-node", version, about = "Braid BlockDAG RPC node")]
struct Args {
    /// Path to a JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// RPC listen address, overrides the configuration
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log filter, overrides the configuration (RUST_LOG wins over both)
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.network.listen_addr = listen;
    }
    if let Some(filter) = args.log_filter {
        config.log_filter = filter;
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("🚀 Braid BlockDAG Node");
    tracing::info!("Version: {}", braid_node::NODE_VERSION);

    let node = BraidNode::new(config)?;
    let reason = node.run().await?;

    if reason.is_fatal() {
        bail!("node stopped: {}", reason);
    }
    Ok(())
}
