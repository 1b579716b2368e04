#![warn(missing_docs)]

//! KeelFS namenode daemon.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use keelfs_namenode::{Namenode, NamenodeConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// KeelFS namenode: the cluster's metadata authority.
#[derive(Parser, Debug)]
#[command(name = "kfs-namenode", version, about)]
struct Cli {
    /// Path to a .toml or .json config file.
    #[arg(short, long, default_value = "/etc/keelfs/namenode.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        NamenodeConfig::from_file(&cli.config)?
    } else {
        tracing::warn!(
            "Config file not found, using defaults: {}",
            cli.config.display()
        );
        NamenodeConfig::default()
    };

    tracing::info!(node = config.node_id, "KeelFS namenode starting...");
    let namenode = Namenode::start(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    namenode.shutdown();
    Ok(())
}
