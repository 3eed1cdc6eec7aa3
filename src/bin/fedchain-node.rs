#![forbid(unsafe_code)]
//! Federated consensus node

use clap::Parser;
use fedchain::config::load_config;
use fedchain::node::{Node, NodeChannels};
use fedchain::queues::QueueReceivers;
use std::path::PathBuf;
use tracing::{debug, info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "fedchain-node", version, about = "Run a federated consensus node")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "fedchain.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let level = config.node.log_level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
    info!("Loaded configuration from {}", cli.config.display());

    let (node, channels) = Node::init(config)?;
    let NodeChannels { inbound, outbound } = channels;
    let QueueReceivers {
        out: mut outbound_rx,
        invalid: mut invalid_rx,
    } = outbound;

    // No peer transport is wired in; outbound traffic is only logged.
    let _out_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            debug!(msg = %msg, dbheight = ?msg.db_height(), "outbound");
        }
    });
    let _invalid_task = tokio::spawn(async move {
        while let Some(msg) = invalid_rx.recv().await {
            warn!(msg = %msg, origin = ?msg.base().origin, "rejected message");
        }
    });

    // held open for the lifetime of the node
    let _inbound = inbound;
    node.run().await?;
    Ok(())
}
