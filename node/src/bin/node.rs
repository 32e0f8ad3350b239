use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use node::{ConsistencyMode, NodeState};

/// Peer-to-peer file-sharing overlay node.
#[derive(Parser, Debug)]
#[command(name = "node", version, about = "Overlay file-sharing node with flooding routing and cache consistency")]
struct Args {
    /// This node's id in the configuration file's directory
    #[arg(default_value_t = 0)]
    node_id: u32,

    /// Cache-consistency protocol to run
    #[arg(value_enum, default_value_t = ConsistencyMode::Push)]
    mode: ConsistencyMode,

    /// Path to the configuration file (spec.md §6)
    #[arg(long, default_value = "config")]
    config: PathBuf,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    common::logging::init(args.verbose);

    let config = common::config::load(&args.config, args.node_id)
        .with_context(|| "loading configuration")?;
    let listen_addr = config
        .directory
        .get(&args.node_id)
        .map(|d| d.addr())
        .ok_or_else(|| anyhow::anyhow!("node id {} not present in the directory", args.node_id))?;
    let neighbors = config.neighbors.clone();

    let (event_tx, event_rx) = tokio::sync::mpsc::channel(256);
    let mut state = NodeState::new(args.node_id, args.mode, config, std::env::current_dir()?, event_tx);
    state.connect_to_neighbors(&neighbors).await;

    if let Err(e) = node::runtime::run(state, listen_addr, event_rx).await {
        tracing::error!(error = %e, "node terminated with error");
        std::process::exit(1);
    }
    Ok(())
}
