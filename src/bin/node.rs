//! Application node binary
//!
//! Normally spawned by the coordinator's process launcher with
//! `--bind`, `--coordinator` and `--role`.

use anyhow::Result;
use clap::Parser;
use fleetlb::common::{parse_duration, Config, NodeConfig, SyncMode, WorkerRole};
use fleetlb::NodeServer;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fleetlb-node")]
#[command(about = "fleetlb application node")]
#[command(version)]
struct Args {
    /// Address to listen on; also the node's fleet identity
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Coordinator URL
    #[arg(short, long)]
    coordinator: Option<String>,

    /// Worker role (primary, replica)
    #[arg(long)]
    role: Option<WorkerRole>,

    /// Snapshot fan-out strategy (sequential, concurrent)
    #[arg(long)]
    sync: Option<SyncMode>,

    /// Send snapshots through the coordinator instead of to peers directly
    #[arg(long)]
    relay: bool,

    /// Load report interval (e.g. 5s)
    #[arg(long)]
    heartbeat: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load_or_default();

    let level = args.log_level.clone().unwrap_or(config.log_level.clone());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut node_config: NodeConfig = config.node.unwrap_or_default();
    if let Some(bind) = args.bind {
        node_config.bind_addr = bind;
        node_config.advertise = None;
    }
    if let Some(url) = args.coordinator {
        node_config.coordinator_url = url;
    }
    if let Some(role) = args.role {
        node_config.role = role;
    }
    if let Some(mode) = args.sync {
        node_config.sync_mode = mode;
    }
    if args.relay {
        node_config.relay_via_coordinator = true;
    }
    if let Some(heartbeat) = args.heartbeat {
        node_config.heartbeat_interval_ms = parse_duration(&heartbeat)?.as_millis() as u64;
    }

    NodeServer::new(node_config).serve().await?;
    Ok(())
}
