//! Coordinator binary

use clap::{Parser, Subcommand};
use fleetlb::common::{parse_duration, Config, CoordinatorConfig, LauncherKind};
use fleetlb::Coordinator;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fleetlb-coord")]
#[command(about = "fleetlb coordinator: membership, health monitoring and autoscaling")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Workers to register at startup (comma-separated host:port)
        #[arg(long = "node", value_delimiter = ',')]
        nodes: Vec<String>,

        /// Load above which a node is scaled up
        #[arg(long)]
        threshold: Option<u32>,

        /// Monitor interval (e.g. 5s, 500ms)
        #[arg(long)]
        interval: Option<String>,

        /// Idle time before a node is retired (e.g. 10s)
        #[arg(long)]
        idle_delay: Option<String>,

        /// Per-peer snapshot fan-out timeout (e.g. 5s)
        #[arg(long)]
        fanout_timeout: Option<String>,

        /// Only wait for operator-started workers instead of spawning them
        #[arg(long)]
        attach: bool,

        /// Path of the fleetlb-node binary
        #[arg(long)]
        node_binary: Option<PathBuf>,

        /// Append fleet events to this JSON-lines file
        #[arg(long)]
        event_log: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config from file and environment, then override with CLI arguments
    let config = Config::load_or_default();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            nodes,
            threshold,
            interval,
            idle_delay,
            fanout_timeout,
            attach,
            node_binary,
            event_log,
        } => {
            let mut coord_config: CoordinatorConfig = config.coordinator.unwrap_or_default();

            if let Some(bind) = bind {
                coord_config.bind_addr = bind;
            }
            if !nodes.is_empty() {
                coord_config.initial_nodes = nodes;
            }
            if let Some(threshold) = threshold {
                coord_config.load_threshold = threshold;
            }
            if let Some(interval) = interval {
                coord_config.monitor_interval_ms = parse_duration(&interval)?.as_millis() as u64;
            }
            if let Some(delay) = idle_delay {
                coord_config.idle_delay_ms = parse_duration(&delay)?.as_millis() as u64;
            }
            if let Some(timeout) = fanout_timeout {
                coord_config.fanout_timeout_ms = parse_duration(&timeout)?.as_millis() as u64;
            }
            if attach {
                coord_config.launcher.kind = LauncherKind::Attach;
            }
            if let Some(binary) = node_binary {
                coord_config.launcher.node_binary = binary;
            }
            if event_log.is_some() {
                coord_config.event_log_path = event_log;
            }

            Coordinator::new(coord_config).serve().await?;
        }
    }

    Ok(())
}
