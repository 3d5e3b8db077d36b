//! CLI for fleet operations

use clap::{Parser, Subcommand};
use fleetlb::common::{ClientId, NodeId, SyncMode};
use fleetlb::node::CoordinatorClient;
use fleetlb::replication::Snapshot;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "fleetlb")]
#[command(about = "fleetlb coordinator CLI")]
#[command(version)]
struct Cli {
    /// Coordinator URL
    #[arg(long, default_value = "http://localhost:5000")]
    coordinator: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a node (starts its worker)
    Register {
        /// host:port
        endpoint: String,

        /// Initial load
        #[arg(long, default_value = "0")]
        load: u32,
    },

    /// Report a node's load
    UpdateLoad { endpoint: String, load: u32 },

    /// Show every node's load
    Nodes,

    /// Show the node new clients should go to
    LeastLoaded,

    /// Route a client to a node
    AddClient { client: String, endpoint: String },

    /// Drop a client session
    RemoveClient { client: String },

    /// Show which node serves a client
    Route { client: String },

    /// Push a snapshot file to every node except the origin
    Sync {
        /// Node the snapshot comes from
        #[arg(long)]
        origin: String,

        /// JSON snapshot file
        #[arg(long)]
        file: std::path::PathBuf,

        #[arg(long, default_value = "concurrent")]
        mode: SyncMode,
    },

    /// Append a line to the coordinator's event log
    Log { message: String },

    /// Show recent fleet events
    Events {
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Coordinator health summary
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = CoordinatorClient::new(&cli.coordinator, Duration::from_secs(cli.timeout))?;

    match cli.command {
        Commands::Register { endpoint, load } => {
            client.register(&NodeId::new(endpoint.clone()), load).await?;
            println!("Registered {} (load {})", endpoint, load);
        }

        Commands::UpdateLoad { endpoint, load } => {
            client.update_load(&NodeId::new(endpoint), load).await?;
            println!("OK");
        }

        Commands::Nodes => {
            let loads = client.loads().await?;
            if loads.is_empty() {
                println!("No nodes registered");
            }
            for (node, load) in loads {
                println!("{:<24} {}", node, load);
            }
        }

        Commands::LeastLoaded => match client.least_loaded().await? {
            Some(node) => println!("{}", node),
            None => println!("No node available"),
        },

        Commands::AddClient { client: id, endpoint } => {
            client
                .add_client(&ClientId::new(id.clone()), &NodeId::new(endpoint.clone()))
                .await?;
            println!("{} -> {}", id, endpoint);
        }

        Commands::RemoveClient { client: id } => {
            client.remove_client(&ClientId::new(id.clone())).await?;
            println!("Removed {}", id);
        }

        Commands::Route { client: id } => {
            let node = client.client_of(&ClientId::new(id.clone())).await?;
            println!("{} -> {}", id, node);
        }

        Commands::Sync { origin, file, mode } => {
            let raw = tokio::fs::read(&file).await?;
            let snapshot: Snapshot = serde_json::from_slice(&raw)?;
            let report = client.sync(&NodeId::new(origin), &snapshot, mode).await?;
            println!("Replication report ({}, {} ms):", report.mode, report.elapsed_ms);
            println!("  Delivered: {}", report.delivered.len());
            for failure in &report.failed {
                println!("  Failed: {} ({})", failure.peer, failure.reason);
            }
        }

        Commands::Log { message } => {
            client.log(None, &message).await?;
        }

        Commands::Events { limit } => {
            for event in client.events(limit).await? {
                println!(
                    "{} {:?} {} {}",
                    event.timestamp.to_rfc3339(),
                    event.kind,
                    event.node.as_deref().unwrap_or("-"),
                    event.message
                );
            }
        }

        Commands::Health => {
            let health = client.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
    }

    Ok(())
}
