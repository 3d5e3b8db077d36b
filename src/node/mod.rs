//! Application node
//!
//! Hosts the worker-side surface the coordinator drives (ping, snapshot,
//! load counters, shutdown), keeps the replicated state and pushes it to
//! its peers after every local write.

pub mod client;
pub mod coordinator_client;
pub mod heartbeat;
pub mod http;
pub mod server;
pub mod state;
pub mod sync;

pub use client::{HttpNodeClient, NodeClient};
pub use coordinator_client::CoordinatorClient;
pub use server::NodeServer;
pub use state::NodeState;
pub use sync::StateSync;
