//! # fleetlb
//!
//! Coordinator for a self-managed fleet of stateful messaging servers:
//! - Membership and client routing with least-loaded placement
//! - Heartbeat failure detection with client reassignment
//! - Threshold autoscaling (spawn on overload, retire when idle)
//! - Best-effort full-snapshot replication between application nodes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Coordinator                │
//! │  membership · routing · monitor         │
//! │  autoscaler · worker launcher           │
//! └───────────┬─────────────────────────────┘
//!             │ HTTP/JSON (ping, load, shutdown)
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌───▼────────┐
//! │ Node A     │◄─►│ Node B     │◄─►│ Node C     │
//! │ (primary)  │   │ (replica)  │   │ (replica)  │
//! └────────────┘   └────────────┘   └────────────┘
//!        snapshot fan-out after every write
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! fleetlb-coord serve \
//!   --bind 127.0.0.1:5000 \
//!   --node 127.0.0.1:7001 \
//!   --threshold 4
//! ```
//!
//! ### Start a node by hand (attach launcher)
//! ```bash
//! fleetlb-node --bind 127.0.0.1:7001 --coordinator http://127.0.0.1:5000
//! ```
//!
//! ### Use the CLI
//! ```bash
//! fleetlb nodes
//! fleetlb add-client alice 127.0.0.1:7001
//! fleetlb least-loaded
//! fleetlb events --limit 20
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod coordinator;
pub mod node;
pub mod replication;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;
pub use node::NodeServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
