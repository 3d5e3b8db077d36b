//! Cluster coordinator
//!
//! The coordinator is responsible for:
//! - Membership (node → load) and client routing (client → node)
//! - Health monitoring and eviction of unresponsive nodes
//! - Threshold autoscaling through a pluggable worker launcher
//! - Relaying snapshots for nodes that sync through it

pub mod autoscaler;
pub mod fleet;
pub mod http;
pub mod launcher;
pub mod membership;
pub mod monitor;
pub mod notifier;
pub mod routing;
pub mod server;
pub mod service;

pub use autoscaler::{Autoscaler, ScaleReport};
pub use fleet::Fleet;
pub use launcher::{AttachLauncher, ProcessLauncher, WorkerLauncher};
pub use monitor::{HealthMonitor, ProbeReport};
pub use server::Coordinator;
pub use service::CoordinatorService;
