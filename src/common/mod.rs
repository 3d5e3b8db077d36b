//! Common utilities and types shared across fleetlb

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod tracing_middleware;
pub mod types;
pub mod utils;

pub use config::{Config, CoordinatorConfig, LauncherConfig, LauncherKind, NodeConfig};
pub use error::{Error, Result};
pub use events::{EventLog, FleetEvent, FleetEventKind};
pub use metrics::FleetMetrics;
pub use types::{ClientId, NodeId, SyncMode, WorkerRole};
pub use utils::{parse_duration, retry_with_backoff, validate_endpoint};
