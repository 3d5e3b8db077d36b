//! Configuration for fleetlb components

use crate::common::{Result, SyncMode, WorkerRole};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Env var naming an explicit config file
pub const CONFIG_ENV: &str = "FLEETLB_CONFIG";

/// Config file picked up from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "fleetlb.toml";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-specific config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Application node config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load from the optional TOML file and `FLEETLB__*` environment variables.
    ///
    /// `FLEETLB__COORDINATOR__LOAD_THRESHOLD=4` overrides
    /// `coordinator.load_threshold`.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                config::Environment::with_prefix("FLEETLB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Like [`Config::load`], but a broken file only produces a warning
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring configuration: {}", e);
                Self::default()
            }
        }
    }
}

/// How the coordinator brings workers up and down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LauncherKind {
    /// Spawn `fleetlb-node` child processes
    #[default]
    Process,
    /// Workers are started by an operator; only wait for them
    Attach,
}

/// Worker lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default)]
    pub kind: LauncherKind,

    /// Path of the node binary
    #[serde(default = "default_node_binary")]
    pub node_binary: PathBuf,

    /// Host new endpoints are allocated on
    #[serde(default = "default_worker_host")]
    pub host: String,

    /// How long a new worker has to answer its first ping
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,
}

fn default_node_binary() -> PathBuf {
    PathBuf::from("fleetlb-node")
}
fn default_worker_host() -> String {
    "127.0.0.1".to_string()
}
fn default_startup_timeout() -> u64 {
    10_000
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            kind: LauncherKind::default(),
            node_binary: default_node_binary(),
            host: default_worker_host(),
            startup_timeout_ms: default_startup_timeout(),
        }
    }
}

impl LauncherConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_coord_bind")]
    pub bind_addr: SocketAddr,

    /// URL workers use to reach the coordinator (derived from `bind_addr` if unset)
    #[serde(default)]
    pub advertise_url: Option<String>,

    /// Workers registered at startup
    #[serde(default)]
    pub initial_nodes: Vec<String>,

    /// Health monitor / autoscaler tick
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_ms: u64,

    /// Load above which a node triggers scale-up
    #[serde(default = "default_load_threshold")]
    pub load_threshold: u32,

    /// Idle time before a node with no clients is retired
    #[serde(default = "default_idle_delay")]
    pub idle_delay_ms: u64,

    /// Per-peer timeout of a concurrent snapshot fan-out
    #[serde(default = "default_fanout_timeout")]
    pub fanout_timeout_ms: u64,

    /// Liveness probe timeout
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Bound on acquiring the membership/routing locks
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Optional JSON-lines file the fleet event log is appended to
    #[serde(default)]
    pub event_log_path: Option<PathBuf>,

    #[serde(default)]
    pub launcher: LauncherConfig,
}

fn default_coord_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}
fn default_monitor_interval() -> u64 {
    5_000
}
fn default_load_threshold() -> u32 {
    1
}
fn default_idle_delay() -> u64 {
    10_000
}
fn default_fanout_timeout() -> u64 {
    5_000
}
fn default_probe_timeout() -> u64 {
    2_000
}
fn default_lock_timeout() -> u64 {
    1_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_coord_bind(),
            advertise_url: None,
            initial_nodes: Vec::new(),
            monitor_interval_ms: default_monitor_interval(),
            load_threshold: default_load_threshold(),
            idle_delay_ms: default_idle_delay(),
            fanout_timeout_ms: default_fanout_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            lock_timeout_ms: default_lock_timeout(),
            event_log_path: None,
            launcher: LauncherConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn fanout_timeout(&self) -> Duration {
        Duration::from_millis(self.fanout_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// URL handed to spawned workers
    pub fn coordinator_url(&self) -> String {
        if let Some(url) = &self.advertise_url {
            return url.clone();
        }
        let addr = if self.bind_addr.ip().is_unspecified() {
            SocketAddr::from(([127, 0, 0, 1], self.bind_addr.port()))
        } else {
            self.bind_addr
        };
        format!("http://{}", addr)
    }

    /// Reject values the monitor cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.monitor_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "monitor_interval_ms must be > 0".into(),
            ));
        }
        if self.load_threshold == 0 {
            return Err(crate::Error::InvalidConfig(
                "load_threshold must be > 0".into(),
            ));
        }
        if self.fanout_timeout_ms == 0 || self.probe_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "timeouts must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Application node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Bind address of the worker surface
    #[serde(default = "default_node_bind")]
    pub bind_addr: SocketAddr,

    /// Endpoint this node is known by in the fleet (defaults to `bind_addr`)
    #[serde(default)]
    pub advertise: Option<String>,

    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,

    #[serde(default)]
    pub role: WorkerRole,

    /// Fan-out strategy used after local writes
    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Push snapshots through the coordinator's `SyncState` instead of
    /// contacting peers directly
    #[serde(default)]
    pub relay_via_coordinator: bool,

    #[serde(default = "default_fanout_timeout")]
    pub fanout_timeout_ms: u64,

    /// Load report interval
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Timeout of calls to the coordinator
    #[serde(default = "default_probe_timeout")]
    pub request_timeout_ms: u64,
}

fn default_node_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7000))
}
fn default_coordinator_url() -> String {
    "http://127.0.0.1:5000".to_string()
}
fn default_heartbeat_interval() -> u64 {
    5_000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_node_bind(),
            advertise: None,
            coordinator_url: default_coordinator_url(),
            role: WorkerRole::default(),
            sync_mode: SyncMode::default(),
            relay_via_coordinator: false,
            fanout_timeout_ms: default_fanout_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            request_timeout_ms: default_probe_timeout(),
        }
    }
}

impl NodeConfig {
    pub fn fanout_timeout(&self) -> Duration {
        Duration::from_millis(self.fanout_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Fleet identity of this node
    pub fn endpoint(&self) -> String {
        self.advertise
            .clone()
            .unwrap_or_else(|| self.bind_addr.to_string())
    }
}
