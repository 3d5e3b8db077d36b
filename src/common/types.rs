//! Identifiers shared by the coordinator and the application nodes

use serde::{Deserialize, Serialize};
use std::fmt;

/// A fleet member, identified by its `host:port` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self(endpoint.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base URL of the node's HTTP surface
    pub fn url(&self) -> String {
        if self.0.starts_with("http://") || self.0.starts_with("https://") {
            self.0.clone()
        } else {
            format!("http://{}", self.0)
        }
    }

    /// Port component of the endpoint, if it has one
    pub fn port(&self) -> Option<u16> {
        self.0.rsplit_once(':').and_then(|(_, p)| p.parse().ok())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque handle of a connected client session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Role a worker is started with. Informational: every node replicates to
/// every peer, primary/backup is just a fleet of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    #[default]
    Primary,
    Replica,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRole::Primary => write!(f, "primary"),
            WorkerRole::Replica => write!(f, "replica"),
        }
    }
}

impl std::str::FromStr for WorkerRole {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(WorkerRole::Primary),
            "replica" | "backup" => Ok(WorkerRole::Replica),
            other => Err(crate::Error::InvalidConfig(format!(
                "unknown worker role: {}",
                other
            ))),
        }
    }
}

/// How a snapshot is pushed to peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Sequential,
    #[default]
    Concurrent,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Sequential => write!(f, "sequential"),
            SyncMode::Concurrent => write!(f, "concurrent"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(SyncMode::Sequential),
            "concurrent" | "parallel" => Ok(SyncMode::Concurrent),
            other => Err(crate::Error::InvalidConfig(format!(
                "unknown sync mode: {}",
                other
            ))),
        }
    }
}
