//! Client for the worker-side surface
//!
//! Used by the coordinator (probes, load notifications, shutdown) and by the
//! snapshot fan-out. The trait is the seam tests replace with in-process fakes.

use crate::common::{Error, NodeId, Result};
use crate::replication::Snapshot;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Liveness probe, no side effects
    async fn ping(&self, node: &NodeId) -> Result<()>;

    /// Replace the node's replicated state with `snapshot`
    async fn apply_snapshot(&self, node: &NodeId, snapshot: &Snapshot) -> Result<()>;

    async fn increment_load(&self, node: &NodeId) -> Result<()>;

    async fn decrement_load(&self, node: &NodeId) -> Result<()>;

    /// Ask the node to exit; does not wait for it
    async fn shutdown(&self, node: &NodeId) -> Result<()>;
}

/// HTTP/JSON implementation
#[derive(Clone)]
pub struct HttpNodeClient {
    http: reqwest::Client,
    probe_timeout: Duration,
}

impl HttpNodeClient {
    /// `request_timeout` bounds every call, `probe_timeout` bounds pings
    pub fn new(request_timeout: Duration, probe_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(probe_timeout)
            .build()?;
        Ok(Self {
            http,
            probe_timeout,
        })
    }

    async fn post_empty(&self, node: &NodeId, path: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}{}", node.url(), path))
            .send()
            .await
            .map_err(|e| unreachable(node, e))?;
        check_status(node, path, resp)
    }
}

fn unreachable(node: &NodeId, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("{}: {}", node, e))
    } else {
        Error::NodeUnreachable {
            node: node.to_string(),
            reason: e.to_string(),
        }
    }
}

fn check_status(node: &NodeId, path: &str, resp: reqwest::Response) -> Result<()> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(Error::Http(format!(
            "{}{} returned {}",
            node,
            path,
            resp.status()
        )))
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn ping(&self, node: &NodeId) -> Result<()> {
        let resp = self
            .http
            .get(format!("{}/ping", node.url()))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| unreachable(node, e))?;
        check_status(node, "/ping", resp)
    }

    async fn apply_snapshot(&self, node: &NodeId, snapshot: &Snapshot) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/snapshot", node.url()))
            .json(snapshot)
            .send()
            .await
            .map_err(|e| unreachable(node, e))?;
        check_status(node, "/snapshot", resp)
    }

    async fn increment_load(&self, node: &NodeId) -> Result<()> {
        self.post_empty(node, "/load/increment").await
    }

    async fn decrement_load(&self, node: &NodeId) -> Result<()> {
        self.post_empty(node, "/load/decrement").await
    }

    async fn shutdown(&self, node: &NodeId) -> Result<()> {
        self.post_empty(node, "/shutdown").await
    }
}
