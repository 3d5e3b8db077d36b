//! Snapshot fan-out to peers
//!
//! Best effort: every peer except the originator gets one delivery attempt
//! per call. A failed or slow peer is logged and skipped, never retried here;
//! the next write re-sends the full state.

use crate::common::{Error, NodeId, SyncMode};
use crate::node::client::NodeClient;
use crate::replication::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerFailure {
    pub peer: NodeId,
    pub reason: String,
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationReport {
    pub origin: NodeId,
    pub mode: SyncMode,
    pub delivered: Vec<NodeId>,
    pub failed: Vec<PeerFailure>,
    pub elapsed_ms: u64,
}

impl ReplicationReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Replicator {
    client: Arc<dyn NodeClient>,
    timeout: Duration,
    max_parallelism: usize,
}

impl Replicator {
    pub fn new(client: Arc<dyn NodeClient>, timeout: Duration) -> Self {
        let max_parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            client,
            timeout,
            max_parallelism,
        }
    }

    /// Cap the concurrent pool regardless of the machine's parallelism
    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = max.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Push `snapshot` to every peer except `origin`.
    ///
    /// Returns once every peer has either applied the snapshot, failed, or
    /// run out its timeout.
    pub async fn replicate<I>(
        &self,
        origin: &NodeId,
        peers: I,
        snapshot: Arc<Snapshot>,
        mode: SyncMode,
    ) -> ReplicationReport
    where
        I: IntoIterator<Item = NodeId>,
    {
        let start = Instant::now();
        let targets: BTreeSet<NodeId> = peers.into_iter().filter(|p| p != origin).collect();

        tracing::debug!(
            origin = %origin,
            peers = targets.len(),
            mode = %mode,
            "Replicating snapshot"
        );

        let mut report = ReplicationReport {
            origin: origin.clone(),
            mode,
            delivered: Vec::new(),
            failed: Vec::new(),
            elapsed_ms: 0,
        };

        let outcomes = match mode {
            SyncMode::Sequential => self.sequential(targets, &snapshot).await,
            SyncMode::Concurrent => self.concurrent(targets, snapshot).await,
        };

        for (peer, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    tracing::debug!(peer = %peer, "Snapshot applied");
                    report.delivered.push(peer);
                }
                Err(e) => {
                    let err = Error::ReplicationFailure {
                        peer: peer.to_string(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(origin = %origin, "{}", err);
                    report.failed.push(PeerFailure {
                        peer,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.delivered.sort();
        report.failed.sort_by(|a, b| a.peer.cmp(&b.peer));
        report.elapsed_ms = start.elapsed().as_millis() as u64;
        report
    }

    async fn sequential(
        &self,
        targets: BTreeSet<NodeId>,
        snapshot: &Snapshot,
    ) -> Vec<(NodeId, crate::Result<()>)> {
        let mut outcomes = Vec::with_capacity(targets.len());
        for peer in targets {
            let outcome = deliver(self.client.as_ref(), &peer, snapshot, self.timeout).await;
            outcomes.push((peer, outcome));
        }
        outcomes
    }

    async fn concurrent(
        &self,
        targets: BTreeSet<NodeId>,
        snapshot: Arc<Snapshot>,
    ) -> Vec<(NodeId, crate::Result<()>)> {
        if targets.is_empty() {
            return Vec::new();
        }

        let pool = targets.len().min(self.max_parallelism);
        let permits = Arc::new(Semaphore::new(pool));
        let mut tasks = JoinSet::new();

        for peer in targets {
            let client = self.client.clone();
            let snapshot = snapshot.clone();
            let permits = permits.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                let outcome = deliver(client.as_ref(), &peer, &snapshot, timeout).await;
                (peer, outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!("Fan-out task failed: {}", e),
            }
        }
        outcomes
    }
}

async fn deliver(
    client: &dyn NodeClient,
    peer: &NodeId,
    snapshot: &Snapshot,
    timeout: Duration,
) -> crate::Result<()> {
    match tokio::time::timeout(timeout, client.apply_snapshot(peer, snapshot)).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout(format!(
            "{} did not apply snapshot within {:?}",
            peer, timeout
        ))),
    }
}
