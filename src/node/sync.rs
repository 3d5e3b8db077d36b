//! Replication trigger for local writes
//!
//! Direct mode asks the coordinator for the current membership and fans the
//! snapshot out itself; relay mode hands the snapshot to the coordinator's
//! `SyncState`, which fans it out on the node's behalf.

use crate::common::{NodeId, Result, SyncMode};
use crate::node::coordinator_client::CoordinatorClient;
use crate::replication::{ReplicationReport, Replicator, Snapshot};
use std::sync::Arc;

pub struct StateSync {
    me: NodeId,
    coordinator: CoordinatorClient,
    replicator: Replicator,
    mode: SyncMode,
    relay: bool,
}

impl StateSync {
    pub fn new(
        me: NodeId,
        coordinator: CoordinatorClient,
        replicator: Replicator,
        mode: SyncMode,
        relay: bool,
    ) -> Self {
        Self {
            me,
            coordinator,
            replicator,
            mode,
            relay,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.me
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Push `snapshot` to every peer of this node
    pub async fn replicate(&self, snapshot: Snapshot) -> Result<ReplicationReport> {
        if self.relay {
            return self.coordinator.sync(&self.me, &snapshot, self.mode).await;
        }

        let peers = self.coordinator.loads().await?.into_keys();
        let report = self
            .replicator
            .replicate(&self.me, peers, Arc::new(snapshot), self.mode)
            .await;

        if !report.is_complete() {
            let failed: Vec<String> = report.failed.iter().map(|f| f.peer.to_string()).collect();
            let line = format!("replication incomplete, failed peers: {}", failed.join(", "));
            if let Err(e) = self.coordinator.log(Some(&self.me), &line).await {
                tracing::debug!("Could not forward log line: {}", e);
            }
        }
        Ok(report)
    }
}
