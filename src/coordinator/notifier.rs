//! Load notifications to workers
//!
//! The coordinator mirrors every routing change into the worker's own
//! session counter. Until such a notification has landed, the worker's
//! heartbeat still carries the old count, so absolute load reports for that
//! node are held back while one is in flight.

use crate::common::{ClientId, NodeId};
use crate::node::client::NodeClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct LoadNotifier {
    client: Arc<dyn NodeClient>,
    in_flight: Mutex<HashMap<NodeId, usize>>,
}

/// Marks a node as having a notification in flight until dropped
pub struct Pending<'a> {
    notifier: &'a LoadNotifier,
    node: NodeId,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.notifier.in_flight();
        if let Some(count) = in_flight.get_mut(&self.node) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(&self.node);
            }
        }
    }
}

impl LoadNotifier {
    pub fn new(client: Arc<dyn NodeClient>) -> Self {
        Self {
            client,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<NodeId, usize>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Hold back load reports from `node` until the returned guard drops.
    /// Take it before changing the node's load in the fleet.
    pub fn hold(&self, node: &NodeId) -> Pending<'_> {
        *self.in_flight().entry(node.clone()).or_default() += 1;
        Pending {
            notifier: self,
            node: node.clone(),
        }
    }

    /// Whether a notification to `node` has not landed yet
    pub fn is_pending(&self, node: &NodeId) -> bool {
        self.in_flight().contains_key(node)
    }

    /// Best effort
    pub async fn increment(&self, node: &NodeId) {
        let _pending = self.hold(node);
        if let Err(e) = self.client.increment_load(node).await {
            tracing::debug!("Load notification to {} failed: {}", node, e);
        }
    }

    /// Best effort
    pub async fn decrement(&self, node: &NodeId) {
        let _pending = self.hold(node);
        if let Err(e) = self.client.decrement_load(node).await {
            tracing::debug!("Load notification to {} failed: {}", node, e);
        }
    }

    /// Tell each receiving worker about its new client
    pub async fn moved(&self, moved: &[(ClientId, NodeId)]) {
        for (session, node) in moved {
            tracing::trace!("Notifying {} of moved client {}", node, session);
            self.increment(node).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Result;
    use crate::replication::Snapshot;
    use async_trait::async_trait;

    struct Silent;

    #[async_trait]
    impl NodeClient for Silent {
        async fn ping(&self, _node: &NodeId) -> Result<()> {
            Ok(())
        }
        async fn apply_snapshot(&self, _node: &NodeId, _snapshot: &Snapshot) -> Result<()> {
            Ok(())
        }
        async fn increment_load(&self, _node: &NodeId) -> Result<()> {
            Ok(())
        }
        async fn decrement_load(&self, _node: &NodeId) -> Result<()> {
            Ok(())
        }
        async fn shutdown(&self, _node: &NodeId) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pending_until_every_hold_drops() {
        let notifier = LoadNotifier::new(Arc::new(Silent));
        let node = NodeId::from("127.0.0.1:7001");

        let first = notifier.hold(&node);
        let second = notifier.hold(&node);
        assert!(notifier.is_pending(&node));

        drop(first);
        assert!(notifier.is_pending(&node));
        drop(second);
        assert!(!notifier.is_pending(&node));

        notifier.increment(&node).await;
        assert!(!notifier.is_pending(&node));
    }
}
