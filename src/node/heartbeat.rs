//! Periodic load report
//!
//! Tells the coordinator how many client sessions this node carries. A node
//! the coordinator no longer knows (evicted, or not yet registered) keeps
//! reporting quietly; the coordinator ignores it until it registers again.

use crate::common::{Error, NodeId};
use crate::node::coordinator_client::CoordinatorClient;
use crate::node::state::NodeState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

pub fn spawn_heartbeat(
    me: NodeId,
    state: Arc<NodeState>,
    coordinator: CoordinatorClient,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let load = state.load();
            match coordinator.update_load(&me, load).await {
                Ok(()) => trace!(load, "Load reported"),
                Err(Error::NotRegistered(_)) => {
                    debug!("Coordinator does not list this node, skipping report")
                }
                Err(e) => warn!("Load report to {} failed: {}", coordinator.base_url(), e),
            }
        }
    })
}
