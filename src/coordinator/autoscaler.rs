//! Threshold autoscaler
//!
//! Scale-up: the most loaded node above the threshold gets a new sibling and
//! hands it `max(1, threshold / 2)` of its clients. At most one per pass.
//!
//! Scale-down: a node idle for at least the idle delay is removed and its
//! worker stopped, as long as it is not the last member.

use crate::common::{ClientId, EventLog, FleetEventKind, FleetMetrics, NodeId, WorkerRole};
use crate::coordinator::fleet::Fleet;
use crate::coordinator::launcher::WorkerLauncher;
use crate::coordinator::notifier::LoadNotifier;
use std::sync::Arc;
use std::time::Duration;

/// What one autoscaling pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScaleReport {
    pub added: Option<NodeId>,
    pub moved: Vec<ClientId>,
    pub retired: Vec<NodeId>,
}

/// Clients moved off an overloaded node per scale-up
pub fn clients_to_move(threshold: u32) -> usize {
    ((threshold / 2) as usize).max(1)
}

pub struct Autoscaler {
    fleet: Arc<Fleet>,
    launcher: Arc<dyn WorkerLauncher>,
    notifier: Arc<LoadNotifier>,
    metrics: Arc<FleetMetrics>,
    events: Arc<EventLog>,
    threshold: u32,
    idle_delay: Duration,
}

impl Autoscaler {
    pub fn new(
        fleet: Arc<Fleet>,
        launcher: Arc<dyn WorkerLauncher>,
        notifier: Arc<LoadNotifier>,
        metrics: Arc<FleetMetrics>,
        events: Arc<EventLog>,
        threshold: u32,
        idle_delay: Duration,
    ) -> Self {
        Self {
            fleet,
            launcher,
            notifier,
            metrics,
            events,
            threshold,
            idle_delay,
        }
    }

    pub async fn run_pass(&self) -> ScaleReport {
        let mut report = ScaleReport::default();
        if let Some((added, moved)) = self.scale_up().await {
            report.added = Some(added);
            report.moved = moved;
        }
        report.retired = self.scale_down().await;
        report
    }

    async fn scale_up(&self) -> Option<(NodeId, Vec<ClientId>)> {
        let (overloaded, load) = match self.fleet.most_overloaded(self.threshold).await {
            Ok(Some(found)) => found,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Autoscaler skipped scale-up: {}", e);
                return None;
            }
        };

        tracing::info!(
            "Node {} at load {} exceeds threshold {}, scaling up",
            overloaded,
            load,
            self.threshold
        );

        let endpoint = match self.launcher.find_free_endpoint().await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.spawn_failed(None, &e.to_string());
                return None;
            }
        };

        // No lock is held while the worker starts
        if let Err(e) = self.launcher.start(&endpoint, WorkerRole::Replica).await {
            self.spawn_failed(Some(&endpoint), &e.to_string());
            return None;
        }

        let count = clients_to_move(self.threshold);
        // Heartbeats from either side would undo the move until notified
        let _from = self.notifier.hold(&overloaded);
        let _to = self.notifier.hold(&endpoint);
        let moved = match self
            .fleet
            .admit_and_rebalance(endpoint.clone(), &overloaded, count)
            .await
        {
            Ok(moved) => moved,
            Err(e) => {
                tracing::error!("Could not register new worker {}: {}", endpoint, e);
                if let Err(e) = self.launcher.stop(&endpoint).await {
                    tracing::warn!("{}", e);
                }
                return None;
            }
        };

        self.metrics.scale_ups.inc();
        self.metrics.clients_reassigned.add(moved.len() as u64);
        self.events.record(
            FleetEventKind::ScaleUp,
            Some(&endpoint),
            format!("took {} client(s) from {}", moved.len(), overloaded),
        );
        tracing::info!(
            "Scaled up: {} took {} client(s) from {}",
            endpoint,
            moved.len(),
            overloaded
        );

        for _ in &moved {
            self.notifier.decrement(&overloaded).await;
        }
        let pairs: Vec<(ClientId, NodeId)> = moved
            .iter()
            .map(|c| (c.clone(), endpoint.clone()))
            .collect();
        self.notifier.moved(&pairs).await;

        Some((endpoint, moved))
    }

    fn spawn_failed(&self, endpoint: Option<&NodeId>, reason: &str) {
        self.metrics.spawn_failures.inc();
        self.events
            .record(FleetEventKind::SpawnFailed, endpoint, reason.to_string());
        tracing::error!(
            "Scale-up failed on {}: {}",
            endpoint.map(|e| e.as_str()).unwrap_or("-"),
            reason
        );
    }

    async fn scale_down(&self) -> Vec<NodeId> {
        let candidates = match self.fleet.idle_candidates(self.idle_delay).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("Autoscaler skipped scale-down: {}", e);
                return Vec::new();
            }
        };

        let mut retired = Vec::new();
        for node in candidates {
            // Fleet size and idleness are checked again under the lock
            let reassignment = match self.fleet.retire_if_idle(&node, self.idle_delay).await {
                Ok(Some(reassignment)) => reassignment,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Could not retire {}: {}", node, e);
                    continue;
                }
            };

            tracing::info!("Retiring idle node {}", node);
            if let Err(e) = self.launcher.stop(&node).await {
                self.metrics.stop_failures.inc();
                self.events
                    .record(FleetEventKind::StopFailed, Some(&node), e.to_string());
                tracing::warn!("{}", e);
            }

            self.metrics.scale_downs.inc();
            self.events.record(
                FleetEventKind::ScaleDown,
                Some(&node),
                format!("idle for at least {:?}", self.idle_delay),
            );
            self.notifier.moved(&reassignment.moved).await;
            retired.push(node);
        }
        retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clients_to_move() {
        assert_eq!(clients_to_move(1), 1);
        assert_eq!(clients_to_move(2), 1);
        assert_eq!(clients_to_move(5), 2);
        assert_eq!(clients_to_move(8), 4);
    }
}
