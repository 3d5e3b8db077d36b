//! Health monitor
//!
//! Probes every member in `NodeId` order. A node that does not answer within
//! the probe timeout is evicted and its clients handed to the least-loaded
//! survivors before the next node is probed. The evicted worker is then
//! stopped, in case it was only slow.

use crate::common::{ClientId, EventLog, FleetEventKind, FleetMetrics, NodeId, Result};
use crate::coordinator::autoscaler::Autoscaler;
use crate::coordinator::fleet::Fleet;
use crate::coordinator::launcher::WorkerLauncher;
use crate::coordinator::notifier::LoadNotifier;
use crate::node::client::NodeClient;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub probed: usize,
    pub evicted: Vec<NodeId>,
    pub reassigned: Vec<(ClientId, NodeId)>,
    pub orphaned: Vec<ClientId>,
}

pub struct HealthMonitor {
    fleet: Arc<Fleet>,
    client: Arc<dyn NodeClient>,
    launcher: Arc<dyn WorkerLauncher>,
    notifier: Arc<LoadNotifier>,
    metrics: Arc<FleetMetrics>,
    events: Arc<EventLog>,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        fleet: Arc<Fleet>,
        client: Arc<dyn NodeClient>,
        launcher: Arc<dyn WorkerLauncher>,
        notifier: Arc<LoadNotifier>,
        metrics: Arc<FleetMetrics>,
        events: Arc<EventLog>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            fleet,
            client,
            launcher,
            notifier,
            metrics,
            events,
            probe_timeout,
        }
    }

    async fn probe(&self, node: &NodeId) -> Result<()> {
        self.metrics.probes_total.inc();
        let start = Instant::now();
        let outcome = tokio::time::timeout(self.probe_timeout, self.client.ping(node)).await;
        self.metrics.probe_latency.observe(start.elapsed());
        match outcome {
            Ok(res) => res,
            Err(_) => Err(crate::Error::Timeout(format!(
                "{} did not answer ping within {:?}",
                node, self.probe_timeout
            ))),
        }
    }

    /// One probe round over the current membership
    pub async fn run_pass(&self) -> Result<ProbeReport> {
        let members = self.fleet.members().await?;
        let mut report = ProbeReport {
            probed: members.len(),
            ..Default::default()
        };

        for node in members {
            let failure = match self.probe(&node).await {
                Ok(()) => continue,
                Err(e) => e,
            };
            self.metrics.probe_failures.inc();
            tracing::warn!("Node {} failed its probe: {}", node, failure);

            let reassignment = match self.fleet.evict(&node).await {
                Ok(Some(reassignment)) => reassignment,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Could not evict {}: {}", node, e);
                    continue;
                }
            };

            self.metrics.nodes_evicted.inc();
            self.metrics
                .clients_reassigned
                .add(reassignment.moved.len() as u64);
            self.metrics
                .clients_orphaned
                .add(reassignment.orphaned.len() as u64);
            self.events.record(
                FleetEventKind::NodeEvicted,
                Some(&node),
                failure.to_string(),
            );
            for (client, target) in &reassignment.moved {
                self.events.record(
                    FleetEventKind::ClientReassigned,
                    Some(target),
                    format!("{} moved from {}", client, node),
                );
            }
            if !reassignment.orphaned.is_empty() {
                tracing::warn!(
                    "No node left to serve {} client(s) of {}, service degraded",
                    reassignment.orphaned.len(),
                    node
                );
                for client in &reassignment.orphaned {
                    self.events.record(
                        FleetEventKind::ClientOrphaned,
                        Some(&node),
                        client.to_string(),
                    );
                }
            }

            // Locks are released by now
            self.notifier.moved(&reassignment.moved).await;

            if let Err(e) = self.launcher.stop(&node).await {
                self.metrics.stop_failures.inc();
                self.events
                    .record(FleetEventKind::StopFailed, Some(&node), e.to_string());
                tracing::warn!("Evicted worker not stopped: {}", e);
            }

            report.evicted.push(node);
            report.reassigned.extend(reassignment.moved);
            report.orphaned.extend(reassignment.orphaned);
        }

        Ok(report)
    }
}

/// Run probes and autoscaling every `interval`, plus an autoscaling-only
/// pass whenever `wake` is notified
pub fn spawn_monitor_loop(
    monitor: HealthMonitor,
    autoscaler: Autoscaler,
    interval: Duration,
    wake: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match monitor.run_pass().await {
                        Ok(report) if !report.evicted.is_empty() => tracing::info!(
                            "Monitor pass evicted {:?}, reassigned {} client(s)",
                            report.evicted,
                            report.reassigned.len()
                        ),
                        Ok(report) => tracing::trace!("Monitor pass probed {} node(s)", report.probed),
                        Err(e) => tracing::warn!("Monitor pass aborted: {}", e),
                    }
                    autoscaler.run_pass().await;
                }
                _ = wake.notified() => {
                    autoscaler.run_pass().await;
                }
            }
        }
    })
}
