//! Coordinator operations
//!
//! The RPC surface in transport-free form. The HTTP layer and the tests both
//! drive the coordinator through [`CoordinatorService`].

use crate::common::{
    validate_endpoint, ClientId, CoordinatorConfig, Error, EventLog, FleetEventKind, FleetMetrics,
    NodeId, Result, SyncMode, WorkerRole,
};
use crate::coordinator::autoscaler::Autoscaler;
use crate::coordinator::fleet::Fleet;
use crate::coordinator::launcher::WorkerLauncher;
use crate::coordinator::monitor::{spawn_monitor_loop, HealthMonitor};
use crate::coordinator::notifier::LoadNotifier;
use crate::node::client::NodeClient;
use crate::replication::{ReplicationReport, Replicator, Snapshot};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub struct CoordinatorService {
    config: CoordinatorConfig,
    fleet: Arc<Fleet>,
    launcher: Arc<dyn WorkerLauncher>,
    client: Arc<dyn NodeClient>,
    notifier: Arc<LoadNotifier>,
    replicator: Replicator,
    metrics: Arc<FleetMetrics>,
    events: Arc<EventLog>,
    wake: Arc<Notify>,
}

impl CoordinatorService {
    pub fn new(
        config: CoordinatorConfig,
        launcher: Arc<dyn WorkerLauncher>,
        client: Arc<dyn NodeClient>,
        events: Arc<EventLog>,
    ) -> Self {
        let metrics = Arc::new(FleetMetrics::new());
        let fleet = Arc::new(Fleet::new(config.lock_timeout(), metrics.clone()));
        let replicator = Replicator::new(client.clone(), config.fanout_timeout());
        let notifier = Arc::new(LoadNotifier::new(client.clone()));
        Self {
            config,
            fleet,
            launcher,
            client,
            notifier,
            replicator,
            metrics,
            events,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    pub fn metrics(&self) -> &Arc<FleetMetrics> {
        &self.metrics
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(
            self.fleet.clone(),
            self.client.clone(),
            self.launcher.clone(),
            self.notifier.clone(),
            self.metrics.clone(),
            self.events.clone(),
            self.config.probe_timeout(),
        )
    }

    pub fn autoscaler(&self) -> Autoscaler {
        Autoscaler::new(
            self.fleet.clone(),
            self.launcher.clone(),
            self.notifier.clone(),
            self.metrics.clone(),
            self.events.clone(),
            self.config.load_threshold,
            self.config.idle_delay(),
        )
    }

    /// Start the background monitor; routing changes wake it early
    pub fn spawn_monitor(&self) -> tokio::task::JoinHandle<()> {
        spawn_monitor_loop(
            self.health_monitor(),
            self.autoscaler(),
            self.config.monitor_interval(),
            self.wake.clone(),
        )
    }

    /// RegisterNode: start the worker, then add it to the fleet.
    /// A node already present only has its load overwritten.
    pub async fn register_node(&self, endpoint: NodeId, load: u32) -> Result<()> {
        validate_endpoint(endpoint.as_str())?;

        if !self.fleet.contains(&endpoint).await? {
            if let Err(e) = self.launcher.start(&endpoint, WorkerRole::Primary).await {
                self.metrics.spawn_failures.inc();
                self.events
                    .record(FleetEventKind::SpawnFailed, Some(&endpoint), e.to_string());
                tracing::error!("Registration of {} failed: {}", endpoint, e);
                return Err(e);
            }
        }

        self.fleet.register(endpoint.clone(), load).await?;
        self.events.record(
            FleetEventKind::NodeRegistered,
            Some(&endpoint),
            format!("load {}", load),
        );
        tracing::info!("Registered node {} (load {})", endpoint, load);
        Ok(())
    }

    /// UpdateLoad: overwrite the reported load.
    ///
    /// A report arriving while a load notification to the node is still in
    /// flight predates it and is dropped; the next heartbeat catches up.
    pub async fn update_load(&self, endpoint: &NodeId, load: u32) -> Result<()> {
        if self.notifier.is_pending(endpoint) {
            if !self.fleet.contains(endpoint).await? {
                return Err(Error::NotRegistered(endpoint.to_string()));
            }
            tracing::trace!("Load report from {} held back", endpoint);
            return Ok(());
        }
        self.fleet.update_load(endpoint, load).await?;
        tracing::trace!("Load of {} is {}", endpoint, load);
        Ok(())
    }

    pub async fn least_loaded(&self) -> Result<NodeId> {
        self.fleet.least_loaded().await?.ok_or(Error::NoneAvailable)
    }

    pub async fn loads(&self) -> Result<BTreeMap<NodeId, u32>> {
        self.fleet.loads().await
    }

    /// AddClient: route `client` to `endpoint` and let the autoscaler react
    pub async fn add_client(&self, client: ClientId, endpoint: NodeId) -> Result<()> {
        let _target = self.notifier.hold(&endpoint);
        let admission = self.fleet.add_client(client.clone(), endpoint).await?;
        tracing::debug!("Client {} routed to {}", client, admission.node);

        if admission.previous.as_ref() != Some(&admission.node) {
            if let Some(previous) = &admission.previous {
                self.notifier.decrement(previous).await;
            }
            self.notifier.increment(&admission.node).await;
        }

        self.wake.notify_one();
        Ok(())
    }

    /// RemoveClient: unassign and give the load back
    pub async fn remove_client(&self, client: &ClientId) -> Result<()> {
        let node = self.fleet.remove_client(client).await?;
        tracing::debug!("Client {} left {}", client, node);
        self.notifier.decrement(&node).await;
        Ok(())
    }

    pub async fn client_of(&self, client: &ClientId) -> Result<NodeId> {
        self.fleet
            .client_of(client)
            .await?
            .ok_or_else(|| Error::NotFound(client.to_string()))
    }

    /// SyncState: fan `snapshot` out to every member except `origin`
    pub async fn sync_state(
        &self,
        origin: &NodeId,
        snapshot: Snapshot,
        mode: SyncMode,
    ) -> Result<ReplicationReport> {
        let peers = self.fleet.members().await?;
        let report = self
            .replicator
            .replicate(origin, peers, Arc::new(snapshot), mode)
            .await;

        self.metrics
            .snapshots_delivered
            .add(report.delivered.len() as u64);
        self.metrics.snapshots_failed.add(report.failed.len() as u64);
        self.metrics
            .fanout_latency
            .observe(Duration::from_millis(report.elapsed_ms));
        Ok(report)
    }

    /// Log: record a line forwarded by a node
    pub fn log(&self, origin: Option<&NodeId>, message: &str) {
        self.events
            .record(FleetEventKind::Remote, origin, message.to_string());
    }
}
