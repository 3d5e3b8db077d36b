//! In-process doubles for the worker surface and the worker launcher

#![allow(dead_code)]

use async_trait::async_trait;
use fleetlb::common::{
    CoordinatorConfig, Error, EventLog, NodeId, Result, WorkerRole,
};
use fleetlb::coordinator::{CoordinatorService, WorkerLauncher};
use fleetlb::node::NodeClient;
use fleetlb::replication::Snapshot;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Every node answers unless marked dead
#[derive(Default)]
pub struct FakeNodes {
    dead: Mutex<HashSet<NodeId>>,
    pub increments: Mutex<HashMap<NodeId, u32>>,
    pub decrements: Mutex<HashMap<NodeId, u32>>,
    pub applied: Mutex<HashMap<NodeId, Snapshot>>,
    pub shutdowns: Mutex<Vec<NodeId>>,
    /// While set, load increments wait for `resume`
    pub paused: AtomicBool,
    pub resume: Notify,
}

impl FakeNodes {
    pub fn kill(&self, node: &str) {
        self.dead.lock().unwrap().insert(NodeId::from(node));
    }

    fn check(&self, node: &NodeId) -> Result<()> {
        if self.dead.lock().unwrap().contains(node) {
            Err(Error::NodeUnreachable {
                node: node.to_string(),
                reason: "connection refused".into(),
            })
        } else {
            Ok(())
        }
    }

    pub fn increments_of(&self, node: &str) -> u32 {
        *self
            .increments
            .lock()
            .unwrap()
            .get(&NodeId::from(node))
            .unwrap_or(&0)
    }
}

#[async_trait]
impl NodeClient for FakeNodes {
    async fn ping(&self, node: &NodeId) -> Result<()> {
        self.check(node)
    }

    async fn apply_snapshot(&self, node: &NodeId, snapshot: &Snapshot) -> Result<()> {
        self.check(node)?;
        self.applied
            .lock()
            .unwrap()
            .insert(node.clone(), snapshot.clone());
        Ok(())
    }

    async fn increment_load(&self, node: &NodeId) -> Result<()> {
        if self.paused.load(Ordering::SeqCst) {
            self.resume.notified().await;
        }
        self.check(node)?;
        *self.increments.lock().unwrap().entry(node.clone()).or_default() += 1;
        Ok(())
    }

    async fn decrement_load(&self, node: &NodeId) -> Result<()> {
        self.check(node)?;
        *self.decrements.lock().unwrap().entry(node.clone()).or_default() += 1;
        Ok(())
    }

    async fn shutdown(&self, node: &NodeId) -> Result<()> {
        self.check(node)?;
        self.shutdowns.lock().unwrap().push(node.clone());
        Ok(())
    }
}

/// Records starts and stops; hands out `10.0.0.1:9000`, `10.0.0.1:9001`, ...
pub struct FakeLauncher {
    next_port: AtomicU16,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    pub started: Mutex<Vec<(NodeId, WorkerRole)>>,
    pub stopped: Mutex<Vec<NodeId>>,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self {
            next_port: AtomicU16::new(9000),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
        }
    }
}

impl FakeLauncher {
    pub fn stops_of(&self, node: &str) -> usize {
        self.stopped
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.as_str() == node)
            .count()
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn start(&self, endpoint: &NodeId, role: WorkerRole) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::SpawnFailure {
                endpoint: endpoint.to_string(),
                reason: "no such binary".into(),
            });
        }
        self.started.lock().unwrap().push((endpoint.clone(), role));
        Ok(())
    }

    async fn stop(&self, endpoint: &NodeId) -> Result<()> {
        self.stopped.lock().unwrap().push(endpoint.clone());
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::TerminationFailure {
                endpoint: endpoint.to_string(),
                reason: "no such process".into(),
            });
        }
        Ok(())
    }

    async fn find_free_endpoint(&self) -> Result<NodeId> {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        Ok(NodeId::new(format!("10.0.0.1:{}", port)))
    }
}

pub struct Harness {
    pub service: Arc<CoordinatorService>,
    pub nodes: Arc<FakeNodes>,
    pub launcher: Arc<FakeLauncher>,
}

pub fn harness(config: CoordinatorConfig) -> Harness {
    let nodes = Arc::new(FakeNodes::default());
    let launcher = Arc::new(FakeLauncher::default());
    let service = Arc::new(CoordinatorService::new(
        config,
        launcher.clone(),
        nodes.clone(),
        Arc::new(EventLog::default()),
    ));
    Harness {
        service,
        nodes,
        launcher,
    }
}

pub fn id(s: &str) -> NodeId {
    NodeId::from(s)
}
