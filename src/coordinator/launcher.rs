//! Worker lifecycle
//!
//! The coordinator never touches processes directly; it asks a
//! [`WorkerLauncher`] to start a worker on an endpoint and to stop one.

use crate::common::{retry_with_backoff, Error, LauncherConfig, NodeId, Result, WorkerRole};
use crate::node::client::NodeClient;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::{Child, Command};

/// First delay between readiness pings, doubled after each failure
const READY_POLL_DELAY: Duration = Duration::from_millis(50);
const READY_POLL_ATTEMPTS: usize = 12;

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Start a worker on `endpoint`; returns once it answers ping
    async fn start(&self, endpoint: &NodeId, role: WorkerRole) -> Result<()>;

    /// Request termination without waiting for the worker to exit
    async fn stop(&self, endpoint: &NodeId) -> Result<()>;

    /// An endpoint nothing is listening on
    async fn find_free_endpoint(&self) -> Result<NodeId>;
}

/// Bind an ephemeral port on `host` and give it back
pub async fn free_endpoint_on(host: &str) -> Result<NodeId> {
    let listener = tokio::net::TcpListener::bind((host, 0)).await?;
    let port = listener.local_addr()?.port();
    Ok(NodeId::new(format!("{}:{}", host, port)))
}

/// Poll `endpoint` until it answers ping or `timeout` runs out
pub async fn wait_until_ready(
    client: &dyn NodeClient,
    endpoint: &NodeId,
    timeout: Duration,
) -> Result<()> {
    let polling = retry_with_backoff(
        || client.ping(endpoint),
        READY_POLL_ATTEMPTS,
        READY_POLL_DELAY,
    );
    match tokio::time::timeout(timeout, polling).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::SpawnFailure {
            endpoint: endpoint.to_string(),
            reason: format!("not ready: {}", e),
        }),
        Err(_) => Err(Error::SpawnFailure {
            endpoint: endpoint.to_string(),
            reason: format!("no answer to ping within {:?}", timeout),
        }),
    }
}

/// Per-endpoint worker slot
enum Worker {
    /// Spawned, not yet answering ping
    Starting,
    Running(Child),
}

/// Spawns `fleetlb-node` child processes
///
/// At most one worker per endpoint: a start on an endpoint that is still
/// starting, or whose child is still alive, is refused.
pub struct ProcessLauncher {
    binary: PathBuf,
    coordinator_url: String,
    host: String,
    startup_timeout: Duration,
    client: Arc<dyn NodeClient>,
    workers: Mutex<HashMap<NodeId, Worker>>,
}

/// Releases a `Starting` slot unless the start went through
struct StartClaim<'a> {
    workers: &'a Mutex<HashMap<NodeId, Worker>>,
    endpoint: NodeId,
}

impl Drop for StartClaim<'_> {
    fn drop(&mut self) {
        let mut workers = lock_workers(self.workers);
        if matches!(workers.get(&self.endpoint), Some(Worker::Starting)) {
            workers.remove(&self.endpoint);
        }
    }
}

fn lock_workers(
    workers: &Mutex<HashMap<NodeId, Worker>>,
) -> MutexGuard<'_, HashMap<NodeId, Worker>> {
    match workers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ProcessLauncher {
    pub fn new(config: &LauncherConfig, coordinator_url: String, client: Arc<dyn NodeClient>) -> Self {
        Self {
            binary: config.node_binary.clone(),
            coordinator_url,
            host: config.host.clone(),
            startup_timeout: config.startup_timeout(),
            client,
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn claim(&self, endpoint: &NodeId) -> Result<StartClaim<'_>> {
        let mut workers = lock_workers(&self.workers);
        let busy = match workers.get_mut(endpoint) {
            Some(Worker::Starting) => Some("a worker is already starting there"),
            Some(Worker::Running(child)) => match child.try_wait() {
                Ok(None) => Some("a worker is already running there"),
                _ => None,
            },
            None => None,
        };
        if let Some(reason) = busy {
            return Err(Error::SpawnFailure {
                endpoint: endpoint.to_string(),
                reason: reason.into(),
            });
        }

        // An exited child left behind is simply dropped
        workers.insert(endpoint.clone(), Worker::Starting);
        Ok(StartClaim {
            workers: &self.workers,
            endpoint: endpoint.clone(),
        })
    }

    fn take_running(&self, endpoint: &NodeId) -> Option<Child> {
        let mut workers = lock_workers(&self.workers);
        match workers.remove(endpoint) {
            Some(Worker::Running(child)) => Some(child),
            Some(Worker::Starting) => {
                workers.insert(endpoint.clone(), Worker::Starting);
                None
            }
            None => None,
        }
    }

    /// Endpoints with a starting or running child
    pub fn tracked(&self) -> usize {
        lock_workers(&self.workers).len()
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn start(&self, endpoint: &NodeId, role: WorkerRole) -> Result<()> {
        let claim = self.claim(endpoint)?;
        tracing::info!(
            "Spawning {} on {} ({})",
            self.binary.display(),
            endpoint,
            role
        );

        let mut child = Command::new(&self.binary)
            .arg("--bind")
            .arg(endpoint.as_str())
            .arg("--coordinator")
            .arg(&self.coordinator_url)
            .arg("--role")
            .arg(role.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::SpawnFailure {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        if let Err(e) = wait_until_ready(self.client.as_ref(), endpoint, self.startup_timeout).await
        {
            let _ = child.start_kill();
            return Err(e);
        }

        lock_workers(&self.workers).insert(endpoint.clone(), Worker::Running(child));
        drop(claim);
        Ok(())
    }

    async fn stop(&self, endpoint: &NodeId) -> Result<()> {
        let Some(mut child) = self.take_running(endpoint) else {
            // Not ours: ask the worker itself
            return self
                .client
                .shutdown(endpoint)
                .await
                .map_err(|e| Error::TerminationFailure {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                });
        };

        if let Err(e) = child.start_kill() {
            // Already exited and reaped
            if child.try_wait().ok().flatten().is_none() {
                return Err(Error::TerminationFailure {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        // Reap in the background
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!("Worker {} exited: {}", endpoint, status),
                Err(e) => tracing::warn!("Waiting for worker {} failed: {}", endpoint, e),
            }
        });
        Ok(())
    }

    async fn find_free_endpoint(&self) -> Result<NodeId> {
        free_endpoint_on(&self.host).await
    }
}

/// Workers are run by an operator; the coordinator only waits for them and
/// asks them to shut down
pub struct AttachLauncher {
    host: String,
    startup_timeout: Duration,
    client: Arc<dyn NodeClient>,
}

impl AttachLauncher {
    pub fn new(config: &LauncherConfig, client: Arc<dyn NodeClient>) -> Self {
        Self {
            host: config.host.clone(),
            startup_timeout: config.startup_timeout(),
            client,
        }
    }
}

#[async_trait]
impl WorkerLauncher for AttachLauncher {
    async fn start(&self, endpoint: &NodeId, role: WorkerRole) -> Result<()> {
        tracing::info!("Waiting for {} worker on {}", role, endpoint);
        wait_until_ready(self.client.as_ref(), endpoint, self.startup_timeout).await
    }

    async fn stop(&self, endpoint: &NodeId) -> Result<()> {
        self.client
            .shutdown(endpoint)
            .await
            .map_err(|e| Error::TerminationFailure {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    async fn find_free_endpoint(&self) -> Result<NodeId> {
        free_endpoint_on(&self.host).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::Snapshot;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers ping after a number of refusals
    struct SlowStarter {
        refusals: usize,
        delay: Duration,
        pings: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl SlowStarter {
        fn new(refusals: usize) -> Self {
            Self {
                refusals,
                delay: Duration::ZERO,
                pings: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
            }
        }

        fn answering_after(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(0)
            }
        }
    }

    #[async_trait]
    impl NodeClient for SlowStarter {
        async fn ping(&self, node: &NodeId) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            if self.pings.fetch_add(1, Ordering::SeqCst) < self.refusals {
                Err(Error::NodeUnreachable {
                    node: node.to_string(),
                    reason: "connection refused".into(),
                })
            } else {
                Ok(())
            }
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
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_free_endpoint_is_bindable() {
        let endpoint = free_endpoint_on("127.0.0.1").await.unwrap();
        assert!(endpoint.port().is_some());
        let _listener = tokio::net::TcpListener::bind(endpoint.as_str()).await.unwrap();
    }

    #[tokio::test]
    async fn test_attach_waits_for_ping() {
        let client = Arc::new(SlowStarter::new(3));
        let launcher = AttachLauncher::new(&LauncherConfig::default(), client.clone());

        launcher
            .start(&NodeId::from("127.0.0.1:7001"), WorkerRole::Primary)
            .await
            .unwrap();
        assert_eq!(client.pings.load(Ordering::SeqCst), 4);

        launcher.stop(&NodeId::from("127.0.0.1:7001")).await.unwrap();
        assert_eq!(client.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attach_gives_up_after_startup_timeout() {
        let client = Arc::new(SlowStarter::new(usize::MAX));
        let config = LauncherConfig {
            startup_timeout_ms: 200,
            ..Default::default()
        };
        let launcher = AttachLauncher::new(&config, client);

        let err = launcher
            .start(&NodeId::from("127.0.0.1:7001"), WorkerRole::Replica)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SpawnFailure { .. }));
    }

    #[tokio::test]
    async fn test_process_spawn_failure() {
        let config = LauncherConfig {
            node_binary: PathBuf::from("/nonexistent/fleetlb-node"),
            ..Default::default()
        };
        let launcher = ProcessLauncher::new(
            &config,
            "http://127.0.0.1:5000".into(),
            Arc::new(SlowStarter::new(0)),
        );

        let err = launcher
            .start(&NodeId::from("127.0.0.1:7001"), WorkerRole::Primary)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SpawnFailure { .. }));
    }

    #[tokio::test]
    async fn test_process_stop_of_foreign_worker_sends_shutdown() {
        let client = Arc::new(SlowStarter::new(0));
        let launcher = ProcessLauncher::new(
            &LauncherConfig::default(),
            "http://127.0.0.1:5000".into(),
            client.clone(),
        );
        launcher.stop(&NodeId::from("127.0.0.1:7009")).await.unwrap();
        assert_eq!(client.shutdowns.load(Ordering::SeqCst), 1);
    }

    /// Any executable will do; readiness comes from the fake ping
    fn process_launcher(client: Arc<dyn NodeClient>, startup_timeout_ms: u64) -> ProcessLauncher {
        let config = LauncherConfig {
            node_binary: std::env::current_exe().unwrap(),
            startup_timeout_ms,
            ..Default::default()
        };
        ProcessLauncher::new(&config, "http://127.0.0.1:5000".into(), client)
    }

    #[tokio::test]
    async fn test_concurrent_starts_on_one_endpoint() {
        let client = Arc::new(SlowStarter::answering_after(Duration::from_millis(200)));
        let launcher = process_launcher(client, 5_000);
        let endpoint = NodeId::from("127.0.0.1:7001");

        let (first, second) = tokio::join!(
            launcher.start(&endpoint, WorkerRole::Primary),
            launcher.start(&endpoint, WorkerRole::Primary),
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        let refused = outcomes.into_iter().find_map(|o| o.err()).unwrap();
        assert!(
            matches!(&refused, Error::SpawnFailure { reason, .. } if reason.contains("already")),
            "{}",
            refused
        );
        assert_eq!(launcher.tracked(), 1);
    }

    #[tokio::test]
    async fn test_failed_start_frees_the_endpoint() {
        let client = Arc::new(SlowStarter::new(usize::MAX));
        let launcher = process_launcher(client, 200);
        let endpoint = NodeId::from("127.0.0.1:7001");

        for _ in 0..2 {
            let err = launcher
                .start(&endpoint, WorkerRole::Replica)
                .await
                .unwrap_err();
            assert!(
                matches!(&err, Error::SpawnFailure { reason, .. } if !reason.contains("already")),
                "{}",
                err
            );
        }
        assert_eq!(launcher.tracked(), 0);
    }

    #[tokio::test]
    async fn test_stop_forgets_the_child() {
        let client = Arc::new(SlowStarter::new(0));
        let launcher = process_launcher(client.clone(), 5_000);
        let endpoint = NodeId::from("127.0.0.1:7001");

        launcher.start(&endpoint, WorkerRole::Primary).await.unwrap();
        assert_eq!(launcher.tracked(), 1);

        launcher.stop(&endpoint).await.unwrap();
        assert_eq!(launcher.tracked(), 0);
        // The worker was ours, so it was not asked over the wire
        assert_eq!(client.shutdowns.load(Ordering::SeqCst), 0);
    }
}
