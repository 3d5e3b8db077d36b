//! Snapshot replication over real sockets

use fleetlb::common::{CoordinatorConfig, EventLog, LauncherConfig, NodeId, SyncMode};
use fleetlb::coordinator::http::{create_router as coordinator_router, CoordState};
use fleetlb::coordinator::{AttachLauncher, CoordinatorService};
use fleetlb::node::http::{create_router as node_router, NodeAppState};
use fleetlb::node::{CoordinatorClient, HttpNodeClient, NodeState, StateSync};
use fleetlb::replication::{Replicator, Snapshot};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::Notify;

struct RunningNode {
    id: NodeId,
    state: Arc<NodeState>,
    shutdown: Arc<Notify>,
    task: tokio::task::JoinHandle<()>,
}

async fn bind() -> (TcpListener, NodeId) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let id = NodeId::new(listener.local_addr().unwrap().to_string());
    (listener, id)
}

async fn start_node(sync: impl FnOnce(&NodeId) -> Option<Arc<StateSync>>) -> RunningNode {
    let (listener, id) = bind().await;
    let state = Arc::new(NodeState::new());
    let shutdown = Arc::new(Notify::new());
    let router = node_router(NodeAppState {
        node_id: id.clone(),
        state: state.clone(),
        sync: sync(&id),
        shutdown: shutdown.clone(),
    });
    let signal = shutdown.clone();
    let task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.notified().await })
            .await
            .unwrap();
    });
    RunningNode {
        id,
        state,
        shutdown,
        task,
    }
}

/// Accepts connections and never answers
async fn start_silent_peer() -> NodeId {
    let (listener, id) = bind().await;
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    id
}

fn http_client() -> Arc<HttpNodeClient> {
    Arc::new(HttpNodeClient::new(Duration::from_secs(5), Duration::from_secs(1)).unwrap())
}

#[tokio::test]
async fn test_concurrent_fanout_is_bounded_by_one_timeout() {
    let a = start_node(|_| None).await;
    let b = start_node(|_| None).await;
    let silent = start_silent_peer().await;

    let timeout = Duration::from_millis(300);
    let replicator = Replicator::new(http_client(), timeout);
    let snapshot = Snapshot::default().with_collection("posts", json!([{"id": 7}]));

    let started = Instant::now();
    let report = replicator
        .replicate(
            &NodeId::from("127.0.0.1:1"),
            vec![a.id.clone(), b.id.clone(), silent.clone()],
            Arc::new(snapshot),
            SyncMode::Concurrent,
        )
        .await;
    let elapsed = started.elapsed();

    assert!(elapsed < timeout + Duration::from_millis(700), "took {:?}", elapsed);
    assert_eq!(report.attempted(), 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].peer, silent);
    assert_eq!(a.state.snapshot().get("posts"), Some(&json!([{"id": 7}])));
    assert_eq!(b.state.snapshot().get("posts"), Some(&json!([{"id": 7}])));
    assert_eq!(a.state.snapshot().get("followers"), Some(&json!({})));
}

#[tokio::test]
async fn test_sequential_fanout_skips_a_silent_peer() {
    let a = start_node(|_| None).await;
    let silent = start_silent_peer().await;

    let replicator = Replicator::new(http_client(), Duration::from_millis(200));
    let report = replicator
        .replicate(
            &NodeId::from("127.0.0.1:1"),
            vec![silent.clone(), a.id.clone()],
            Arc::new(Snapshot::default().with_collection("clients", json!(["ann"]))),
            SyncMode::Sequential,
        )
        .await;

    assert_eq!(report.delivered, vec![a.id.clone()]);
    assert_eq!(report.failed[0].peer, silent);
    assert_eq!(a.state.snapshot().get("clients"), Some(&json!(["ann"])));
}

async fn start_coordinator() -> (Arc<CoordinatorService>, String) {
    let client = http_client();
    let launcher = Arc::new(AttachLauncher::new(&LauncherConfig::default(), client.clone()));
    let service = Arc::new(CoordinatorService::new(
        CoordinatorConfig {
            load_threshold: 100,
            ..Default::default()
        },
        launcher,
        client,
        Arc::new(EventLog::default()),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let router = coordinator_router(CoordState {
        service: service.clone(),
    });
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (service, url)
}

fn syncing(url: String, relay: bool) -> impl FnOnce(&NodeId) -> Option<Arc<StateSync>> {
    move |id| {
        let coordinator = CoordinatorClient::new(url, Duration::from_secs(5)).unwrap();
        let replicator = Replicator::new(http_client(), Duration::from_secs(2));
        Some(Arc::new(StateSync::new(
            id.clone(),
            coordinator,
            replicator,
            SyncMode::Concurrent,
            relay,
        )))
    }
}

async fn write_on(node: &NodeId, collection: &str, value: serde_json::Value) -> serde_json::Value {
    reqwest::Client::new()
        .put(format!("{}/state/{}", node.url(), collection))
        .json(&value)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_write_reaches_peers_directly() {
    let (service, url) = start_coordinator().await;
    let a = start_node(syncing(url.clone(), false)).await;
    let b = start_node(syncing(url.clone(), false)).await;
    service.register_node(a.id.clone(), 0).await.unwrap();
    service.register_node(b.id.clone(), 0).await.unwrap();

    let resp = write_on(&a.id, "posts", json!([{"id": 1, "likes": 0}])).await;
    assert_eq!(resp["replication"]["delivered"], json!([b.id.as_str()]));

    assert_eq!(
        b.state.snapshot().get("posts"),
        Some(&json!([{"id": 1, "likes": 0}]))
    );
}

#[tokio::test]
async fn test_write_reaches_peers_through_coordinator() {
    let (service, url) = start_coordinator().await;
    let a = start_node(syncing(url.clone(), true)).await;
    let b = start_node(syncing(url.clone(), true)).await;
    service.register_node(a.id.clone(), 0).await.unwrap();
    service.register_node(b.id.clone(), 0).await.unwrap();

    let resp = write_on(&b.id, "chatrooms", json!({"lobby": ["hi"]})).await;
    assert_eq!(resp["replication"]["origin"], b.id.as_str());

    assert_eq!(
        a.state.snapshot().get("chatrooms"),
        Some(&json!({"lobby": ["hi"]}))
    );
    assert_eq!(service.metrics().fleet_size.get(), 2);
}

#[tokio::test]
async fn test_monitor_evicts_a_stopped_node() {
    let (service, _url) = start_coordinator().await;
    let a = start_node(|_| None).await;
    let b = start_node(|_| None).await;
    service.register_node(a.id.clone(), 0).await.unwrap();
    service.register_node(b.id.clone(), 0).await.unwrap();
    service
        .add_client("alice".into(), a.id.clone())
        .await
        .unwrap();

    a.shutdown.notify_one();
    a.task.await.unwrap();
    let report = service.health_monitor().run_pass().await.unwrap();
    assert_eq!(report.evicted, vec![a.id.clone()]);
    assert_eq!(
        service.client_of(&"alice".into()).await.unwrap(),
        b.id.clone()
    );
    assert_eq!(b.state.load(), 1);
}
