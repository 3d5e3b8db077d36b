//! HTTP surface of an application node
//!
//! Worker-side calls the coordinator and peers make (`/ping`, `/snapshot`,
//! `/load/*`, `/shutdown`) plus the opaque local state endpoints.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::NodeId;
use crate::node::state::NodeState;
use crate::node::sync::StateSync;
use crate::replication::Snapshot;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Notify;

/// Snapshots are whole-state copies
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct NodeAppState {
    pub node_id: NodeId,
    pub state: Arc<NodeState>,
    /// `None` runs the node standalone (no replication after writes)
    pub sync: Option<Arc<StateSync>>,
    pub shutdown: Arc<Notify>,
}

pub fn create_router(state: NodeAppState) -> Router {
    Router::new()
        .route("/ping", axum::routing::get(ping))
        .route("/snapshot", axum::routing::post(apply_snapshot))
        .route("/load", axum::routing::get(get_load))
        .route("/load/increment", axum::routing::post(increment_load))
        .route("/load/decrement", axum::routing::post(decrement_load))
        .route("/state", axum::routing::get(get_state))
        .route("/state/:collection", axum::routing::put(put_collection))
        .route("/shutdown", axum::routing::post(shutdown))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(DefaultBodyLimit::disable())
        .layer(tower_http::limit::RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn ping(State(state): State<NodeAppState>) -> impl IntoResponse {
    Json(json!({ "pong": true, "node": state.node_id }))
}

async fn apply_snapshot(
    State(state): State<NodeAppState>,
    Json(snapshot): Json<Snapshot>,
) -> impl IntoResponse {
    let collections = snapshot.len();
    state.state.apply(snapshot);
    tracing::debug!(collections, "Applied snapshot");
    Json(json!({ "applied": collections }))
}

async fn get_load(State(state): State<NodeAppState>) -> impl IntoResponse {
    Json(json!({ "load": state.state.load() }))
}

async fn increment_load(State(state): State<NodeAppState>) -> impl IntoResponse {
    let load = state.state.increment_load();
    tracing::debug!(load, "Client attached");
    Json(json!({ "load": load }))
}

async fn decrement_load(State(state): State<NodeAppState>) -> impl IntoResponse {
    let load = state.state.decrement_load();
    tracing::debug!(load, "Client detached");
    Json(json!({ "load": load }))
}

async fn get_state(State(state): State<NodeAppState>) -> impl IntoResponse {
    Json(state.state.snapshot())
}

/// Local write, followed by a fan-out of the whole state
async fn put_collection(
    State(state): State<NodeAppState>,
    Path(collection): Path<String>,
    Json(value): Json<serde_json::Value>,
) -> impl IntoResponse {
    let snapshot = state.state.set_collection(&collection, value);

    let Some(sync) = &state.sync else {
        return (
            StatusCode::OK,
            Json(json!({ "collection": collection, "replication": null })),
        );
    };

    match sync.replicate(snapshot).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({ "collection": collection, "replication": report })),
        ),
        Err(e) => {
            // The local write stands; peers catch up with the next one
            tracing::warn!("Replication after write to {} failed: {}", collection, e);
            (
                StatusCode::OK,
                Json(json!({
                    "collection": collection,
                    "replication": null,
                    "error": e.to_string(),
                })),
            )
        }
    }
}

async fn shutdown(State(state): State<NodeAppState>) -> impl IntoResponse {
    tracing::info!("Shutdown requested");
    state.shutdown.notify_one();
    (StatusCode::ACCEPTED, Json(json!({ "shutting_down": true })))
}
