//! HTTP API for the coordinator
//!
//! Fleet RPCs:
//! - `POST /nodes`, `GET /nodes`, `PUT /nodes/:endpoint/load`
//! - `GET /nodes/least-loaded`
//! - `POST /clients`, `GET|DELETE /clients/:client`
//! - `POST /sync`, `POST /log`
//!
//! Operations:
//! - `/health`, `/health/ready`, `/health/live`
//! - `/metrics` (Prometheus text), `/admin/events`

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{ClientId, FleetEvent, NodeId, Result, SyncMode};
use crate::coordinator::service::CoordinatorService;
use crate::replication::{ReplicationReport, Snapshot};
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// `POST /sync` carries a whole snapshot
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const DEFAULT_EVENT_LIMIT: usize = 100;

#[derive(Clone)]
pub struct CoordState {
    pub service: Arc<CoordinatorService>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub endpoint: NodeId,
    #[serde(default)]
    pub load: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLoadRequest {
    pub load: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeastLoaded {
    pub endpoint: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddClientRequest {
    pub client: ClientId,
    pub endpoint: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRoute {
    pub client: ClientId,
    pub endpoint: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub origin: NodeId,
    pub snapshot: Snapshot,
    #[serde(default)]
    pub mode: SyncMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRequest {
    #[serde(default)]
    pub origin: Option<NodeId>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route(
            "/nodes",
            axum::routing::get(get_loads).post(register_node),
        )
        .route("/nodes/least-loaded", axum::routing::get(least_loaded))
        .route("/nodes/:endpoint/load", axum::routing::put(update_load))
        .route("/clients", axum::routing::post(add_client))
        .route(
            "/clients/:client",
            axum::routing::get(client_of).delete(remove_client),
        )
        .route("/sync", axum::routing::post(sync_state))
        .route("/log", axum::routing::post(log_line))
        // Health checks
        .route("/health", axum::routing::get(health))
        .route("/health/ready", axum::routing::get(health_ready))
        .route("/health/live", axum::routing::get(health_live))
        .route("/metrics", axum::routing::get(metrics))
        .route("/admin/events", axum::routing::get(admin_events))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(DefaultBodyLimit::disable())
        .layer(tower_http::limit::RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn register_node(
    State(state): State<CoordState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    state
        .service
        .register_node(req.endpoint.clone(), req.load)
        .await?;
    Ok(Json(json!({ "registered": req.endpoint, "load": req.load })))
}

async fn update_load(
    State(state): State<CoordState>,
    Path(endpoint): Path<String>,
    Json(req): Json<UpdateLoadRequest>,
) -> Result<impl IntoResponse> {
    let endpoint = NodeId::new(endpoint);
    state.service.update_load(&endpoint, req.load).await?;
    Ok(Json(json!({ "endpoint": endpoint, "load": req.load })))
}

async fn least_loaded(State(state): State<CoordState>) -> Result<Json<LeastLoaded>> {
    let endpoint = state.service.least_loaded().await?;
    Ok(Json(LeastLoaded { endpoint }))
}

async fn get_loads(State(state): State<CoordState>) -> Result<Json<BTreeMap<NodeId, u32>>> {
    Ok(Json(state.service.loads().await?))
}

async fn add_client(
    State(state): State<CoordState>,
    Json(req): Json<AddClientRequest>,
) -> Result<Json<ClientRoute>> {
    state
        .service
        .add_client(req.client.clone(), req.endpoint.clone())
        .await?;
    Ok(Json(ClientRoute {
        client: req.client,
        endpoint: req.endpoint,
    }))
}

async fn client_of(
    State(state): State<CoordState>,
    Path(client): Path<String>,
) -> Result<Json<ClientRoute>> {
    let client = ClientId::new(client);
    let endpoint = state.service.client_of(&client).await?;
    Ok(Json(ClientRoute { client, endpoint }))
}

async fn remove_client(
    State(state): State<CoordState>,
    Path(client): Path<String>,
) -> Result<impl IntoResponse> {
    let client = ClientId::new(client);
    state.service.remove_client(&client).await?;
    Ok(Json(json!({ "removed": client })))
}

async fn sync_state(
    State(state): State<CoordState>,
    Json(req): Json<SyncRequest>,
) -> Result<Json<ReplicationReport>> {
    let report = state
        .service
        .sync_state(&req.origin, req.snapshot, req.mode)
        .await?;
    Ok(Json(report))
}

async fn log_line(
    State(state): State<CoordState>,
    Json(req): Json<LogRequest>,
) -> impl IntoResponse {
    state.service.log(req.origin.as_ref(), &req.message);
    Json(json!({ "logged": true }))
}

async fn admin_events(
    State(state): State<CoordState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<FleetEvent>> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    Json(state.service.events().recent(limit))
}

/// Fleet summary
async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    let metrics = state.service.metrics();
    Json(json!({
        "status": "healthy",
        "nodes": metrics.fleet_size.get(),
        "clients": metrics.client_sessions.get(),
        "uptime_secs": metrics.uptime_seconds(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness probe: ready once at least one node can take clients
async fn health_ready(State(state): State<CoordState>) -> impl IntoResponse {
    match state.service.least_loaded().await {
        Ok(endpoint) => (
            StatusCode::OK,
            Json(json!({ "ready": true, "least_loaded": endpoint })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": e.to_string() })),
        ),
    }
}

/// Liveness probe
async fn health_live() -> impl IntoResponse {
    Json(json!({
        "alive": true,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

async fn metrics(State(state): State<CoordState>) -> impl IntoResponse {
    let mut out = String::new();
    if let Ok(loads) = state.service.loads().await {
        for (node, load) in loads {
            out += &format!("fleetlb_node_load{{node=\"{}\"}} {}\n", node, load);
        }
    }
    out += &state.service.metrics().to_prometheus();
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        out,
    )
}
