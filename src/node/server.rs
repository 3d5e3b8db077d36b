//! Application node server

use crate::common::{NodeConfig, NodeId, Result};
use crate::node::client::HttpNodeClient;
use crate::node::coordinator_client::CoordinatorClient;
use crate::node::heartbeat::spawn_heartbeat;
use crate::node::http::{create_router, NodeAppState};
use crate::node::state::NodeState;
use crate::node::sync::StateSync;
use crate::replication::Replicator;
use std::sync::Arc;
use tokio::sync::Notify;

pub struct NodeServer {
    config: NodeConfig,
}

impl NodeServer {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        let me = NodeId::new(self.config.endpoint());
        tracing::info!("Starting node: {}", me);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Coordinator: {}", self.config.coordinator_url);
        tracing::info!("  Role: {}", self.config.role);
        tracing::info!(
            "  Sync: {}{}",
            self.config.sync_mode,
            if self.config.relay_via_coordinator {
                " (relayed)"
            } else {
                ""
            }
        );

        let state = Arc::new(NodeState::new());
        let coordinator =
            CoordinatorClient::new(&self.config.coordinator_url, self.config.request_timeout())?;

        let peer_client = Arc::new(HttpNodeClient::new(
            self.config.fanout_timeout(),
            self.config.request_timeout(),
        )?);
        let replicator = Replicator::new(peer_client, self.config.fanout_timeout());
        let sync = Arc::new(StateSync::new(
            me.clone(),
            coordinator.clone(),
            replicator,
            self.config.sync_mode,
            self.config.relay_via_coordinator,
        ));

        let shutdown = Arc::new(Notify::new());
        let router = create_router(NodeAppState {
            node_id: me.clone(),
            state: state.clone(),
            sync: Some(sync),
            shutdown: shutdown.clone(),
        });

        let heartbeat = spawn_heartbeat(
            me,
            state,
            coordinator,
            self.config.heartbeat_interval(),
        );

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ Node ready");

        let res = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.notified().await })
            .await;
        heartbeat.abort();

        if let Err(e) = res {
            tracing::error!("HTTP server error: {}", e);
        }
        tracing::info!("Node stopped");
        Ok(())
    }
}
