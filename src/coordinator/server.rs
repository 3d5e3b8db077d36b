//! Coordinator server

use crate::common::events::DEFAULT_EVENT_CAPACITY;
use crate::common::{CoordinatorConfig, EventLog, LauncherKind, NodeId, Result};
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::launcher::{AttachLauncher, ProcessLauncher, WorkerLauncher};
use crate::coordinator::service::CoordinatorService;
use crate::node::client::{HttpNodeClient, NodeClient};
use std::sync::Arc;

pub struct Coordinator {
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    /// Wire the service with the HTTP node client and the configured launcher
    pub fn build_service(&self) -> Result<CoordinatorService> {
        let client: Arc<dyn NodeClient> = Arc::new(HttpNodeClient::new(
            self.config.fanout_timeout(),
            self.config.probe_timeout(),
        )?);

        let launcher: Arc<dyn WorkerLauncher> = match self.config.launcher.kind {
            LauncherKind::Process => Arc::new(ProcessLauncher::new(
                &self.config.launcher,
                self.config.coordinator_url(),
                client.clone(),
            )),
            LauncherKind::Attach => {
                Arc::new(AttachLauncher::new(&self.config.launcher, client.clone()))
            }
        };

        let events = match &self.config.event_log_path {
            Some(path) => Arc::new(EventLog::with_file(path, DEFAULT_EVENT_CAPACITY)?),
            None => Arc::new(EventLog::default()),
        };

        Ok(CoordinatorService::new(
            self.config.clone(),
            launcher,
            client,
            events,
        ))
    }

    pub async fn serve(self) -> Result<()> {
        self.config.validate()?;

        tracing::info!("Starting coordinator");
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Launcher: {:?}", self.config.launcher.kind);
        tracing::info!(
            "  Monitor: every {:?}, threshold {}, idle delay {:?}",
            self.config.monitor_interval(),
            self.config.load_threshold,
            self.config.idle_delay()
        );

        let service = Arc::new(self.build_service()?);
        let router = create_router(CoordState {
            service: service.clone(),
        });

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        let http_server = axum::serve(listener, router).with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutting down");
            }
        });

        // Workers spawned at startup need the API up to report to
        let bootstrap = {
            let service = service.clone();
            let initial = self.config.initial_nodes.clone();
            tokio::spawn(async move {
                for endpoint in initial {
                    if let Err(e) = service.register_node(NodeId::new(endpoint), 0).await {
                        tracing::error!("Initial node not registered: {}", e);
                    }
                }
            })
        };

        let monitor = service.spawn_monitor();
        tracing::info!("✓ Coordinator ready");

        let res = http_server.await;
        monitor.abort();
        bootstrap.abort();
        if let Err(e) = res {
            tracing::error!("HTTP server error: {}", e);
        }
        Ok(())
    }
}
