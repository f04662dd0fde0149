//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the allocation
//! engine to the Kubernetes API and serves the admission endpoints.

use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::webhook::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use ip_manager::{IpManager, KubeNetworkStore};
use kube::Client;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Main controller for SR-IOV network admission.
pub struct Controller {
    config: Config,
    state: AppState,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing SR-IOV webhook");

        // Create Kubernetes client
        let kube_client = Client::try_default().await?;

        let manager = IpManager::new(
            Arc::new(KubeNetworkStore::new(kube_client)),
            config.manager_options(),
        );

        Ok(Self {
            config,
            state: AppState {
                manager: Arc::new(manager),
                metrics: Arc::new(Metrics::new()?),
            },
        })
    }

    /// Serves the admission endpoints until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!("SR-IOV webhook listening on {}", self.config.listen_addr);

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("SR-IOV webhook stopped");
        Ok(())
    }
}

/// Builds the HTTP router with all endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mutate-pods", post(webhook::mutate_pods))
        .route("/mutate-virtualmachines", post(webhook::mutate_virtual_machines))
        .route("/metrics", get(webhook::metrics))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Couldn't listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
