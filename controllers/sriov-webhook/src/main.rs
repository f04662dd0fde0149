//! SR-IOV Webhook
//!
//! Mutating admission webhook that allocates static SR-IOV network
//! attachments to pods and KubeVirt VirtualMachines.
//!
//! For every admitted object carrying a `k8s.v1.cni.cncf.io/sriovnetworks`
//! annotation, the webhook ensures a Multus `NetworkAttachmentDefinition`
//! exists for each requested address and patches the object's
//! `k8s.v1.cni.cncf.io/networks` annotation to reference it.

mod config;
mod controller;
mod error;
mod metrics;
mod webhook;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Configure rustls crypto provider before the kube client is built
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting SR-IOV Webhook");

    // Load configuration from environment variables
    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Lock scope: {:?}", config.lock_scope);
    info!("  Lock timeout: {:?}", config.lock_timeout);
    info!("  Owner lookup failure: {:?}", config.owner_policy);

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
