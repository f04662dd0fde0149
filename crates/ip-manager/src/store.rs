//! Cluster store abstraction.
//!
//! Everything the allocation flow reads from or writes to the API server
//! goes through [`NetworkStore`] so the flow can be unit tested against
//! [`MockNetworkStore`](crate::mock::MockNetworkStore).

use crate::error::StoreError;
use crds::{NetworkAttachmentDefinition, VirtualMachine};
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Cluster store operations used by the allocation flow.
///
/// Lookups return `Ok(None)` for not-found; every `Err` is fatal to the
/// calling reconciliation. All async methods must be `Send` to work with
/// Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait NetworkStore: Send + Sync {
    /// Fetch a NetworkAttachmentDefinition by namespace and name
    async fn get_network(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NetworkAttachmentDefinition>, StoreError>;

    /// Create a NetworkAttachmentDefinition
    async fn create_network(
        &self,
        network: &NetworkAttachmentDefinition,
        dry_run: bool,
    ) -> Result<NetworkAttachmentDefinition, StoreError>;

    /// Replace a NetworkAttachmentDefinition; `network` must carry the
    /// stored `resourceVersion`
    async fn update_network(
        &self,
        network: &NetworkAttachmentDefinition,
        dry_run: bool,
    ) -> Result<NetworkAttachmentDefinition, StoreError>;

    /// Fetch a KubeVirt VirtualMachine by namespace and name
    async fn get_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachine>, StoreError>;
}

/// [`NetworkStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeNetworkStore {
    client: Client,
}

impl std::fmt::Debug for KubeNetworkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeNetworkStore").finish_non_exhaustive()
    }
}

impl KubeNetworkStore {
    /// Creates a store using the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn networks(&self, namespace: &str) -> Api<NetworkAttachmentDefinition> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn post_params(dry_run: bool) -> PostParams {
    PostParams {
        dry_run,
        ..PostParams::default()
    }
}

fn key_of(network: &NetworkAttachmentDefinition) -> Result<(String, String), StoreError> {
    let namespace = network.namespace().ok_or_else(|| {
        StoreError::MissingMetadata(format!(
            "NetworkAttachmentDefinition {} has no namespace",
            network.name_any()
        ))
    })?;
    let name = network.metadata.name.clone().ok_or_else(|| {
        StoreError::MissingMetadata(format!(
            "NetworkAttachmentDefinition in {} has no name",
            namespace
        ))
    })?;
    Ok((namespace, name))
}

#[async_trait::async_trait]
impl NetworkStore for KubeNetworkStore {
    async fn get_network(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NetworkAttachmentDefinition>, StoreError> {
        Ok(self.networks(namespace).get_opt(name).await?)
    }

    async fn create_network(
        &self,
        network: &NetworkAttachmentDefinition,
        dry_run: bool,
    ) -> Result<NetworkAttachmentDefinition, StoreError> {
        let (namespace, name) = key_of(network)?;
        debug!("Creating NetworkAttachmentDefinition {}/{} (dry_run: {})", namespace, name, dry_run);
        Ok(self.networks(&namespace).create(&post_params(dry_run), network).await?)
    }

    async fn update_network(
        &self,
        network: &NetworkAttachmentDefinition,
        dry_run: bool,
    ) -> Result<NetworkAttachmentDefinition, StoreError> {
        let (namespace, name) = key_of(network)?;
        debug!("Replacing NetworkAttachmentDefinition {}/{} (dry_run: {})", namespace, name, dry_run);
        Ok(self
            .networks(&namespace)
            .replace(&name, &post_params(dry_run), network)
            .await?)
    }

    async fn get_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachine>, StoreError> {
        let api: Api<VirtualMachine> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
