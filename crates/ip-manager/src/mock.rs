//! Mock NetworkStore for unit testing
//!
//! Stores NetworkAttachmentDefinitions and VirtualMachines in memory,
//! enforces the API server's create-once and resourceVersion rules, counts
//! every call, and can be told to fail specific operations.

use crate::error::StoreError;
use crate::store::NetworkStore;
use crds::{NetworkAttachmentDefinition, VirtualMachine, VirtualMachineSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Key = (String, String);

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    GetNetwork,
    CreateNetwork,
    UpdateNetwork,
    GetVirtualMachine,
}

/// Call counters, one per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_network: usize,
    pub create_network: usize,
    pub update_network: usize,
    pub get_virtual_machine: usize,
}

impl CallCounts {
    /// Total number of store calls
    pub fn total(&self) -> usize {
        self.get_network + self.create_network + self.update_network + self.get_virtual_machine
    }
}

/// Mock NetworkStore for testing
#[derive(Clone, Default)]
pub struct MockNetworkStore {
    pub(crate) networks: Arc<Mutex<HashMap<Key, NetworkAttachmentDefinition>>>,
    pub(crate) virtual_machines: Arc<Mutex<HashMap<Key, VirtualMachine>>>,
    pub(crate) calls: Arc<Mutex<CallCounts>>,
    // Failures keyed by operation, optionally restricted to one object name
    pub(crate) failures: Arc<Mutex<HashMap<MockOperation, Option<String>>>>,
    pub(crate) write_latency: Arc<Mutex<Option<Duration>>>,
    // Counter for generating resource versions
    pub(crate) next_version: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for MockNetworkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNetworkStore")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl MockNetworkStore {
    /// Create a new, empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a NetworkAttachmentDefinition to the mock store (for test setup)
    pub fn add_network(&self, mut network: NetworkAttachmentDefinition) {
        if network.metadata.resource_version.is_none() {
            network.metadata.resource_version = Some(self.next_version());
        }
        let key = (
            network.metadata.namespace.clone().unwrap_or_default(),
            network.metadata.name.clone().unwrap_or_default(),
        );
        self.networks.lock().unwrap().insert(key, network);
    }

    /// Add a VirtualMachine to the mock store (for test setup)
    pub fn add_virtual_machine(&self, namespace: &str, name: &str) {
        let vm = VirtualMachine {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: VirtualMachineSpec::default(),
        };
        self.virtual_machines
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), vm);
    }

    /// Make every call of `operation` fail
    pub fn fail(&self, operation: MockOperation) {
        self.failures.lock().unwrap().insert(operation, None);
    }

    /// Make `operation` fail only for objects called `name`
    pub fn fail_for(&self, operation: MockOperation, name: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(operation, Some(name.to_string()));
    }

    /// Stop failing `operation`
    pub fn recover(&self, operation: MockOperation) {
        self.failures.lock().unwrap().remove(&operation);
    }

    /// Delay every create and update by `latency`
    pub fn set_write_latency(&self, latency: Duration) {
        *self.write_latency.lock().unwrap() = Some(latency);
    }

    /// Snapshot of the call counters
    pub fn calls(&self) -> CallCounts {
        *self.calls.lock().unwrap()
    }

    /// Stored NetworkAttachmentDefinition, if any
    pub fn network(&self, namespace: &str, name: &str) -> Option<NetworkAttachmentDefinition> {
        self.networks
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of stored NetworkAttachmentDefinitions
    pub fn network_count(&self) -> usize {
        self.networks.lock().unwrap().len()
    }

    fn next_version(&self) -> String {
        let mut version = self.next_version.lock().unwrap();
        *version += 1;
        version.to_string()
    }

    fn check_failure(&self, operation: MockOperation, name: &str) -> Result<(), StoreError> {
        match self.failures.lock().unwrap().get(&operation) {
            Some(None) => Err(StoreError::Unavailable(format!("injected {:?} failure", operation))),
            Some(Some(target)) if target == name => Err(StoreError::Unavailable(format!(
                "injected {:?} failure for {}",
                operation, name
            ))),
            _ => Ok(()),
        }
    }

    async fn simulate_write_latency(&self) {
        let latency = *self.write_latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn key_of(network: &NetworkAttachmentDefinition) -> Result<Key, StoreError> {
        match (&network.metadata.namespace, &network.metadata.name) {
            (Some(namespace), Some(name)) => Ok((namespace.clone(), name.clone())),
            _ => Err(StoreError::MissingMetadata(
                "NetworkAttachmentDefinition needs a namespace and a name".to_string(),
            )),
        }
    }
}

#[async_trait::async_trait]
impl NetworkStore for MockNetworkStore {
    async fn get_network(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NetworkAttachmentDefinition>, StoreError> {
        self.calls.lock().unwrap().get_network += 1;
        self.check_failure(MockOperation::GetNetwork, name)?;
        Ok(self.network(namespace, name))
    }

    async fn create_network(
        &self,
        network: &NetworkAttachmentDefinition,
        dry_run: bool,
    ) -> Result<NetworkAttachmentDefinition, StoreError> {
        self.calls.lock().unwrap().create_network += 1;
        let key = Self::key_of(network)?;
        self.check_failure(MockOperation::CreateNetwork, &key.1)?;
        self.simulate_write_latency().await;

        let mut networks = self.networks.lock().unwrap();
        if networks.contains_key(&key) {
            return Err(StoreError::Unavailable(format!(
                "networkattachmentdefinitions \"{}\" already exists",
                key.1
            )));
        }

        let mut created = network.clone();
        created.metadata.resource_version = Some(self.next_version());
        if !dry_run {
            networks.insert(key, created.clone());
        }
        Ok(created)
    }

    async fn update_network(
        &self,
        network: &NetworkAttachmentDefinition,
        dry_run: bool,
    ) -> Result<NetworkAttachmentDefinition, StoreError> {
        self.calls.lock().unwrap().update_network += 1;
        let key = Self::key_of(network)?;
        self.check_failure(MockOperation::UpdateNetwork, &key.1)?;
        self.simulate_write_latency().await;

        let mut networks = self.networks.lock().unwrap();
        let stored = networks.get(&key).ok_or_else(|| {
            StoreError::Unavailable(format!("networkattachmentdefinitions \"{}\" not found", key.1))
        })?;
        if stored.metadata.resource_version != network.metadata.resource_version {
            return Err(StoreError::Unavailable(format!(
                "conflict updating {}/{}: resourceVersion {:?} is stale",
                key.0, key.1, network.metadata.resource_version
            )));
        }

        let mut updated = network.clone();
        updated.metadata.resource_version = Some(self.next_version());
        if !dry_run {
            networks.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn get_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachine>, StoreError> {
        self.calls.lock().unwrap().get_virtual_machine += 1;
        self.check_failure(MockOperation::GetVirtualMachine, name)?;
        Ok(self
            .virtual_machines
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}
