//! Create-or-update reconciliation of rendered NetworkAttachmentDefinitions.
//!
//! For each rendered document:
//! 1. Fetch it from the store by namespace/name
//! 2. Not found: create it
//! 3. Found and unchanged: nothing to do
//! 4. Found and changed: replace it, carrying the stored `resourceVersion`
//!
//! The first store error aborts the batch. Documents applied before the
//! failure stay in place; retrying the whole batch converges because every
//! step above is idempotent.

use crate::error::{IpManagerError, StoreError};
use crate::store::NetworkStore;
use crds::NetworkAttachmentDefinition;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info};

/// Namespace/name identifying a NetworkAttachmentDefinition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkKey {
    /// NetworkAttachmentDefinition name
    pub name: String,
    /// NetworkAttachmentDefinition namespace
    pub namespace: String,
}

impl NetworkKey {
    /// Builds a key. Takes the namespace first, as in `namespace/name`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Key of a rendered document.
    pub fn of(network: &NetworkAttachmentDefinition) -> Result<Self, StoreError> {
        match (&network.metadata.namespace, &network.metadata.name) {
            (Some(namespace), Some(name)) => Ok(Self::new(namespace.clone(), name.clone())),
            _ => Err(StoreError::MissingMetadata(
                "rendered NetworkAttachmentDefinition has no namespace/name".to_string(),
            )),
        }
    }
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What reconciliation did with one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// The document did not exist and was created
    Created,
    /// The stored document differed and was replaced
    Updated,
    /// The stored document already matched
    Unchanged,
}

/// Returns true if the stored document differs from the desired one.
///
/// `spec.config` is compared as parsed JSON so formatting differences in a
/// hand-edited object do not count as drift. Only annotations the renderer
/// sets are compared; annotations added by other actors are ignored.
pub fn needs_update(found: &NetworkAttachmentDefinition, desired: &NetworkAttachmentDefinition) -> bool {
    let config_changed = match (
        serde_json::from_str::<serde_json::Value>(&found.spec.config),
        serde_json::from_str::<serde_json::Value>(&desired.spec.config),
    ) {
        (Ok(stored), Ok(wanted)) => stored != wanted,
        _ => found.spec.config != desired.spec.config,
    };

    let stored_annotations = found.metadata.annotations.as_ref();
    let annotations_changed = desired
        .metadata
        .annotations
        .iter()
        .flatten()
        .any(|(key, value)| stored_annotations.and_then(|a| a.get(key)) != Some(value));

    config_changed || annotations_changed
}

/// Builds the replacement object: desired spec and annotations on top of
/// the stored object's metadata, so its `resourceVersion` and foreign
/// annotations are kept.
fn merge_for_update(
    found: &NetworkAttachmentDefinition,
    desired: &NetworkAttachmentDefinition,
) -> NetworkAttachmentDefinition {
    let mut updated = found.clone();
    updated.spec = desired.spec.clone();
    let annotations = updated.metadata.annotations.get_or_insert_with(Default::default);
    for (key, value) in desired.metadata.annotations.iter().flatten() {
        annotations.insert(key.clone(), value.clone());
    }
    updated
}

/// Reconciles one document against the store.
pub async fn reconcile_network(
    store: &dyn NetworkStore,
    desired: &NetworkAttachmentDefinition,
    dry_run: bool,
) -> Result<ReconcileAction, IpManagerError> {
    let key = NetworkKey::of(desired)?;

    let found = store.get_network(&key.namespace, &key.name).await.map_err(|e| {
        error!("Couldn't get NetworkAttachmentDefinition {}: {}", key, e);
        e
    })?;

    match found {
        None => {
            info!("NetworkAttachmentDefinition {} does not exist, creating", key);
            store.create_network(desired, dry_run).await.map_err(|e| {
                error!("Couldn't create NetworkAttachmentDefinition {}: {}", key, e);
                e
            })?;
            Ok(ReconcileAction::Created)
        }
        Some(found) if needs_update(&found, desired) => {
            info!("NetworkAttachmentDefinition {} changed, updating", key);
            let updated = merge_for_update(&found, desired);
            store.update_network(&updated, dry_run).await.map_err(|e| {
                error!("Couldn't update NetworkAttachmentDefinition {}: {}", key, e);
                e
            })?;
            Ok(ReconcileAction::Updated)
        }
        Some(_) => {
            debug!("NetworkAttachmentDefinition {} is up-to-date", key);
            Ok(ReconcileAction::Unchanged)
        }
    }
}

/// Reconciles a batch of documents in order, stopping at the first error.
pub async fn reconcile_networks(
    store: &dyn NetworkStore,
    documents: &[NetworkAttachmentDefinition],
    dry_run: bool,
) -> Result<Vec<(NetworkKey, ReconcileAction)>, IpManagerError> {
    let mut applied = Vec::with_capacity(documents.len());
    for document in documents {
        let action = reconcile_network(store, document, dry_run).await?;
        applied.push((NetworkKey::of(document)?, action));
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockNetworkStore, MockOperation};
    use crate::render::render_network;
    use crate::request::IpAddressSpec;
    use crds::RESOURCE_NAME_ANNOTATION;

    fn rendered(name: &str, vlan: i64) -> NetworkAttachmentDefinition {
        let spec = IpAddressSpec {
            name: name.to_string(),
            namespace: "ns1".to_string(),
            address: "10.0.0.5/24".to_string(),
            gateway: "10.0.0.1".to_string(),
            nameservers: "114.114.114.114".to_string(),
            vlan,
            ..Default::default()
        };
        render_network(&spec, "sriov-a").unwrap()
    }

    #[tokio::test]
    async fn test_reconcile_creates_missing_network() {
        let store = MockNetworkStore::new();
        let action = reconcile_network(&store, &rendered("net1", 10), false).await.unwrap();

        assert_eq!(action, ReconcileAction::Created);
        assert!(store.network("ns1", "net1").is_some());
        assert_eq!(store.calls().create_network, 1);
    }

    #[tokio::test]
    async fn test_reconcile_unchanged_is_noop() {
        let store = MockNetworkStore::new();
        store.add_network(rendered("net1", 10));

        let action = reconcile_network(&store, &rendered("net1", 10), false).await.unwrap();

        assert_eq!(action, ReconcileAction::Unchanged);
        assert_eq!(store.calls().create_network, 0);
        assert_eq!(store.calls().update_network, 0);
    }

    #[tokio::test]
    async fn test_reconcile_updates_with_stored_resource_version() {
        let store = MockNetworkStore::new();
        let mut stale = rendered("net1", 10);
        stale.metadata.resource_version = Some("41".to_string());
        stale
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert("owner/note".to_string(), "keep".to_string());
        store.add_network(stale);

        // The mock rejects updates whose resourceVersion does not match
        let action = reconcile_network(&store, &rendered("net1", 20), false).await.unwrap();

        assert_eq!(action, ReconcileAction::Updated);
        let stored = store.network("ns1", "net1").unwrap();
        assert_eq!(stored.spec, rendered("net1", 20).spec);
        let annotations = stored.metadata.annotations.unwrap();
        assert_eq!(annotations.get("owner/note").map(String::as_str), Some("keep"));
        assert_eq!(annotations.get(RESOURCE_NAME_ANNOTATION).map(String::as_str), Some("sriov-a"));
    }

    #[test]
    fn test_needs_update_ignores_formatting_and_foreign_annotations() {
        let desired = rendered("net1", 10);
        let mut found = desired.clone();
        let pretty: serde_json::Value = serde_json::from_str(&found.spec.config).unwrap();
        found.spec.config = serde_json::to_string_pretty(&pretty).unwrap();
        found
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert("kubectl.kubernetes.io/last-applied-configuration".to_string(), "{}".to_string());

        assert!(!needs_update(&found, &desired));
    }

    #[test]
    fn test_needs_update_detects_resource_name_change() {
        let desired = rendered("net1", 10);
        let mut found = desired.clone();
        found
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(RESOURCE_NAME_ANNOTATION.to_string(), "sriov-old".to_string());

        assert!(needs_update(&found, &desired));
    }

    #[tokio::test]
    async fn test_reconcile_batch_stops_at_first_error() {
        let store = MockNetworkStore::new();
        store.fail_for(MockOperation::CreateNetwork, "net2");
        let batch = vec![rendered("net1", 10), rendered("net2", 10), rendered("net3", 10)];

        let result = reconcile_networks(&store, &batch, false).await;

        assert!(matches!(result, Err(IpManagerError::Store(_))));
        // net1 stays applied, net3 is never attempted
        assert!(store.network("ns1", "net1").is_some());
        assert!(store.network("ns1", "net3").is_none());
        assert_eq!(store.calls().get_network, 2);
    }

    #[tokio::test]
    async fn test_reconcile_dry_run_persists_nothing() {
        let store = MockNetworkStore::new();
        let result = reconcile_networks(&store, &[rendered("net1", 10)], true).await.unwrap();

        assert_eq!(result, vec![(NetworkKey::new("ns1", "net1"), ReconcileAction::Created)]);
        assert_eq!(store.network_count(), 0);
    }
}
