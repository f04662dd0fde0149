//! Ownership resolution for KubeVirt launcher pods.
//!
//! A pod created for a `VirtualMachineInstance` that belongs to a durable
//! `VirtualMachine` is allocated through the VirtualMachine admission path,
//! so the pod itself must be left alone. A VMI without a VirtualMachine is
//! ephemeral and its pod is allocated like any standalone pod.

use crate::error::IpManagerError;
use crate::store::NetworkStore;
use crds::VIRTUAL_MACHINE_INSTANCE_KIND;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, error, warn};

/// What to do when the VirtualMachine lookup fails with something other
/// than not-found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnerLookupPolicy {
    /// Fail the admission with a server error so the caller retries
    #[default]
    Fail,
    /// Assume the VirtualMachine exists and skip the pod
    Skip,
}

impl std::str::FromStr for OwnerLookupPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "fail" => Ok(OwnerLookupPolicy::Fail),
            "skip" => Ok(OwnerLookupPolicy::Skip),
            other => Err(format!("unknown owner lookup policy '{}', expected 'fail' or 'skip'", other)),
        }
    }
}

/// Returns true if the pod's networks are allocated by a VirtualMachine.
pub async fn is_owned_elsewhere(
    store: &dyn NetworkStore,
    pod: &Pod,
    policy: OwnerLookupPolicy,
) -> Result<bool, IpManagerError> {
    let Some(owner) = pod
        .owner_references()
        .iter()
        .find(|owner| owner.kind == VIRTUAL_MACHINE_INSTANCE_KIND)
    else {
        return Ok(false);
    };

    let namespace = pod.namespace().unwrap_or_default();

    match store.get_virtual_machine(&namespace, &owner.name).await {
        Ok(Some(_)) => {
            debug!(
                "Pod {}/{} belongs to VirtualMachine {}, skipping",
                namespace,
                pod.name_any(),
                owner.name
            );
            Ok(true)
        }
        Ok(None) => {
            debug!(
                "Pod {}/{} belongs to ephemeral VirtualMachineInstance {}, allocating as a regular pod",
                namespace,
                pod.name_any(),
                owner.name
            );
            Ok(false)
        }
        Err(e) => match policy {
            OwnerLookupPolicy::Skip => {
                warn!(
                    "Couldn't look up VirtualMachine {}/{} ({}), assuming it owns pod {}",
                    namespace,
                    owner.name,
                    e,
                    pod.name_any()
                );
                Ok(true)
            }
            OwnerLookupPolicy::Fail => {
                error!(
                    "Couldn't look up VirtualMachine {}/{} owning pod {}: {}",
                    namespace,
                    owner.name,
                    pod.name_any(),
                    e
                );
                Err(IpManagerError::Store(e))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::mock::{MockNetworkStore, MockOperation};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn pod_owned_by(kind: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("virt-launcher-vm1-abcde".to_string()),
                namespace: Some("ns1".to_string()),
                owner_references: Some(vec![OwnerReference {
                    api_version: "kubevirt.io/v1".to_string(),
                    kind: kind.to_string(),
                    name: name.to_string(),
                    uid: "1234".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pod_without_owners_is_standalone() {
        let store = MockNetworkStore::new();
        let pod = Pod::default();

        assert!(!is_owned_elsewhere(&store, &pod, OwnerLookupPolicy::Fail).await.unwrap());
        assert_eq!(store.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_non_vmi_owner_is_standalone() {
        let store = MockNetworkStore::new();
        let pod = pod_owned_by("ReplicaSet", "web-5d4f");

        assert!(!is_owned_elsewhere(&store, &pod, OwnerLookupPolicy::Fail).await.unwrap());
        assert_eq!(store.calls().get_virtual_machine, 0);
    }

    #[tokio::test]
    async fn test_vmi_with_virtual_machine_is_owned() {
        let store = MockNetworkStore::new();
        store.add_virtual_machine("ns1", "vm1");

        let pod = pod_owned_by(VIRTUAL_MACHINE_INSTANCE_KIND, "vm1");
        assert!(is_owned_elsewhere(&store, &pod, OwnerLookupPolicy::Fail).await.unwrap());
    }

    #[tokio::test]
    async fn test_ephemeral_vmi_is_standalone() {
        let store = MockNetworkStore::new();

        let pod = pod_owned_by(VIRTUAL_MACHINE_INSTANCE_KIND, "vm1");
        assert!(!is_owned_elsewhere(&store, &pod, OwnerLookupPolicy::Fail).await.unwrap());
        assert_eq!(store.calls().get_virtual_machine, 1);
    }

    #[tokio::test]
    async fn test_lookup_error_follows_policy() {
        let store = MockNetworkStore::new();
        store.fail(MockOperation::GetVirtualMachine);
        let pod = pod_owned_by(VIRTUAL_MACHINE_INSTANCE_KIND, "vm1");

        let failed = is_owned_elsewhere(&store, &pod, OwnerLookupPolicy::Fail).await;
        assert!(matches!(failed, Err(IpManagerError::Store(StoreError::Unavailable(_)))));

        assert!(is_owned_elsewhere(&store, &pod, OwnerLookupPolicy::Skip).await.unwrap());
    }
}
