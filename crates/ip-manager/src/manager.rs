//! Allocation flow.
//!
//! [`IpManager`] runs one allocation per admitted object:
//! 1. Read and parse the `sriovnetworks` annotation
//! 2. Acquire the allocation locks for every requested network
//! 3. Pods only: skip if a VirtualMachine owns the pod
//! 4. Render a NetworkAttachmentDefinition per address entry
//! 5. Reconcile them against the store
//! 6. Record the first network and the transaction timestamp on the object
//!
//! The locks are released when the allocation returns, on every path.

use crate::error::IpManagerError;
use crate::ownership::{is_owned_elsewhere, OwnerLookupPolicy};
use crate::reconciler::{reconcile_networks, NetworkKey, ReconcileAction};
use crate::render::render_network;
use crate::request::{
    parse_network_request, NetworkRequest, NETWORKS_ANNOTATION, SRIOV_NETWORKS_ANNOTATION,
    TRANSACTION_TIMESTAMP_ANNOTATION,
};
use crate::serializer::{AllocationLocks, LockScope};
use crate::store::NetworkStore;
use crate::timestamp::{format_transaction_timestamp, Clock, SystemClock};
use crds::VirtualMachine;
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Why an object was admitted without mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The object has no `sriovnetworks` annotation
    NoRequest,
    /// The annotation is not JSON shaped
    NotJsonShaped,
    /// The request lists no addresses
    EmptyPool,
    /// A VirtualMachine allocates for this pod
    OwnedElsewhere,
}

/// Result of one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    /// The object was left untouched
    Skipped(SkipReason),
    /// Networks were reconciled and the object annotated
    Allocated {
        /// Every reconciled network, in request order
        networks: Vec<(NetworkKey, ReconcileAction)>,
    },
}

impl AllocationOutcome {
    /// Returns true if the object was annotated.
    pub fn is_allocated(&self) -> bool {
        matches!(self, AllocationOutcome::Allocated { .. })
    }
}

/// Tunables for [`IpManager`].
#[derive(Debug, Clone, Copy)]
pub struct ManagerOptions {
    /// Granularity of the allocation locks
    pub lock_scope: LockScope,
    /// Longest wait for every lock of one allocation (default 10s)
    pub lock_timeout: Duration,
    /// What to do when the owning VirtualMachine cannot be looked up
    pub owner_policy: OwnerLookupPolicy,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            lock_scope: LockScope::default(),
            lock_timeout: Duration::from_secs(10),
            owner_policy: OwnerLookupPolicy::default(),
        }
    }
}

enum Prepared {
    Request(NetworkRequest),
    Skip(SkipReason),
}

/// Allocates SR-IOV networks for pods and VirtualMachines.
pub struct IpManager {
    store: Arc<dyn NetworkStore>,
    clock: Arc<dyn Clock>,
    locks: AllocationLocks,
    owner_policy: OwnerLookupPolicy,
}

impl std::fmt::Debug for IpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpManager")
            .field("locks", &self.locks)
            .field("owner_policy", &self.owner_policy)
            .finish_non_exhaustive()
    }
}

impl IpManager {
    /// Creates a manager stamping allocations with the wall clock.
    pub fn new(store: Arc<dyn NetworkStore>, options: ManagerOptions) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), options)
    }

    /// Creates a manager stamping allocations with `clock`.
    pub fn with_clock(store: Arc<dyn NetworkStore>, clock: Arc<dyn Clock>, options: ManagerOptions) -> Self {
        Self {
            store,
            clock,
            locks: AllocationLocks::new(options.lock_scope, options.lock_timeout),
            owner_policy: options.owner_policy,
        }
    }

    /// Allocates the networks requested by a pod, mutating its annotations.
    pub async fn allocate_pod_ip(&self, pod: &mut Pod, dry_run: bool) -> Result<AllocationOutcome, IpManagerError> {
        let request = match prepare(pod)? {
            Prepared::Request(request) => request,
            Prepared::Skip(reason) => return Ok(AllocationOutcome::Skipped(reason)),
        };

        let _guard = self.locks.acquire(network_keys(&request)).await?;

        if is_owned_elsewhere(self.store.as_ref(), pod, self.owner_policy).await? {
            info!(
                "Pod {}/{} is allocated through its VirtualMachine, skipping",
                pod.namespace().unwrap_or_default(),
                pod.name_any()
            );
            return Ok(AllocationOutcome::Skipped(SkipReason::OwnedElsewhere));
        }

        self.apply(pod, &request, dry_run).await
    }

    /// Allocates the networks requested by a VirtualMachine, mutating its annotations.
    pub async fn allocate_vm_ip(
        &self,
        vm: &mut VirtualMachine,
        dry_run: bool,
    ) -> Result<AllocationOutcome, IpManagerError> {
        let request = match prepare(vm)? {
            Prepared::Request(request) => request,
            Prepared::Skip(reason) => return Ok(AllocationOutcome::Skipped(reason)),
        };

        let _guard = self.locks.acquire(network_keys(&request)).await?;
        self.apply(vm, &request, dry_run).await
    }

    async fn apply<K>(
        &self,
        object: &mut K,
        request: &NetworkRequest,
        dry_run: bool,
    ) -> Result<AllocationOutcome, IpManagerError>
    where
        K: Resource<DynamicType = ()>,
    {
        let documents = request
            .ip_pool
            .iter()
            .map(|spec| render_network(spec, &request.resource_name))
            .collect::<Result<Vec<_>, _>>()?;

        let networks = reconcile_networks(self.store.as_ref(), &documents, dry_run).await?;

        // Only the first network is surfaced on the object
        let Some((first, _)) = networks.first() else {
            return Ok(AllocationOutcome::Skipped(SkipReason::EmptyPool));
        };
        let reference = serde_json::to_string(&[first])?;
        let stamp = format_transaction_timestamp(self.clock.now());

        let annotations = object.annotations_mut();
        annotations.insert(NETWORKS_ANNOTATION.to_string(), reference);
        annotations.insert(TRANSACTION_TIMESTAMP_ANNOTATION.to_string(), stamp);

        info!(
            "Allocated {} network(s) for {} {}/{} (dry_run: {})",
            networks.len(),
            K::kind(&()),
            object.namespace().unwrap_or_default(),
            object.name_any(),
            dry_run
        );

        Ok(AllocationOutcome::Allocated { networks })
    }
}

fn prepare<K>(object: &K) -> Result<Prepared, IpManagerError>
where
    K: Resource<DynamicType = ()>,
{
    let Some(raw) = object.annotations().get(SRIOV_NETWORKS_ANNOTATION) else {
        debug!(
            "{} {}/{} has no {} annotation",
            K::kind(&()),
            object.namespace().unwrap_or_default(),
            object.name_any(),
            SRIOV_NETWORKS_ANNOTATION
        );
        return Ok(Prepared::Skip(SkipReason::NoRequest));
    };

    let namespace = object.namespace().unwrap_or_default();
    let Some(request) = parse_network_request(raw, &namespace)? else {
        return Ok(Prepared::Skip(SkipReason::NotJsonShaped));
    };

    if request.ip_pool.is_empty() {
        debug!(
            "{} {}/{} requests an empty ippool",
            K::kind(&()),
            namespace,
            object.name_any()
        );
        return Ok(Prepared::Skip(SkipReason::EmptyPool));
    }

    Ok(Prepared::Request(request))
}

fn network_keys(request: &NetworkRequest) -> Vec<NetworkKey> {
    request
        .ip_pool
        .iter()
        .map(|spec| NetworkKey::new(spec.namespace.clone(), spec.name.clone()))
        .collect()
}
