//! Static SR-IOV network allocation
//!
//! Allocates static SR-IOV network attachments for pods and KubeVirt
//! VirtualMachines at admission time. A request annotation is parsed into
//! address entries, each entry is rendered into a Multus
//! `NetworkAttachmentDefinition`, and the rendered objects are created or
//! updated in the cluster before the admitted object is annotated with the
//! result.
//!
//! # Example
//!
//! ```no_run
//! use ip_manager::{IpManager, KubeNetworkStore, ManagerOptions};
//! use k8s_openapi::api::core::v1::Pod;
//! use std::sync::Arc;
//!
//! # async fn example(mut pod: Pod) -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let manager = IpManager::new(Arc::new(KubeNetworkStore::new(client)), ManagerOptions::default());
//!
//! let outcome = manager.allocate_pod_ip(&mut pod, false).await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Idempotent reconciliation**: retried admissions converge without duplicate creates
//! - **Keyed locking**: allocations for the same network never interleave
//! - **Ownership detection**: pods of a VirtualMachine are left to the VirtualMachine
//! - **Deterministic rendering**: identical requests render identical configs

pub mod error;
pub mod manager;
pub mod ownership;
pub mod reconciler;
pub mod render;
pub mod request;
pub mod responder;
pub mod serializer;
pub mod store;
pub mod timestamp;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;


pub use error::{ErrorClass, IpManagerError, StoreError};
pub use manager::{AllocationOutcome, IpManager, ManagerOptions, SkipReason};
pub use ownership::OwnerLookupPolicy;
pub use reconciler::{NetworkKey, ReconcileAction};
pub use request::{
    NetworkRequest, IpAddressSpec, NETWORKS_ANNOTATION, SRIOV_NETWORKS_ANNOTATION,
    TRANSACTION_TIMESTAMP_ANNOTATION,
};
pub use responder::patch_annotation_changes;
pub use serializer::LockScope;
pub use store::{KubeNetworkStore, NetworkStore};
pub use timestamp::{Clock, FixedClock, SystemClock};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockNetworkStore;
