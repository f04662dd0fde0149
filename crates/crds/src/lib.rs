//! Kubernetes resource definitions for the SR-IOV webhook.
//!
//! Neither resource is owned by this project: the
//! `NetworkAttachmentDefinition` CRD is installed by Multus and the
//! `VirtualMachine` CRD by KubeVirt. The types here only cover the fields
//! the webhook reads or writes.

pub mod network_attachment;
pub mod virtual_machine;

pub use network_attachment::*;
pub use virtual_machine::*;
