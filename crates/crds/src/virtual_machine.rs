//! KubeVirt VirtualMachine
//!
//! Only used for two things: the ownership lookup done for pods created on
//! behalf of a `VirtualMachineInstance`, and the VirtualMachine admission
//! path. `VirtualMachineSpec` is kept loose because KubeVirt owns its schema.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Owner-reference kind set on virt-launcher pods.
pub const VIRTUAL_MACHINE_INSTANCE_KIND: &str = "VirtualMachineInstance";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, Default)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachine",
    shortname = "vm",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Legacy start/stop switch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,

    /// Run strategy (`Always`, `Halted`, `Manual`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_strategy: Option<String>,

    /// VirtualMachineInstance template, passed through untouched
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub template: serde_json::Value,
}
