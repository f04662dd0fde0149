//! NetworkAttachmentDefinition CRD
//!
//! The Multus network-attachment resource. Only `spec.config` is defined by
//! the upstream API: a CNI configuration serialized as a JSON string.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation naming the device-plugin resource backing an SR-IOV network.
pub const RESOURCE_NAME_ANNOTATION: &str = "k8s.v1.cni.cncf.io/resourceName";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1",
    kind = "NetworkAttachmentDefinition",
    plural = "network-attachment-definitions",
    shortname = "net-attach-def",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachmentDefinitionSpec {
    /// CNI plugin configuration (JSON document as a string)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_resource_identity_matches_multus() {
        assert_eq!(NetworkAttachmentDefinition::group(&()), "k8s.cni.cncf.io");
        assert_eq!(NetworkAttachmentDefinition::version(&()), "v1");
        assert_eq!(NetworkAttachmentDefinition::plural(&()), "network-attachment-definitions");
    }

    #[test]
    fn test_empty_config_is_omitted() {
        let value = serde_json::to_value(NetworkAttachmentDefinitionSpec::default()).unwrap();
        assert_eq!(value, serde_json::json!({}));
    }
}
