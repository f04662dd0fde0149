//! SR-IOV network request annotation.
//!
//! Pods and VirtualMachines ask for static SR-IOV attachments through the
//! `k8s.v1.cni.cncf.io/sriovnetworks` annotation, for example:
//!
//! ```json
//! {"subnet":"10.0.0.0/24","resourcename":"sriov-a",
//!  "ippool":[{"name":"net1","address":"10.0.0.5/24","gateway":"10.0.0.1"}]}
//! ```

use crate::error::IpManagerError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::info;

/// Input annotation carrying the network request.
pub const SRIOV_NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/sriovnetworks";

/// Output annotation read by Multus.
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

/// Output annotation recording when the allocation happened.
pub const TRANSACTION_TIMESTAMP_ANNOTATION: &str = "kubeippool.io/transaction-timestamp";

/// Nameserver used when an entry does not name one.
pub const DEFAULT_NAMESERVERS: &str = "114.114.114.114";

/// Parsed `sriovnetworks` annotation.
///
/// Keys are matched case-insensitively: the raw document has every object key
/// folded to lowercase before it is deserialized. A `null` value reads as the
/// field default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NetworkRequest {
    /// Subnet the addresses belong to (informational)
    #[serde(default, deserialize_with = "null_as_default")]
    pub subnet: String,

    /// Device-plugin resource the VFs are taken from
    #[serde(default, rename = "resourcename", deserialize_with = "null_as_default")]
    pub resource_name: String,

    /// One entry per attachment, in request order
    #[serde(default, rename = "ippool", deserialize_with = "null_as_default")]
    pub ip_pool: Vec<IpAddressSpec>,
}

/// A single static address attachment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all(serialize = "camelCase", deserialize = "lowercase"))]
pub struct IpAddressSpec {
    /// Name of the NetworkAttachmentDefinition to render
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    /// Namespace of the NetworkAttachmentDefinition (defaults to the object's)
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    pub namespace: String,

    /// Address in CIDR notation
    #[serde(default, deserialize_with = "null_as_default")]
    pub address: String,

    /// Gateway address
    #[serde(default, deserialize_with = "null_as_default")]
    pub gateway: String,

    /// Comma separated nameservers (defaults to [`DEFAULT_NAMESERVERS`])
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "null_as_default")]
    pub nameservers: String,

    /// VLAN id, only rendered when positive
    #[serde(default, deserialize_with = "null_as_default")]
    pub vlan: i64,

    /// 802.1p priority, only rendered within 0..=7
    #[serde(default, rename(serialize = "vlanQoS", deserialize = "vlanqos"), deserialize_with = "null_as_default")]
    pub vlan_qos: i64,

    /// VF MAC spoof checking
    #[serde(default)]
    pub spoof_chk: SwitchState,

    /// VF trust mode
    #[serde(default)]
    pub trust: SwitchState,

    /// VF link state
    #[serde(default)]
    pub link_state: LinkState,

    /// Mbps, only rendered when non-negative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_tx_rate: Option<i64>,

    /// Mbps, only rendered when non-negative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tx_rate: Option<i64>,
}

/// On/off VF setting. Anything unrecognized, including `null`, becomes `Unset`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(from = "Option<String>", rename_all = "lowercase")]
pub enum SwitchState {
    /// Rendered as `"on"`
    On,
    /// Rendered as `"off"`
    Off,
    /// Left out of the rendered config
    #[default]
    Unset,
}

impl From<Option<String>> for SwitchState {
    fn from(value: Option<String>) -> Self {
        match value.as_deref() {
            Some("on") => SwitchState::On,
            Some("off") => SwitchState::Off,
            _ => SwitchState::Unset,
        }
    }
}

impl SwitchState {
    /// Returns the state if it should be rendered.
    pub fn configured(self) -> Option<Self> {
        (self != SwitchState::Unset).then_some(self)
    }
}

/// VF link state. Anything unrecognized, including `null`, becomes `Unset`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(from = "Option<String>", rename_all = "lowercase")]
pub enum LinkState {
    /// Link forced up
    Enable,
    /// Link forced down
    Disable,
    /// Link follows the PF
    Auto,
    /// Left out of the rendered config
    #[default]
    Unset,
}

impl From<Option<String>> for LinkState {
    fn from(value: Option<String>) -> Self {
        match value.as_deref() {
            Some("enable") => LinkState::Enable,
            Some("disable") => LinkState::Disable,
            Some("auto") => LinkState::Auto,
            _ => LinkState::Unset,
        }
    }
}

impl LinkState {
    /// Returns the state if it should be rendered.
    pub fn configured(self) -> Option<Self> {
        (self != LinkState::Unset).then_some(self)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Lowercases every object key so field lookup ignores case.
fn fold_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key.to_lowercase(), fold_keys(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(fold_keys).collect()),
        other => other,
    }
}

impl IpAddressSpec {
    /// Nameservers as a list, split on commas.
    pub fn nameserver_list(&self) -> Vec<String> {
        self.nameservers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Parses the `sriovnetworks` annotation value.
///
/// Returns:
/// - `Err(Validation)` if `raw` is empty or is malformed JSON
/// - `Ok(None)` if `raw` does not look like JSON at all (ignored)
/// - `Ok(Some(request))` otherwise, with namespaces and nameservers defaulted
pub fn parse_network_request(
    raw: &str,
    default_namespace: &str,
) -> Result<Option<NetworkRequest>, IpManagerError> {
    if raw.is_empty() {
        return Err(IpManagerError::Validation(format!(
            "missing required annotation {}",
            SRIOV_NETWORKS_ANNOTATION
        )));
    }

    if !raw.contains(['[', '{', '"']) {
        info!("Annotation {} is not JSON formatted, ignoring it", SRIOV_NETWORKS_ANNOTATION);
        return Ok(None);
    }

    let invalid = |e: serde_json::Error| {
        IpManagerError::Validation(format!(
            "failed to parse {} annotation: {}",
            SRIOV_NETWORKS_ANNOTATION, e
        ))
    };
    let document: Value = serde_json::from_str(raw).map_err(invalid)?;
    let mut request: NetworkRequest = serde_json::from_value(fold_keys(document)).map_err(invalid)?;

    for (index, entry) in request.ip_pool.iter_mut().enumerate() {
        if entry.name.is_empty() {
            return Err(IpManagerError::Validation(format!(
                "ippool entry {} has no name",
                index
            )));
        }
        if entry.namespace.is_empty() {
            entry.namespace = default_namespace.to_string();
        }
        if entry.nameservers.is_empty() {
            entry.nameservers = DEFAULT_NAMESERVERS.to_string();
        }
    }

    Ok(Some(request))
}
