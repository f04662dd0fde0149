//! SR-IOV CNI NetworkAttachmentDefinition rendering.
//!
//! Rendering is a pure function of one [`IpAddressSpec`] and the request's
//! resource name. Optional VF settings are only emitted when they hold a
//! recognized value, and field order is fixed so the same input always
//! produces the same bytes.

use crate::error::IpManagerError;
use crate::request::{IpAddressSpec, LinkState, SwitchState};
use crds::{NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec, RESOURCE_NAME_ANNOTATION};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// CNI plugin type written into every rendered configuration.
pub const CNI_TYPE: &str = "sriov";

/// CNI spec version of the rendered configuration.
pub const CNI_VERSION: &str = "0.3.1";

/// VLAN priority range accepted by the SR-IOV CNI.
const VLAN_QOS_RANGE: std::ops::RangeInclusive<i64> = 0..=7;

/// SR-IOV CNI configuration stored in `spec.config`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SriovCniConfig {
    /// Always [`CNI_VERSION`]
    pub cni_version: String,
    /// Network name, same as the NetworkAttachmentDefinition name
    pub name: String,
    /// Always [`CNI_TYPE`]
    #[serde(rename = "type")]
    pub cni_type: String,
    /// VLAN id, 0 for untagged
    pub vlan: i64,
    /// 802.1p priority
    #[serde(rename = "vlanQoS", skip_serializing_if = "Option::is_none")]
    pub vlan_qos: Option<i64>,
    /// MAC spoof checking
    #[serde(rename = "spoofchk", skip_serializing_if = "Option::is_none")]
    pub spoof_chk: Option<SwitchState>,
    /// Trust mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust: Option<SwitchState>,
    /// VF link state
    #[serde(rename = "link_state", skip_serializing_if = "Option::is_none")]
    pub link_state: Option<LinkState>,
    /// Minimum transmit rate in Mbps
    #[serde(rename = "min_tx_rate", skip_serializing_if = "Option::is_none")]
    pub min_tx_rate: Option<i64>,
    /// Maximum transmit rate in Mbps
    #[serde(rename = "max_tx_rate", skip_serializing_if = "Option::is_none")]
    pub max_tx_rate: Option<i64>,
    /// Static address assignment
    pub ipam: StaticIpam,
}

/// `static` IPAM plugin section.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StaticIpam {
    /// Always `static`
    #[serde(rename = "type")]
    pub ipam_type: String,
    /// Exactly one address per rendered network
    pub addresses: Vec<StaticAddress>,
    /// Resolver configuration
    pub dns: Dns,
}

/// One address of the `static` IPAM plugin.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StaticAddress {
    /// Address in CIDR notation
    pub address: String,
    /// Gateway address
    pub gateway: String,
}

/// DNS section of the IPAM config.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Dns {
    /// Resolver addresses, in order
    pub nameservers: Vec<String>,
}

impl SriovCniConfig {
    /// Builds the CNI configuration for one address entry.
    pub fn from_spec(spec: &IpAddressSpec) -> Self {
        Self {
            cni_version: CNI_VERSION.to_string(),
            name: spec.name.clone(),
            cni_type: CNI_TYPE.to_string(),
            vlan: spec.vlan,
            vlan_qos: VLAN_QOS_RANGE.contains(&spec.vlan_qos).then_some(spec.vlan_qos),
            spoof_chk: spec.spoof_chk.configured(),
            trust: spec.trust.configured(),
            link_state: spec.link_state.configured(),
            min_tx_rate: spec.min_tx_rate.filter(|rate| *rate >= 0),
            max_tx_rate: spec.max_tx_rate.filter(|rate| *rate >= 0),
            ipam: StaticIpam {
                ipam_type: "static".to_string(),
                addresses: vec![StaticAddress {
                    address: spec.address.clone(),
                    gateway: spec.gateway.clone(),
                }],
                dns: Dns {
                    nameservers: spec.nameserver_list(),
                },
            },
        }
    }
}

/// Renders the NetworkAttachmentDefinition for one address entry.
pub fn render_network(
    spec: &IpAddressSpec,
    resource_name: &str,
) -> Result<NetworkAttachmentDefinition, IpManagerError> {
    let config = serde_json::to_string(&SriovCniConfig::from_spec(spec)).map_err(|e| {
        IpManagerError::Render(format!(
            "failed to render CNI config for {}/{}: {}",
            spec.namespace, spec.name, e
        ))
    })?;

    debug!("Rendered NetworkAttachmentDefinition {}/{}: {}", spec.namespace, spec.name, config);

    let annotations = BTreeMap::from([(RESOURCE_NAME_ANNOTATION.to_string(), resource_name.to_string())]);

    Ok(NetworkAttachmentDefinition {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: NetworkAttachmentDefinitionSpec { config },
    })
}
