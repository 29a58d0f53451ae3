//! Cluster-level objects that are never part of an application template.

use crate::meta::ObjectMeta;
use serde::{Deserialize, Serialize};

pub const ZONE_LABEL: &str = "failure-domain.beta.kubernetes.io/zone";
pub const REGION_LABEL: &str = "failure-domain.beta.kubernetes.io/region";
pub const MASTER_ROLE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub metadata: ObjectMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressType {
    InternalIP,
    ExternalIP,
    Hostname,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub address_type: AddressType,
    pub address: String,
}

/// A cluster node as the control plane reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNode {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub addresses: Vec<NodeAddress>,

    /// Set while the node is cordoned.
    #[serde(default)]
    pub unschedulable: bool,

    #[serde(default)]
    pub ready: bool,
}

impl ClusterNode {
    pub fn is_master(&self) -> bool {
        MASTER_ROLE_LABELS
            .iter()
            .any(|label| self.metadata.labels.contains_key(*label))
    }

    pub fn zone(&self) -> Option<&str> {
        self.metadata.label(ZONE_LABEL)
    }

    pub fn region(&self) -> Option<&str> {
        self.metadata.label(REGION_LABEL)
    }

    pub fn internal_addresses(&self) -> Vec<String> {
        self.addresses
            .iter()
            .filter(|a| a.address_type == AddressType::InternalIP)
            .map(|a| a.address.clone())
            .collect()
    }
}
