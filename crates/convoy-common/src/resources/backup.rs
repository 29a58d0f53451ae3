//! Application-level backup, restore and clone objects.

use super::status::TransferStatus;
use crate::meta::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupLocation {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub location: BackupLocationItem,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupLocationItem {
    /// Object store flavour, e.g. `s3`, `azure`, `google`.
    #[serde(default, rename = "type")]
    pub location_type: String,

    #[serde(default)]
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_config: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationBackup {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ApplicationBackupSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransferStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationBackupSpec {
    #[serde(default)]
    pub namespaces: Vec<String>,

    #[serde(default)]
    pub backup_location: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selectors: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reclaim_policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRestore {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ApplicationRestoreSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransferStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRestoreSpec {
    #[serde(default)]
    pub backup_name: String,

    #[serde(default)]
    pub backup_location: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_mapping: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationClone {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ApplicationCloneSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransferStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationCloneSpec {
    #[serde(default)]
    pub source_namespace: String,

    #[serde(default)]
    pub destination_namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selectors: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_policy: Option<String>,
}
