//! Storage classes, claims and snapshot objects.

use super::status::TransferState;
use crate::meta::{LabelSelector, ObjectMeta};
use crate::quantity::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key under `requests` / `capacity` that holds the claim size.
pub const STORAGE_RESOURCE: &str = "storage";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageClass {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub provisioner: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_volume_expansion: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimPhase {
    #[default]
    Pending,
    Bound,
    Lost,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaim {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ClaimSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ClaimStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSpec {
    #[serde(default)]
    pub access_modes: Vec<AccessMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    #[serde(default)]
    pub resources: ClaimResources,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResources {
    #[serde(default)]
    pub requests: BTreeMap<String, Quantity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStatus {
    #[serde(default)]
    pub phase: ClaimPhase,

    #[serde(default)]
    pub capacity: BTreeMap<String, Quantity>,
}

impl PersistentVolumeClaim {
    pub fn requested_size(&self) -> Option<Quantity> {
        self.spec.resources.requests.get(STORAGE_RESOURCE).copied()
    }

    pub fn set_requested_size(&mut self, size: Quantity) {
        self.spec
            .resources
            .requests
            .insert(STORAGE_RESOURCE.to_string(), size);
    }

    /// Size the bound volume actually reports.
    pub fn capacity(&self) -> Option<Quantity> {
        self.status
            .as_ref()
            .and_then(|s| s.capacity.get(STORAGE_RESOURCE).copied())
    }

    pub fn is_bound(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.phase == ClaimPhase::Bound)
    }

    /// Shared volumes can be mounted by more than one node at a time.
    pub fn is_shared(&self) -> bool {
        self.spec
            .access_modes
            .iter()
            .any(|m| matches!(m, AccessMode::ReadOnlyMany | AccessMode::ReadWriteMany))
    }

    pub fn is_read_write_once(&self) -> bool {
        self.spec.access_modes.contains(&AccessMode::ReadWriteOnce)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshot {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: VolumeSnapshotSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VolumeSnapshotStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    #[serde(default)]
    pub persistent_volume_claim_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_data_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VolumeSnapshot {
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupVolumeSnapshot {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: GroupVolumeSnapshotSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GroupVolumeSnapshotStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupVolumeSnapshotSpec {
    #[serde(default)]
    pub pvc_selector: LabelSelector,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupVolumeSnapshotStatus {
    #[serde(default)]
    pub status: TransferState,

    /// Names of the member snapshots created for the group.
    #[serde(default)]
    pub volume_snapshots: Vec<String>,
}

impl GroupVolumeSnapshot {
    pub fn is_successful(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.status.is_success())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotRestore {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: VolumeSnapshotRestoreSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VolumeSnapshotRestoreStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotRestoreSpec {
    #[serde(default)]
    pub source_name: String,

    #[serde(default)]
    pub source_namespace: String,

    #[serde(default)]
    pub group_snapshot: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotRestoreStatus {
    #[serde(default)]
    pub status: TransferState,

    #[serde(default)]
    pub volumes: Vec<RestoreVolumeInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreVolumeInfo {
    /// Name of the restored volume.
    pub volume: String,

    /// Snapshot the volume was restored from.
    pub snapshot: String,

    #[serde(default)]
    pub status: TransferState,
}

impl VolumeSnapshotRestore {
    pub fn is_successful(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.status.is_success())
    }
}
