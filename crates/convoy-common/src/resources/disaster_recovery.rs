//! Cross-cluster replication objects: pairs, migrations and their schedules.

use super::status::{TransferState, TransferStatus};
use crate::meta::ObjectMeta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairStatus {
    #[default]
    Pending,
    Ready,
    NotProvided,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPair {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ClusterPairSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ClusterPairStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPairSpec {
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPairStatus {
    #[serde(default)]
    pub scheduler_status: PairStatus,

    #[serde(default)]
    pub storage_status: PairStatus,
}

impl ClusterPair {
    /// Scheduler side must be ready; storage side may be ready or not paired at all.
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.scheduler_status == PairStatus::Ready
                && matches!(s.storage_status, PairStatus::Ready | PairStatus::NotProvided)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: MigrationSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransferStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSpec {
    #[serde(default)]
    pub cluster_pair: String,

    #[serde(default)]
    pub namespaces: Vec<String>,

    #[serde(default)]
    pub include_resources: bool,

    #[serde(default)]
    pub start_applications: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selectors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSchedule {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: MigrationScheduleSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MigrationScheduleStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationScheduleSpec {
    #[serde(default)]
    pub template: MigrationSpec,

    #[serde(default)]
    pub schedule_policy_name: String,

    #[serde(default)]
    pub suspend: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationScheduleStatus {
    #[serde(default)]
    pub items: Vec<ScheduledTransfer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTransfer {
    pub name: String,
    pub status: TransferState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl MigrationSchedule {
    /// Most recent migration triggered by this schedule.
    pub fn latest_transfer(&self) -> Option<&ScheduledTransfer> {
        self.status.as_ref().and_then(|s| s.items.last())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePolicy {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub policy: SchedulePolicyItem,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePolicyItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<IntervalPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<TimeOfDayPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly: Option<WeeklyPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalPolicy {
    pub interval_minutes: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeOfDayPolicy {
    pub time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPolicy {
    pub day: String,
    pub time: String,
}
