//! Resource kinds and the materialization phases they belong to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered materialization phases. Every object in one phase is live before
/// any object in the next phase is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The application namespace itself
    Namespace,
    /// Cluster pairs, migrations, migration schedules, schedule policies
    Migration,
    /// Volume snapshot restores
    SnapshotRestore,
    /// Storage classes, claims, snapshots, group snapshots
    Storage,
    /// Workloads, services, secrets, config maps, rules, pods, scaling rules
    Core,
    /// Backup locations and application backup/restore/clone
    Backup,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Namespace,
        Phase::Migration,
        Phase::SnapshotRestore,
        Phase::Storage,
        Phase::Core,
        Phase::Backup,
    ];

    /// Phases that hold resource descriptors, in creation order.
    pub const DESCRIPTOR_PHASES: [Phase; 5] = [
        Phase::Migration,
        Phase::SnapshotRestore,
        Phase::Storage,
        Phase::Core,
        Phase::Backup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Namespace => "namespace",
            Phase::Migration => "migration",
            Phase::SnapshotRestore => "snapshot-restore",
            Phase::Storage => "storage",
            Phase::Core => "core",
            Phase::Backup => "backup",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    ClusterPair,
    Migration,
    MigrationSchedule,
    SchedulePolicy,
    VolumeSnapshotRestore,
    StorageClass,
    PersistentVolumeClaim,
    VolumeSnapshot,
    GroupVolumeSnapshot,
    Deployment,
    StatefulSet,
    Service,
    Secret,
    ConfigMap,
    Rule,
    Pod,
    ScalingRule,
    BackupLocation,
    ApplicationBackup,
    ApplicationRestore,
    ApplicationClone,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 21] = [
        ResourceKind::ClusterPair,
        ResourceKind::Migration,
        ResourceKind::MigrationSchedule,
        ResourceKind::SchedulePolicy,
        ResourceKind::VolumeSnapshotRestore,
        ResourceKind::StorageClass,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::VolumeSnapshot,
        ResourceKind::GroupVolumeSnapshot,
        ResourceKind::Deployment,
        ResourceKind::StatefulSet,
        ResourceKind::Service,
        ResourceKind::Secret,
        ResourceKind::ConfigMap,
        ResourceKind::Rule,
        ResourceKind::Pod,
        ResourceKind::ScalingRule,
        ResourceKind::BackupLocation,
        ResourceKind::ApplicationBackup,
        ResourceKind::ApplicationRestore,
        ResourceKind::ApplicationClone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ClusterPair => "ClusterPair",
            ResourceKind::Migration => "Migration",
            ResourceKind::MigrationSchedule => "MigrationSchedule",
            ResourceKind::SchedulePolicy => "SchedulePolicy",
            ResourceKind::VolumeSnapshotRestore => "VolumeSnapshotRestore",
            ResourceKind::StorageClass => "StorageClass",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKind::VolumeSnapshot => "VolumeSnapshot",
            ResourceKind::GroupVolumeSnapshot => "GroupVolumeSnapshot",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::Service => "Service",
            ResourceKind::Secret => "Secret",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Rule => "Rule",
            ResourceKind::Pod => "Pod",
            ResourceKind::ScalingRule => "ScalingRule",
            ResourceKind::BackupLocation => "BackupLocation",
            ResourceKind::ApplicationBackup => "ApplicationBackup",
            ResourceKind::ApplicationRestore => "ApplicationRestore",
            ResourceKind::ApplicationClone => "ApplicationClone",
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            ResourceKind::ClusterPair
            | ResourceKind::Migration
            | ResourceKind::MigrationSchedule
            | ResourceKind::SchedulePolicy => Phase::Migration,
            ResourceKind::VolumeSnapshotRestore => Phase::SnapshotRestore,
            ResourceKind::StorageClass
            | ResourceKind::PersistentVolumeClaim
            | ResourceKind::VolumeSnapshot
            | ResourceKind::GroupVolumeSnapshot => Phase::Storage,
            ResourceKind::Deployment
            | ResourceKind::StatefulSet
            | ResourceKind::Service
            | ResourceKind::Secret
            | ResourceKind::ConfigMap
            | ResourceKind::Rule
            | ResourceKind::Pod
            | ResourceKind::ScalingRule => Phase::Core,
            ResourceKind::BackupLocation
            | ResourceKind::ApplicationBackup
            | ResourceKind::ApplicationRestore
            | ResourceKind::ApplicationClone => Phase::Backup,
        }
    }

    /// Cluster-scoped kinds never receive the application namespace.
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(
            self,
            ResourceKind::StorageClass | ResourceKind::SchedulePolicy | ResourceKind::ScalingRule
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unsupported resource kind '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_totally_ordered() {
        let mut shuffled = vec![Phase::Backup, Phase::Namespace, Phase::Core, Phase::Storage];
        shuffled.sort();
        assert_eq!(
            shuffled,
            vec![Phase::Namespace, Phase::Storage, Phase::Core, Phase::Backup]
        );
        assert!(Phase::Migration < Phase::SnapshotRestore);
    }

    #[test]
    fn every_kind_maps_to_a_descriptor_phase() {
        for kind in ResourceKind::ALL {
            assert!(Phase::DESCRIPTOR_PHASES.contains(&kind.phase()), "{}", kind);
        }
        assert_eq!(ResourceKind::PersistentVolumeClaim.phase(), Phase::Storage);
        assert_eq!(ResourceKind::Deployment.phase(), Phase::Core);
        assert_eq!(ResourceKind::ClusterPair.phase(), Phase::Migration);
        assert_eq!(ResourceKind::ApplicationClone.phase(), Phase::Backup);
    }

    #[test]
    fn kind_names_round_trip_through_from_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
        }
        assert!("CronJob".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn cluster_scoped_kinds() {
        assert!(ResourceKind::StorageClass.is_cluster_scoped());
        assert!(ResourceKind::ScalingRule.is_cluster_scoped());
        assert!(!ResourceKind::PersistentVolumeClaim.is_cluster_scoped());
    }
}
