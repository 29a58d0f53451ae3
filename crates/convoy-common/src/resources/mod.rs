//! Typed resource descriptors.
//!
//! Every object an application template can declare is one variant of
//! [`Resource`]. The variant decides the materialization phase, the readiness
//! predicate and the teardown path; callers match on it exhaustively so a new
//! kind cannot be added without handling it everywhere.
//!
//! Descriptors decode from the same YAML shape the cluster accepts:
//!
//! ```yaml
//! kind: PersistentVolumeClaim
//! metadata:
//!   name: mysql-data
//! spec:
//!   accessModes: [ReadWriteOnce]
//!   resources:
//!     requests:
//!       storage: 2Gi
//! ```

mod backup;
mod cluster;
mod disaster_recovery;
mod status;
mod storage;
mod workload;

pub use backup::*;
pub use cluster::*;
pub use disaster_recovery::*;
pub use status::*;
pub use storage::*;
pub use workload::*;

use crate::kind::{Phase, ResourceKind};
use crate::meta::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Resource {
    ClusterPair(ClusterPair),
    Migration(Migration),
    MigrationSchedule(MigrationSchedule),
    SchedulePolicy(SchedulePolicy),
    VolumeSnapshotRestore(VolumeSnapshotRestore),
    StorageClass(StorageClass),
    PersistentVolumeClaim(PersistentVolumeClaim),
    VolumeSnapshot(VolumeSnapshot),
    GroupVolumeSnapshot(GroupVolumeSnapshot),
    Deployment(Deployment),
    StatefulSet(StatefulSet),
    Service(Service),
    Secret(Secret),
    ConfigMap(ConfigMap),
    Rule(Rule),
    Pod(Pod),
    ScalingRule(ScalingRule),
    BackupLocation(BackupLocation),
    ApplicationBackup(ApplicationBackup),
    ApplicationRestore(ApplicationRestore),
    ApplicationClone(ApplicationClone),
}

/// Expands `$body` once per variant with `$obj` bound to the payload.
macro_rules! each_variant {
    ($value:expr, $obj:ident => $body:expr) => {
        match $value {
            Resource::ClusterPair($obj) => $body,
            Resource::Migration($obj) => $body,
            Resource::MigrationSchedule($obj) => $body,
            Resource::SchedulePolicy($obj) => $body,
            Resource::VolumeSnapshotRestore($obj) => $body,
            Resource::StorageClass($obj) => $body,
            Resource::PersistentVolumeClaim($obj) => $body,
            Resource::VolumeSnapshot($obj) => $body,
            Resource::GroupVolumeSnapshot($obj) => $body,
            Resource::Deployment($obj) => $body,
            Resource::StatefulSet($obj) => $body,
            Resource::Service($obj) => $body,
            Resource::Secret($obj) => $body,
            Resource::ConfigMap($obj) => $body,
            Resource::Rule($obj) => $body,
            Resource::Pod($obj) => $body,
            Resource::ScalingRule($obj) => $body,
            Resource::BackupLocation($obj) => $body,
            Resource::ApplicationBackup($obj) => $body,
            Resource::ApplicationRestore($obj) => $body,
            Resource::ApplicationClone($obj) => $body,
        }
    };
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::ClusterPair(_) => ResourceKind::ClusterPair,
            Resource::Migration(_) => ResourceKind::Migration,
            Resource::MigrationSchedule(_) => ResourceKind::MigrationSchedule,
            Resource::SchedulePolicy(_) => ResourceKind::SchedulePolicy,
            Resource::VolumeSnapshotRestore(_) => ResourceKind::VolumeSnapshotRestore,
            Resource::StorageClass(_) => ResourceKind::StorageClass,
            Resource::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            Resource::VolumeSnapshot(_) => ResourceKind::VolumeSnapshot,
            Resource::GroupVolumeSnapshot(_) => ResourceKind::GroupVolumeSnapshot,
            Resource::Deployment(_) => ResourceKind::Deployment,
            Resource::StatefulSet(_) => ResourceKind::StatefulSet,
            Resource::Service(_) => ResourceKind::Service,
            Resource::Secret(_) => ResourceKind::Secret,
            Resource::ConfigMap(_) => ResourceKind::ConfigMap,
            Resource::Rule(_) => ResourceKind::Rule,
            Resource::Pod(_) => ResourceKind::Pod,
            Resource::ScalingRule(_) => ResourceKind::ScalingRule,
            Resource::BackupLocation(_) => ResourceKind::BackupLocation,
            Resource::ApplicationBackup(_) => ResourceKind::ApplicationBackup,
            Resource::ApplicationRestore(_) => ResourceKind::ApplicationRestore,
            Resource::ApplicationClone(_) => ResourceKind::ApplicationClone,
        }
    }

    pub fn phase(&self) -> Phase {
        self.kind().phase()
    }

    pub fn metadata(&self) -> &ObjectMeta {
        each_variant!(self, obj => &obj.metadata)
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        each_variant!(self, obj => &mut obj.metadata)
    }

    pub fn name(&self) -> &str {
        &self.metadata().name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind(),
            namespace: self.metadata().namespace.clone(),
            name: self.metadata().name.clone(),
        }
    }

    /// The declared shape of the object with server-managed fields removed.
    /// Two descriptors with equal fingerprints describe the same desired state.
    pub fn spec_fingerprint(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("status");
            if let Some(meta) = map.get_mut("metadata").and_then(|m| m.as_object_mut()) {
                meta.remove("uid");
                meta.remove("resourceVersion");
                meta.remove("creationTimestamp");
            }
        }
        value
    }
}

/// Identity of a stored object: kind, optional namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A payload type that maps one-to-one onto a [`Resource`] variant.
pub trait TypedResource: Into<Resource> + TryFrom<Resource, Error = Resource> {
    const KIND: ResourceKind;
}

macro_rules! impl_from_payload {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Resource {
                fn from(value: $variant) -> Self {
                    Resource::$variant(value)
                }
            }

            impl TypedResource for $variant {
                const KIND: ResourceKind = ResourceKind::$variant;
            }

            impl TryFrom<Resource> for $variant {
                type Error = Resource;

                fn try_from(value: Resource) -> Result<Self, Self::Error> {
                    match value {
                        Resource::$variant(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

impl_from_payload!(
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
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Quantity;

    #[test]
    fn decodes_by_kind_tag() {
        let yaml = r#"
kind: PersistentVolumeClaim
apiVersion: v1
metadata:
  name: mysql-data
spec:
  resources:
    requests:
      storage: 2Gi
"#;
        let resource: Resource = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(resource.kind(), ResourceKind::PersistentVolumeClaim);
        assert_eq!(resource.phase(), Phase::Storage);
        assert_eq!(resource.name(), "mysql-data");
        match resource {
            Resource::PersistentVolumeClaim(claim) => {
                assert_eq!(claim.requested_size(), Some(Quantity::from_gib(2)));
            }
            other => panic!("unexpected variant {:?}", other.kind()),
        }
    }

    #[test]
    fn unknown_kind_fails_to_decode() {
        let yaml = "kind: CronJob\nmetadata:\n  name: nightly\n";
        assert!(serde_yaml::from_str::<Resource>(yaml).is_err());
    }

    #[test]
    fn fingerprint_ignores_server_fields() {
        let mut a: Resource = Service {
            metadata: ObjectMeta::namespaced("web", "app-1"),
            ..Default::default()
        }
        .into();
        let b = a.clone();

        a.metadata_mut().uid = Some("uid-1".into());
        a.metadata_mut().resource_version = Some("7".into());
        assert_eq!(a.spec_fingerprint(), b.spec_fingerprint());

        a.metadata_mut().labels.insert("tier".into(), "web".into());
        assert_ne!(a.spec_fingerprint(), b.spec_fingerprint());
    }

    #[test]
    fn key_display() {
        let res: Resource = ConfigMap {
            metadata: ObjectMeta::namespaced("settings", "app-1"),
            ..Default::default()
        }
        .into();
        assert_eq!(res.key().to_string(), "ConfigMap app-1/settings");

        let sc: Resource = StorageClass {
            metadata: ObjectMeta::named("fast"),
            ..Default::default()
        }
        .into();
        assert_eq!(sc.key().to_string(), "StorageClass fast");
    }
}
