//! Storage operations on a scheduled application: volume and snapshot
//! listing, parameters, resize and deletion.

use super::Orchestrator;
use super::context::{AppContext, Stage};
use crate::cluster::{get_typed, update_typed};
use crate::errors::{ObjectRef, SchedulerError, SchedulerResult, StoreError};
use convoy_common::resources::{PersistentVolumeClaim, StorageClass, VolumeSnapshot};
use convoy_common::{Quantity, Resource, ResourceKey, ResourceKind};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Claim annotation that opts a claim out of resizing when set to false.
pub const RESIZE_SUPPORTED_ANNOTATION: &str = "convoy.io/resize-supported";

/// How much [`Orchestrator::resize_volume`] grows each claim by.
pub const RESIZE_STEP: Quantity = Quantity::from_gib(1);

/// Parameter naming the volume a snapshot was taken from.
pub const SNAPSHOT_PARENT_PARAM: &str = "parent";

/// A volume backing one of the app's claims.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Volume {
    /// Bound volume name, or the claim name while unbound.
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub size: Option<Quantity>,
    pub shared: bool,
}

impl Volume {
    fn from_claim(claim: &PersistentVolumeClaim) -> Self {
        Self {
            id: claim
                .spec
                .volume_name
                .clone()
                .unwrap_or_else(|| claim.metadata.name.clone()),
            name: claim.metadata.name.clone(),
            namespace: claim.metadata.namespace_or_default().to_string(),
            size: claim.capacity().or_else(|| claim.requested_size()),
            shared: claim.is_shared(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Storage-side snapshot id, or the object name until one is assigned.
    pub id: String,
    pub name: String,
    pub namespace: String,
}

impl Snapshot {
    fn from_volume_snapshot(snap: &VolumeSnapshot) -> Self {
        Self {
            id: snap
                .spec
                .snapshot_data_name
                .clone()
                .unwrap_or_else(|| snap.metadata.name.clone()),
            name: snap.metadata.name.clone(),
            namespace: snap.metadata.namespace_or_default().to_string(),
        }
    }
}

/// Keys of every claim the app owns: declared claims plus the per-ordinal
/// claims of its stateful sets.
fn claim_keys(ctx: &AppContext) -> Vec<ResourceKey> {
    let mut keys = Vec::new();
    for resource in &ctx.resources {
        match resource {
            Resource::PersistentVolumeClaim(_) => keys.push(resource.key()),
            Resource::StatefulSet(ss) => {
                let namespace = ss.metadata.namespace.as_deref();
                keys.extend(
                    ss.claim_names()
                        .iter()
                        .map(|name| ResourceKey::new(ResourceKind::PersistentVolumeClaim, namespace, name)),
                );
            }
            _ => {}
        }
    }
    keys
}

fn should_resize(claim: &PersistentVolumeClaim) -> bool {
    match claim.metadata.annotation(RESIZE_SUPPORTED_ANNOTATION) {
        None => true,
        Some(_) => claim.metadata.annotation_flag(RESIZE_SUPPORTED_ANNOTATION) == Some(true),
    }
}

fn lookup_failure(ctx: &AppContext, key: &ResourceKey, e: StoreError) -> SchedulerError {
    SchedulerError::StorageLookupFailure {
        app: ctx.app_key.clone(),
        object: ObjectRef::from(key),
        cause: e.to_string(),
    }
}

impl Orchestrator {
    async fn live_claim(&self, key: &ResourceKey) -> Result<PersistentVolumeClaim, StoreError> {
        get_typed(self.store(), key.namespace.as_deref(), &key.name).await
    }

    pub async fn get_volumes(&self, ctx: &AppContext) -> SchedulerResult<Vec<Volume>> {
        let mut volumes = Vec::new();
        for key in claim_keys(ctx) {
            let claim = self.live_claim(&key).await.map_err(|e| lookup_failure(ctx, &key, e))?;
            volumes.push(Volume::from_claim(&claim));
        }
        Ok(volumes)
    }

    /// Snapshots the app took: its own volume snapshots and the members of
    /// its group snapshots.
    pub async fn get_snapshots(&self, ctx: &AppContext) -> SchedulerResult<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for resource in &ctx.resources {
            let names: Vec<String> = match resource {
                Resource::VolumeSnapshot(snap) => vec![snap.metadata.name.clone()],
                Resource::GroupVolumeSnapshot(_) => {
                    let key = resource.key();
                    match self.store().get(&key).await {
                        Ok(Resource::GroupVolumeSnapshot(group)) => {
                            group.status.map(|s| s.volume_snapshots).unwrap_or_default()
                        }
                        Ok(_) => Vec::new(),
                        Err(e) => return Err(lookup_failure(ctx, &key, e)),
                    }
                }
                _ => continue,
            };

            for name in names {
                let key = ResourceKey::new(ResourceKind::VolumeSnapshot, resource.namespace(), &name);
                let snap = get_typed::<VolumeSnapshot>(self.store(), resource.namespace(), &name)
                    .await
                    .map_err(|e| lookup_failure(ctx, &key, e))?;
                snapshots.push(Snapshot::from_volume_snapshot(&snap));
            }
        }
        Ok(snapshots)
    }

    /// Storage parameters keyed by volume id. A claim's entry is its storage
    /// class parameters overlaid with the claim's annotations; a snapshot's
    /// entry names its parent volume.
    pub async fn get_volume_parameters(
        &self,
        ctx: &AppContext,
    ) -> SchedulerResult<BTreeMap<String, BTreeMap<String, String>>> {
        let mut result = BTreeMap::new();

        for key in claim_keys(ctx) {
            let claim = self.live_claim(&key).await.map_err(|e| lookup_failure(ctx, &key, e))?;
            let mut params = BTreeMap::new();
            if let Some(class_name) = &claim.spec.storage_class_name {
                let class_key = ResourceKey::new(ResourceKind::StorageClass, None, class_name);
                let class = get_typed::<StorageClass>(self.store(), None, class_name)
                    .await
                    .map_err(|e| lookup_failure(ctx, &class_key, e))?;
                params.extend(class.parameters);
            }
            params.extend(claim.metadata.annotations.clone());
            result.insert(Volume::from_claim(&claim).id, params);
        }

        for resource in ctx.resources_of(ResourceKind::VolumeSnapshot) {
            let key = resource.key();
            let snap = get_typed::<VolumeSnapshot>(self.store(), resource.namespace(), resource.name())
                .await
                .map_err(|e| lookup_failure(ctx, &key, e))?;
            let claim_key = ResourceKey::new(
                ResourceKind::PersistentVolumeClaim,
                resource.namespace(),
                &snap.spec.persistent_volume_claim_name,
            );
            let claim = self
                .live_claim(&claim_key)
                .await
                .map_err(|e| lookup_failure(ctx, &claim_key, e))?;

            let params = [(SNAPSHOT_PARENT_PARAM.to_string(), Volume::from_claim(&claim).id)]
                .into_iter()
                .collect();
            result.insert(Snapshot::from_volume_snapshot(&snap).id, params);
        }

        Ok(result)
    }

    /// Grow every claim of the app by [`RESIZE_STEP`], skipping claims whose
    /// resize-supported annotation is anything but true. Returns the app's
    /// volumes with their requested sizes. The app needs validating
    /// afterwards.
    pub async fn resize_volume(&self, ctx: &mut AppContext) -> SchedulerResult<Vec<Volume>> {
        let previous = ctx.begin(Stage::Resizing);
        match self.resize_claims(ctx).await {
            Ok(claims) => {
                let volumes = claims.iter().map(Volume::from_claim).collect();
                for claim in claims {
                    ctx.refresh(claim.into());
                }
                Ok(volumes)
            }
            Err(e) => Err(ctx.abort(previous, e)),
        }
    }

    async fn resize_claims(&self, ctx: &AppContext) -> SchedulerResult<Vec<PersistentVolumeClaim>> {
        let mut claims = Vec::new();
        for key in claim_keys(ctx) {
            let resize_failure = |e: StoreError| SchedulerError::ResizeFailure {
                app: ctx.app_key.clone(),
                object: ObjectRef::from(&key),
                cause: e.to_string(),
            };

            let mut claim = self.live_claim(&key).await.map_err(resize_failure)?;
            if !should_resize(&claim) {
                info!(app = %ctx.app_key, claim = %claim.metadata.name, "Claim does not support resize, skipping");
                claims.push(claim);
                continue;
            }

            let current = claim.requested_size().unwrap_or_default();
            let target = current + RESIZE_STEP;
            claim.set_requested_size(target);
            let updated = update_typed(self.store(), claim).await.map_err(resize_failure)?;
            info!(app = %ctx.app_key, claim = %updated.metadata.name, from = %current, to = %target, "Resized claim");
            claims.push(updated);
        }
        Ok(claims)
    }

    /// Delete every claim of the app, and the scaling rule of each claim
    /// that was bound to one. Claims already gone are skipped. Returns the
    /// volumes that were deleted.
    pub async fn delete_volumes(&self, ctx: &AppContext) -> SchedulerResult<Vec<Volume>> {
        let mut deleted = Vec::new();
        for key in claim_keys(ctx) {
            let destroy_failure = |cause: String| SchedulerError::DestroyFailure {
                app: ctx.app_key.clone(),
                object: ObjectRef::from(&key),
                cause,
            };

            let claim = match self.live_claim(&key).await {
                Ok(claim) => claim,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(destroy_failure(e.to_string())),
            };
            self.delete_with_retry(&key, self.timeouts().destroy())
                .await
                .map_err(|e| destroy_failure(e.to_string()))?;
            info!(app = %ctx.app_key, claim = %claim.metadata.name, "Deleted claim");

            if let Some(params) = &ctx.options.autoscale
                && params.applies_to(&claim.metadata)
            {
                self.unbind_autoscale(&ctx.app_key, params).await?;
            }
            deleted.push(Volume::from_claim(&claim));
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Verb;
    use crate::orchestrator::testing::{Harness, MYSQL, harness};
    use crate::orchestrator::{AutoscaleParams, ScheduleOptions};
    use std::time::Duration;

    const SNAPPED: &str = r#"
kind: StorageClass
metadata:
  name: fast
parameters:
  io_profile: db
---
kind: PersistentVolumeClaim
metadata:
  name: data
  labels:
    app: snapped
  annotations:
    convoy.io/resize-supported: "false"
spec:
  storageClassName: fast
  accessModes: [ReadWriteMany]
  resources:
    requests:
      storage: 5Gi
---
kind: VolumeSnapshot
metadata:
  name: data-snap
spec:
  persistentVolumeClaimName: data
"#;

    async fn scheduled(h: &Harness, options: ScheduleOptions) -> AppContext {
        h.orchestrator.schedule("1", &options).await.unwrap().remove(0)
    }

    #[test]
    fn test_resize_annotation_gates_resize() {
        let mut claim = PersistentVolumeClaim::default();
        assert!(should_resize(&claim));
        for (value, expected) in [("true", true), ("false", false), ("nope", false)] {
            claim.metadata.annotations.insert(RESIZE_SUPPORTED_ANNOTATION.into(), value.into());
            assert_eq!(should_resize(&claim), expected, "annotation {value}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize_adds_one_gib() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let mut ctx = scheduled(&h, ScheduleOptions::for_apps(["mysql"])).await;
        h.orchestrator
            .wait_for_running(&mut ctx, Duration::from_secs(60), Duration::from_secs(10))
            .await
            .unwrap();
        let before = h.orchestrator.get_volumes(&ctx).await.unwrap();
        assert_eq!(before[0].size, Some(Quantity::from_gib(2)));

        let resized = h.orchestrator.resize_volume(&mut ctx).await.unwrap();
        assert_eq!(resized[0].size, Some(Quantity::from_gib(3)));
        assert_eq!(ctx.stage(), Stage::Resizing);

        let after = h.orchestrator.get_volumes(&ctx).await.unwrap();
        assert_eq!(after[0].size, Some(Quantity::from_gib(3)));
        assert!(!after[0].shared);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize_skips_claim_marked_unsupported() {
        let h = harness(&[("snapped", SNAPPED)]).await;
        let mut ctx = scheduled(&h, ScheduleOptions::for_apps(["snapped"])).await;

        let resized = h.orchestrator.resize_volume(&mut ctx).await.unwrap();
        assert_eq!(resized[0].size, Some(Quantity::from_gib(5)));
        assert!(resized[0].shared);
        assert_eq!(h.cluster.count(Verb::Update, "PersistentVolumeClaim snapped-1/data").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize_failure_restores_stage() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let mut ctx = scheduled(&h, ScheduleOptions::for_apps(["mysql"])).await;
        h.cluster
            .inject_fault(
                Verb::Update,
                Some(ResourceKind::PersistentVolumeClaim),
                StoreError::Rejected("quota exceeded".into()),
                1,
            )
            .await;

        let err = h.orchestrator.resize_volume(&mut ctx).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ResizeFailure { .. }));
        assert_eq!(ctx.stage(), Stage::Materializing);
        assert!(ctx.last_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_and_parameters() {
        let h = harness(&[("snapped", SNAPPED)]).await;
        let ctx = scheduled(&h, ScheduleOptions::for_apps(["snapped"])).await;

        let snapshots = h.orchestrator.get_snapshots(&ctx).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].id.starts_with("snapdata-"));

        let volumes = h.orchestrator.get_volumes(&ctx).await.unwrap();
        let params = h.orchestrator.get_volume_parameters(&ctx).await.unwrap();
        let claim_params = &params[&volumes[0].id];
        assert_eq!(claim_params.get("io_profile").map(String::as_str), Some("db"));
        assert_eq!(claim_params.get(RESIZE_SUPPORTED_ANNOTATION).map(String::as_str), Some("false"));
        assert_eq!(params[&snapshots[0].id].get(SNAPSHOT_PARENT_PARAM), Some(&volumes[0].id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_volumes_unbinds_autoscale() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let options = ScheduleOptions::for_apps(["mysql"]).with_autoscale(AutoscaleParams::new("mysql-resize"));
        let ctx = scheduled(&h, options).await;
        assert_eq!(h.cluster.object_count(ResourceKind::ScalingRule).await, 1);

        let deleted = h.orchestrator.delete_volumes(&ctx).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(h.cluster.object_count(ResourceKind::PersistentVolumeClaim).await, 0);
        assert_eq!(h.cluster.object_count(ResourceKind::ScalingRule).await, 0);

        // Second pass finds nothing left to delete.
        assert!(h.orchestrator.delete_volumes(&ctx).await.unwrap().is_empty());
    }
}
