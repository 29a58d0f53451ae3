//! Readiness validation.
//!
//! Each live object is re-read from the store and checked against the
//! predicate for its kind until it passes or the retry window closes.
//! Predicates only read; a terminal status (a failed migration, say) stops
//! the wait early instead of polling out the timeout.

use super::Orchestrator;
use super::context::{AppContext, Stage};
use crate::cluster::get_typed;
use crate::errors::{ObjectRef, SchedulerError, SchedulerResult, StoreError};
use crate::retry::{RetryOutcome, RetryPolicy, do_retry};
use chrono::{DateTime, Utc};
use convoy_common::resources::{PersistentVolumeClaim, StatefulSet, TransferStatus, transfer_complete};
use convoy_common::{Resource, ResourceKind};
use std::time::Duration;
use tracing::info;

/// Outcome of one readiness check.
#[derive(Debug)]
enum Probe {
    Ready,
    NotYet(String),
    /// Terminal: the object reached a state it will not recover from.
    Broken(String),
}

fn transfer_probe(status: &Option<TransferStatus>) -> Probe {
    if transfer_complete(status) {
        return Probe::Ready;
    }
    match status {
        Some(s) if s.status.is_failed() => {
            Probe::Broken(s.reason.clone().unwrap_or_else(|| "transfer failed".to_string()))
        }
        Some(s) => Probe::NotYet(format!("stage {:?}, status {:?}", s.stage, s.status)),
        None => Probe::NotYet("no status reported yet".to_string()),
    }
}

/// Kinds whose readiness is checked by [`Orchestrator::inspect_volumes`].
fn is_storage_object(resource: &Resource) -> bool {
    matches!(
        resource.kind(),
        ResourceKind::StorageClass
            | ResourceKind::PersistentVolumeClaim
            | ResourceKind::VolumeSnapshot
            | ResourceKind::GroupVolumeSnapshot
    )
}

impl Orchestrator {
    /// Wait for every object of the app to become ready. Stateful sets get
    /// `timeout` per replica, capped at the stateful set validation timeout.
    pub async fn wait_for_running(
        &self,
        ctx: &mut AppContext,
        timeout: Duration,
        interval: Duration,
    ) -> SchedulerResult<()> {
        let previous = ctx.begin(Stage::Validating);
        let validated = match self.validate_all(ctx, RetryPolicy::new(timeout, interval)).await {
            Ok(validated) => validated,
            Err(e) => return Err(ctx.abort(previous, e)),
        };

        for live in validated {
            ctx.refresh(live);
        }
        ctx.finish(Stage::Running);
        info!(app = %ctx.app_key, namespace = %ctx.namespace, "App is running");
        Ok(())
    }

    async fn validate_all(&self, ctx: &AppContext, policy: RetryPolicy) -> SchedulerResult<Vec<Resource>> {
        let mut validated = Vec::with_capacity(ctx.resources.len());
        for resource in &ctx.resources {
            let policy = match resource {
                Resource::StatefulSet(ss) => self.statefulset_policy(ss, policy),
                _ => policy,
            };
            validated.push(self.await_ready(ctx, resource, policy).await?);
        }
        Ok(validated)
    }

    /// Storage-only validation: classes exist, claims are bound (and resized
    /// when autoscaling applies), snapshots are ready and stateful set claims
    /// are bound.
    pub async fn inspect_volumes(&self, ctx: &AppContext, timeout: Duration, interval: Duration) -> SchedulerResult<()> {
        let policy = RetryPolicy::new(timeout, interval);
        for resource in &ctx.resources {
            match resource {
                Resource::StatefulSet(ss) => self.await_claims_bound(ctx, ss, policy).await?,
                r if is_storage_object(r) => {
                    self.await_ready(ctx, r, policy).await?;
                }
                _ => {}
            }
        }
        info!(app = %ctx.app_key, "Volumes inspected");
        Ok(())
    }

    /// Check that every snapshot restore of the app succeeded and that the
    /// storage driver confirms each restored volume came from its snapshot
    /// no earlier than `since`.
    pub async fn validate_volume_snapshot_restore(&self, ctx: &AppContext, since: DateTime<Utc>) -> SchedulerResult<()> {
        let policy = self.timeouts().default_policy();
        for resource in ctx.resources_of(ResourceKind::VolumeSnapshotRestore) {
            let Resource::VolumeSnapshotRestore(restore) = self.await_ready(ctx, resource, policy).await? else {
                continue;
            };
            let volumes = restore.status.map(|s| s.volumes).unwrap_or_default();
            for info in volumes {
                self.storage
                    .validate_volume_snapshot_restore(&info.volume, &info.snapshot, since)
                    .await
                    .map_err(|cause| SchedulerError::ValidateFailure {
                        app: ctx.app_key.clone(),
                        object: ObjectRef::from(resource.key()),
                        cause,
                    })?;
                info!(app = %ctx.app_key, volume = %info.volume, snapshot = %info.snapshot, "Validated restored volume");
            }
        }
        Ok(())
    }

    fn statefulset_policy(&self, ss: &StatefulSet, base: RetryPolicy) -> RetryPolicy {
        let replicas = ss.desired_replicas().max(1) as u32;
        let cap = self.timeouts().statefulset_validate().timeout;
        RetryPolicy::new(base.timeout.saturating_mul(replicas).min(cap), base.interval)
    }

    /// Poll the live copy of `resource` until its readiness predicate holds.
    async fn await_ready(&self, ctx: &AppContext, resource: &Resource, policy: RetryPolicy) -> SchedulerResult<Resource> {
        let key = resource.key();
        let key = &key;
        let store = self.store();
        let live = do_retry(policy, || async move {
            let live = match store.get(key).await {
                Ok(live) => live,
                Err(e) if e.is_not_found() || e.is_transient() => return RetryOutcome::Retry(e.to_string()),
                Err(e) => return RetryOutcome::Fail(e.to_string()),
            };
            match self.probe(ctx, &live).await {
                Ok(Probe::Ready) => RetryOutcome::Done(live),
                Ok(Probe::NotYet(why)) => RetryOutcome::Retry(why),
                Ok(Probe::Broken(why)) => RetryOutcome::Fail(why),
                Err(e) if e.is_transient() || e.is_not_found() => RetryOutcome::Retry(e.to_string()),
                Err(e) => RetryOutcome::Fail(e.to_string()),
            }
        })
        .await
        .map_err(|e| SchedulerError::ValidateFailure {
            app: ctx.app_key.clone(),
            object: ObjectRef::from(key),
            cause: e.to_string(),
        })?;

        info!(app = %ctx.app_key, object = %key, "Validated object");
        Ok(live)
    }

    async fn await_claims_bound(&self, ctx: &AppContext, ss: &StatefulSet, policy: RetryPolicy) -> SchedulerResult<()> {
        do_retry(policy, || async move {
            match self.probe_statefulset_claims(ss).await {
                Ok(Probe::Ready) => RetryOutcome::Done(()),
                Ok(Probe::NotYet(why)) | Ok(Probe::Broken(why)) => RetryOutcome::Retry(why),
                Err(e) => RetryOutcome::Retry(e.to_string()),
            }
        })
        .await
        .map_err(|e| SchedulerError::ValidateFailure {
            app: ctx.app_key.clone(),
            object: ObjectRef::new(ResourceKind::StatefulSet.as_str(), ss.metadata.namespace.as_deref(), &ss.metadata.name),
            cause: e.to_string(),
        })
    }

    async fn probe(&self, ctx: &AppContext, live: &Resource) -> Result<Probe, StoreError> {
        let probe = match live {
            Resource::Deployment(dep) => {
                let (desired, ready) = (dep.desired_replicas(), dep.ready_replicas());
                if ready < desired {
                    return Ok(Probe::NotYet(format!("{} of {} replicas ready", ready, desired)));
                }
                self.probe_pods(live, desired).await?
            }
            Resource::StatefulSet(ss) => {
                let (desired, ready) = (ss.desired_replicas(), ss.ready_replicas());
                if ready < desired {
                    return Ok(Probe::NotYet(format!("{} of {} replicas ready", ready, desired)));
                }
                match self.probe_pods(live, desired).await? {
                    Probe::Ready => self.probe_statefulset_claims(ss).await?,
                    other => other,
                }
            }
            Resource::PersistentVolumeClaim(claim) => probe_claim(ctx, claim),
            Resource::Pod(pod) => {
                if pod.is_ready() {
                    Probe::Ready
                } else {
                    Probe::NotYet(format!("pod is {:?}", pod.phase()))
                }
            }
            Resource::VolumeSnapshot(snap) => {
                if snap.is_ready() {
                    Probe::Ready
                } else {
                    let error = snap.status.as_ref().and_then(|s| s.error.clone());
                    Probe::NotYet(error.unwrap_or_else(|| "snapshot is not ready".to_string()))
                }
            }
            Resource::GroupVolumeSnapshot(group) => match &group.status {
                _ if group.is_successful() => Probe::Ready,
                Some(s) if s.status.is_failed() => Probe::Broken("group snapshot failed".to_string()),
                _ => Probe::NotYet("group snapshot has not succeeded".to_string()),
            },
            Resource::VolumeSnapshotRestore(restore) => match &restore.status {
                _ if restore.is_successful() => Probe::Ready,
                Some(s) if s.status.is_failed() => Probe::Broken("snapshot restore failed".to_string()),
                _ => Probe::NotYet("snapshot restore has not succeeded".to_string()),
            },
            Resource::ClusterPair(pair) => {
                if pair.is_ready() {
                    Probe::Ready
                } else {
                    Probe::NotYet(format!("pair status {:?}", pair.status))
                }
            }
            Resource::Migration(m) => transfer_probe(&m.status),
            Resource::ApplicationBackup(b) => transfer_probe(&b.status),
            Resource::ApplicationRestore(r) => transfer_probe(&r.status),
            Resource::ApplicationClone(c) => transfer_probe(&c.status),
            Resource::MigrationSchedule(schedule) => match schedule.latest_transfer() {
                None => Probe::NotYet("no migration triggered yet".to_string()),
                Some(t) if t.status.is_success() => Probe::Ready,
                Some(t) if t.status.is_failed() => Probe::Broken(format!("migration {} failed", t.name)),
                Some(t) => Probe::NotYet(format!("migration {} is {:?}", t.name, t.status)),
            },
            // Existence is readiness.
            Resource::StorageClass(_)
            | Resource::Service(_)
            | Resource::Secret(_)
            | Resource::ConfigMap(_)
            | Resource::Rule(_)
            | Resource::SchedulePolicy(_)
            | Resource::ScalingRule(_)
            | Resource::BackupLocation(_) => Probe::Ready,
        };
        Ok(probe)
    }

    async fn probe_pods(&self, workload: &Resource, desired: i32) -> Result<Probe, StoreError> {
        let pods = self.workload_pods(workload).await?;
        if (pods.len() as i32) < desired {
            return Ok(Probe::NotYet(format!("{} of {} pods exist", pods.len(), desired)));
        }
        Ok(match pods.iter().find(|p| !p.is_ready()) {
            Some(pod) => Probe::NotYet(format!("pod {} is not ready", pod.metadata.name)),
            None => Probe::Ready,
        })
    }

    async fn probe_statefulset_claims(&self, ss: &StatefulSet) -> Result<Probe, StoreError> {
        let namespace = ss.metadata.namespace.as_deref();
        for name in ss.claim_names() {
            let claim = match get_typed::<PersistentVolumeClaim>(self.store(), namespace, &name).await {
                Ok(claim) => claim,
                Err(e) if e.is_not_found() => return Ok(Probe::NotYet(format!("claim {} does not exist", name))),
                Err(e) => return Err(e),
            };
            if !claim.is_bound() {
                return Ok(Probe::NotYet(format!("claim {} is not bound", name)));
            }
        }
        Ok(Probe::Ready)
    }
}

fn probe_claim(ctx: &AppContext, claim: &PersistentVolumeClaim) -> Probe {
    if !claim.is_bound() {
        return Probe::NotYet("claim is not bound".to_string());
    }
    if let Some(params) = &ctx.options.autoscale
        && params.applies_to(&claim.metadata)
        && let Some(expected) = params.expected_size
        && claim.capacity() != Some(expected)
    {
        let actual = claim.capacity().map_or_else(|| "unknown".to_string(), |q| q.to_string());
        return Probe::NotYet(format!("capacity {} has not reached {}", actual, expected));
    }
    Probe::Ready
}
