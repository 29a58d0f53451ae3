//! Teardown of a scheduled application and the volume leak check.
//!
//! Descriptors are deleted phase by phase in reverse materialization order
//! (backup objects first, migration objects last). The pods backing the app
//! are captured before anything is deleted: once their owners are gone the
//! store can no longer say which pods belonged to the app, and the leak
//! check needs their uids and nodes.

use super::Orchestrator;
use super::context::{AppContext, Stage};
use crate::errors::{ObjectRef, SchedulerError, SchedulerResult};
use crate::node::Node;
use crate::retry::{RetryOutcome, do_retry};
use convoy_common::resources::Pod;
use convoy_common::{Phase, Resource, ResourceKey, ResourceKind};
use futures::future::join_all;
use std::collections::BTreeSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestroyOptions {
    /// Wait until the app's workloads, services and pods are gone from the
    /// store.
    pub wait_for_destroy: bool,
    /// Check that no pod volume directory outlives its pod. Implies
    /// `wait_for_destroy`; deletion and wait failures are logged and skipped
    /// in this mode so the leak check always runs.
    pub wait_for_resource_leak_cleanup: bool,
}

/// Kinds whose removal is awaited after deletion.
fn awaits_removal(kind: ResourceKind) -> bool {
    matches!(
        kind,
        ResourceKind::Deployment | ResourceKind::StatefulSet | ResourceKind::Service | ResourceKind::Pod
    )
}

impl Orchestrator {
    pub async fn destroy(&self, ctx: &mut AppContext, options: &DestroyOptions) -> SchedulerResult<()> {
        let previous = ctx.begin(Stage::Destroying);
        let pods = match self.delete_app(ctx, options).await {
            Ok(pods) => pods,
            Err(e) => return Err(ctx.abort(previous, e)),
        };

        if options.wait_for_resource_leak_cleanup {
            let destroyed = ctx.begin(Stage::LeakChecking);
            if let Err(e) = self.wait_for_cleanup(ctx, &pods).await {
                return Err(ctx.abort(destroyed, e));
            }
        }

        ctx.finish(Stage::Terminated);
        info!(app = %ctx.app_key, namespace = %ctx.namespace, pods = pods.len(), "Destroyed app");
        Ok(())
    }

    /// Delete every descriptor and return the pods that backed the app.
    async fn delete_app(&self, ctx: &AppContext, options: &DestroyOptions) -> SchedulerResult<Vec<Pod>> {
        let lenient = options.wait_for_resource_leak_cleanup;
        let pods = self
            .pods_for_app(ctx)
            .await
            .map_err(|e| SchedulerError::DestroyFailure {
                app: ctx.app_key.clone(),
                object: ObjectRef::namespace(&ctx.namespace),
                cause: format!("failed to list pods: {}", e),
            })?;

        let mut skipped = BTreeSet::new();
        for phase in Phase::DESCRIPTOR_PHASES.iter().rev() {
            let keys: Vec<ResourceKey> = ctx
                .resources
                .iter()
                .filter(|r| r.phase() == *phase)
                .map(Resource::key)
                .collect();
            if keys.is_empty() {
                continue;
            }

            let results = join_all(keys.iter().map(|key| self.delete_object(ctx, key))).await;
            for (key, result) in keys.into_iter().zip(results) {
                match result {
                    Ok(()) => {}
                    Err(e) if lenient => {
                        warn!(app = %ctx.app_key, object = %key, error = %e, "Delete failed, continuing to leak check");
                        skipped.insert(key);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.unbind_claims(ctx, options).await?;

        if options.wait_for_destroy || lenient {
            match self.await_removal(ctx, &skipped).await {
                Err(e) if lenient => {
                    warn!(app = %ctx.app_key, error = %e, "Objects still present, continuing to leak check");
                }
                other => other?,
            }
        }
        Ok(pods)
    }

    async fn delete_object(&self, ctx: &AppContext, key: &ResourceKey) -> SchedulerResult<()> {
        self.delete_with_retry(key, self.timeouts().destroy())
            .await
            .map_err(|e| SchedulerError::DestroyFailure {
                app: ctx.app_key.clone(),
                object: ObjectRef::from(key),
                cause: e.to_string(),
            })?;
        info!(app = %ctx.app_key, object = %key, "Deleted object");
        Ok(())
    }

    /// Drop the scaling rule of any autoscaled claim the app declared.
    async fn unbind_claims(&self, ctx: &AppContext, options: &DestroyOptions) -> SchedulerResult<()> {
        let Some(params) = &ctx.options.autoscale else {
            return Ok(());
        };
        let bound = ctx
            .resources
            .iter()
            .any(|r| matches!(r, Resource::PersistentVolumeClaim(c) if params.applies_to(&c.metadata)));
        if !bound {
            return Ok(());
        }
        match self.unbind_autoscale(&ctx.app_key, params).await {
            Err(e) if options.wait_for_resource_leak_cleanup => {
                warn!(app = %ctx.app_key, error = %e, "Failed to delete scaling rule, continuing to leak check");
                Ok(())
            }
            other => other,
        }
    }

    /// Wait until the app's deployments, stateful sets, services and pods
    /// are gone from the store.
    pub async fn wait_for_destroy(&self, ctx: &AppContext) -> SchedulerResult<()> {
        self.await_removal(ctx, &BTreeSet::new()).await
    }

    async fn await_removal(&self, ctx: &AppContext, skipped: &BTreeSet<ResourceKey>) -> SchedulerResult<()> {
        let store = self.store();
        let mut awaited = 0;
        for resource in &ctx.resources {
            let key = resource.key();
            if !awaits_removal(key.kind) || skipped.contains(&key) {
                continue;
            }
            let key = &key;
            do_retry(self.timeouts().destroy(), || async move {
                match store.get(key).await {
                    Err(e) if e.is_not_found() => RetryOutcome::Done(()),
                    Ok(_) => RetryOutcome::Retry(format!("{} still exists", key)),
                    Err(e) => RetryOutcome::Retry(e.to_string()),
                }
            })
            .await
            .map_err(|e| SchedulerError::DestroyFailure {
                app: ctx.app_key.clone(),
                object: ObjectRef::from(key),
                cause: e.to_string(),
            })?;
            awaited += 1;
        }
        info!(app = %ctx.app_key, objects = awaited, "Destroyed objects gone");
        Ok(())
    }

    /// Nodes to probe for `pod`'s volume directory: every registered worker
    /// plus the node the pod ran on, registered or not.
    async fn cleanup_targets(&self, pod: &Pod) -> SchedulerResult<Vec<Node>> {
        let mut targets: Vec<Node> = self.nodes.workers().cloned().collect();
        if let Some(name) = pod.node_name()
            && !targets.iter().any(|n| n.name == name)
        {
            let node = match self.nodes.get(name) {
                Some(node) => node.clone(),
                None => self
                    .store()
                    .get_node(name)
                    .await
                    .map(|n| Node::from(&n))
                    .map_err(|e| SchedulerError::NodeNotReady {
                        node: name.to_string(),
                        cause: format!("failed to look up node of pod {}: {}", pod.metadata.name, e),
                    })?,
            };
            targets.push(node);
        }
        if targets.is_empty() {
            return Err(SchedulerError::NodeNotReady {
                node: "*".to_string(),
                cause: format!("no node to check for the volume directory of pod {}", pod.metadata.name),
            });
        }
        Ok(targets)
    }

    /// Wait until no candidate node holds the volume directory of any of
    /// `pods`. A directory still present when the cleanup timeout runs out
    /// is a [`SchedulerError::VolumeDirLeak`].
    pub async fn wait_for_cleanup(&self, ctx: &AppContext, pods: &[Pod]) -> SchedulerResult<()> {
        let probe_timeout = self.timeouts().find_files_on_worker();
        for pod in pods {
            let Some(uid) = pod.uid() else {
                continue;
            };
            let targets = self.cleanup_targets(pod).await?;
            let targets = targets.as_slice();
            let path = self.config.cluster.pod_volume_dir(uid);
            let path = path.as_str();
            let pod_name = pod.metadata.name.as_str();

            do_retry(self.timeouts().volume_dir_cleanup(), || async move {
                for node in targets {
                    match self.node_driver.file_exists(node, path, probe_timeout).await {
                        Ok(false) => {}
                        Ok(true) => {
                            return RetryOutcome::Retry(SchedulerError::VolumeDirLeak {
                                pod: pod_name.to_string(),
                                node: node.name.clone(),
                                path: path.to_string(),
                            });
                        }
                        Err(e) => {
                            return RetryOutcome::Retry(SchedulerError::NodeNotReady {
                                node: node.name.clone(),
                                cause: e.to_string(),
                            });
                        }
                    }
                }
                RetryOutcome::Done(())
            })
            .await
            .map_err(|e| e.into_last())?;
            info!(app = %ctx.app_key, pod = %pod_name, nodes = targets.len(), "Volume directory cleaned up");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterStore, Verb};
    use crate::errors::StoreError;
    use crate::node::NodeRegistry;
    use crate::template::AppTemplate;
    use crate::orchestrator::testing::{Harness, MYSQL, harness};
    use crate::orchestrator::{AutoscaleParams, ScheduleOptions};
    use std::time::Duration;
    use tokio::time::Instant;

    const LEAK: DestroyOptions = DestroyOptions {
        wait_for_destroy: true,
        wait_for_resource_leak_cleanup: true,
    };

    async fn running(h: &Harness, options: ScheduleOptions) -> AppContext {
        let mut ctx = h.orchestrator.schedule("1", &options).await.unwrap().remove(0);
        h.orchestrator
            .wait_for_running(&mut ctx, Duration::from_secs(60), Duration::from_secs(10))
            .await
            .unwrap();
        ctx
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_removes_objects_and_keeps_namespace() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let mut ctx = running(&h, ScheduleOptions::for_apps(["mysql"])).await;

        h.orchestrator.destroy(&mut ctx, &LEAK).await.unwrap();

        assert_eq!(ctx.stage(), Stage::Terminated);
        for resource in &ctx.resources {
            assert!(!h.cluster.contains(&resource.key()).await, "{} left behind", resource.key());
        }
        assert_eq!(h.cluster.object_count(ResourceKind::Pod).await, 0);
        assert!(h.cluster.get_namespace("mysql-1").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_deletes_in_reverse_phase_order() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let mut ctx = running(&h, ScheduleOptions::for_apps(["mysql"])).await;
        h.orchestrator.destroy(&mut ctx, &DestroyOptions::default()).await.unwrap();

        let deployment = h.cluster.position(Verb::Delete, "Deployment mysql-1/mysql").await.unwrap();
        let claim = h
            .cluster
            .position(Verb::Delete, "PersistentVolumeClaim mysql-1/mysql-data")
            .await
            .unwrap();
        assert!(deployment < claim);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_is_idempotent() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let mut ctx = running(&h, ScheduleOptions::for_apps(["mysql"])).await;
        h.orchestrator.destroy(&mut ctx, &LEAK).await.unwrap();
        h.orchestrator.destroy(&mut ctx, &LEAK).await.unwrap();
        assert_eq!(ctx.stage(), Stage::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_unbinds_scaling_rule() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let options = ScheduleOptions::for_apps(["mysql"]).with_autoscale(AutoscaleParams::new("mysql-resize"));
        let mut ctx = running(&h, options).await;
        assert_eq!(h.cluster.object_count(ResourceKind::ScalingRule).await, 1);

        h.orchestrator.destroy(&mut ctx, &DestroyOptions::default()).await.unwrap();
        assert_eq!(h.cluster.object_count(ResourceKind::ScalingRule).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_failure_aborts_without_leak_cleanup() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let mut ctx = running(&h, ScheduleOptions::for_apps(["mysql"])).await;
        h.cluster
            .inject_fault(
                Verb::Delete,
                Some(ResourceKind::Deployment),
                StoreError::Rejected("finalizer pending".into()),
                1,
            )
            .await;

        let err = h.orchestrator.destroy(&mut ctx, &DestroyOptions::default()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::DestroyFailure { ref object, .. } if object.is(ResourceKind::Deployment)));
        assert_eq!(ctx.stage(), Stage::Running);
        assert!(ctx.last_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_failure_is_tolerated_with_leak_cleanup() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let mut ctx = running(&h, ScheduleOptions::for_apps(["mysql"])).await;
        h.cluster
            .inject_fault(
                Verb::Delete,
                Some(ResourceKind::StorageClass),
                StoreError::Rejected("in use".into()),
                1,
            )
            .await;

        let options = DestroyOptions {
            wait_for_destroy: false,
            wait_for_resource_leak_cleanup: true,
        };
        h.orchestrator.destroy(&mut ctx, &options).await.unwrap();
        assert_eq!(ctx.stage(), Stage::Terminated);
        assert!(h.cluster.contains(&ResourceKey::new(ResourceKind::StorageClass, None, "mysql-sc")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retained_volume_dir_is_a_leak() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let mut ctx = running(&h, ScheduleOptions::for_apps(["mysql"])).await;
        let pod = h.orchestrator.pods_for_app(&ctx).await.unwrap().remove(0);
        let node = pod.node_name().unwrap().to_string();
        h.node_driver.retain_files_on(&node).await;

        let cleanup = h.orchestrator.config().timeouts.volume_dir_cleanup();
        let started = Instant::now();
        let err = h.orchestrator.destroy(&mut ctx, &LEAK).await.unwrap_err();
        let waited = started.elapsed();

        match err {
            SchedulerError::VolumeDirLeak { pod: leaked, node: on, path } => {
                assert_eq!(leaked, pod.metadata.name);
                assert_eq!(on, node);
                assert!(path.contains(pod.uid().unwrap()));
            }
            other => panic!("expected a leak, got {other}"),
        }
        assert!(waited >= cleanup.timeout);
        assert!(waited <= cleanup.timeout + cleanup.interval);
        assert_eq!(ctx.stage(), Stage::Destroying);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tolerated_delete_failure_still_reaches_leak_check() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let mut ctx = running(&h, ScheduleOptions::for_apps(["mysql"])).await;
        h.cluster
            .inject_fault(
                Verb::Delete,
                Some(ResourceKind::StorageClass),
                StoreError::Rejected("in use".into()),
                1,
            )
            .await;

        h.orchestrator.destroy(&mut ctx, &LEAK).await.unwrap();
        assert_eq!(ctx.stage(), Stage::Terminated);
        assert!(h.cluster.contains(&ResourceKey::new(ResourceKind::StorageClass, None, "mysql-sc")).await);
        assert_eq!(h.cluster.object_count(ResourceKind::Pod).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undeleted_workload_surfaces_as_leak() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let mut ctx = running(&h, ScheduleOptions::for_apps(["mysql"])).await;
        h.cluster
            .inject_fault(
                Verb::Delete,
                Some(ResourceKind::Deployment),
                StoreError::Rejected("finalizer pending".into()),
                1,
            )
            .await;

        let err = h.orchestrator.destroy(&mut ctx, &LEAK).await.unwrap_err();
        assert!(matches!(err, SchedulerError::VolumeDirLeak { .. }), "got {err}");
        assert_eq!(ctx.stage(), Stage::Destroying);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leak_cleanup_waits_for_workloads_to_go() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let mut ctx = running(&h, ScheduleOptions::for_apps(["mysql"])).await;
        let options = DestroyOptions {
            wait_for_destroy: false,
            wait_for_resource_leak_cleanup: true,
        };
        h.orchestrator.destroy(&mut ctx, &options).await.unwrap();

        let target = "Deployment mysql-1/mysql";
        let deleted = h.cluster.position(Verb::Delete, target).await.unwrap();
        let ops = h.cluster.ops().await;
        assert!(ops[deleted..].iter().any(|op| op.verb == Verb::Get && op.target == target));
        assert!(!ops[deleted..].iter().any(|op| op.verb == Verb::Get && op.target == "StorageClass mysql-sc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leak_check_probes_pod_node_outside_registry() {
        let Harness {
            cluster,
            node_driver,
            orchestrator,
            ..
        } = harness(&[("mysql", MYSQL)]).await;
        let orchestrator = orchestrator.with_nodes(NodeRegistry::new());
        let mut ctx = orchestrator
            .schedule("1", &ScheduleOptions::for_apps(["mysql"]))
            .await
            .unwrap()
            .remove(0);
        let pod = orchestrator.pods_for_app(&ctx).await.unwrap().remove(0);
        let node = pod.node_name().unwrap().to_string();
        node_driver.retain_files_on(&node).await;

        let err = orchestrator.destroy(&mut ctx, &LEAK).await.unwrap_err();
        assert!(matches!(err, SchedulerError::VolumeDirLeak { node: ref on, .. } if *on == node), "got {err}");
        assert_eq!(cluster.object_count(ResourceKind::Pod).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leak_check_without_any_node_fails() {
        let h = harness(&[]).await;
        let orchestrator = h.orchestrator.with_nodes(NodeRegistry::new());
        let ctx = AppContext::new("1", &AppTemplate::new("orphan", Vec::new()), ScheduleOptions::default());
        let mut pod = Pod::default();
        pod.metadata.name = "orphan-0".to_string();
        pod.metadata.uid = Some("uid-orphan".to_string());

        let err = orchestrator.wait_for_cleanup(&ctx, &[pod]).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NodeNotReady { ref cause, .. } if cause.contains("orphan-0")));
    }
}
