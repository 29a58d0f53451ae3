//! Workload operations: pod lookup, scaling, placement and pod deletion.

use super::Orchestrator;
use super::context::{AppContext, Stage};
use crate::cluster::{get_typed, update_typed};
use crate::errors::{ObjectRef, SchedulerError, SchedulerResult, StoreError};
use crate::node::Node;
use crate::retry::{RetryOutcome, do_retry};
use convoy_common::resources::{PersistentVolumeClaim, Pod, PodTemplateSpec};
use convoy_common::{LabelSelector, Resource, ResourceKey, ResourceKind};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Scale map key suffixes: `<deployment>-dep`, `<statefulset>-ss`.
pub const DEPLOYMENT_SUFFIX: &str = "-dep";
pub const STATEFUL_SET_SUFFIX: &str = "-ss";

/// The selector a workload's pods carry: its own, or its template's labels.
fn pod_selector<'a>(selector: &'a LabelSelector, template: &'a PodTemplateSpec) -> &'a BTreeMap<String, String> {
    if selector.match_labels.is_empty() {
        &template.metadata.labels
    } else {
        &selector.match_labels
    }
}

fn scale_key(resource: &Resource) -> Option<String> {
    match resource {
        Resource::Deployment(d) => Some(format!("{}{}", d.metadata.name, DEPLOYMENT_SUFFIX)),
        Resource::StatefulSet(s) => Some(format!("{}{}", s.metadata.name, STATEFUL_SET_SUFFIX)),
        _ => None,
    }
}

impl Orchestrator {
    /// Pods backing a deployment or stateful set: those matching its selector
    /// and named after it. Any other kind has no pods.
    pub(crate) async fn workload_pods(&self, workload: &Resource) -> Result<Vec<Pod>, StoreError> {
        let (selector, namespace, name) = match workload {
            Resource::Deployment(d) => (
                pod_selector(&d.spec.selector, &d.spec.template),
                d.metadata.namespace.as_deref(),
                &d.metadata.name,
            ),
            Resource::StatefulSet(s) => (
                pod_selector(&s.spec.selector, &s.spec.template),
                s.metadata.namespace.as_deref(),
                &s.metadata.name,
            ),
            _ => return Ok(Vec::new()),
        };
        let Some(namespace) = namespace else {
            return Ok(Vec::new());
        };

        let prefix = format!("{}-", name);
        let pods = self.store().list_pods(namespace, selector).await?;
        Ok(pods.into_iter().filter(|p| p.metadata.name.starts_with(&prefix)).collect())
    }

    /// Every pod of the app: workload pods plus the pods it declares directly.
    pub(crate) async fn pods_for_app(&self, ctx: &AppContext) -> Result<Vec<Pod>, StoreError> {
        let mut pods = Vec::new();
        for resource in &ctx.resources {
            match resource {
                Resource::Deployment(_) | Resource::StatefulSet(_) => {
                    pods.extend(self.workload_pods(resource).await?);
                }
                Resource::Pod(pod) => {
                    match get_typed::<Pod>(self.store(), pod.metadata.namespace.as_deref(), &pod.metadata.name).await {
                        Ok(live) => pods.push(live),
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                }
                _ => {}
            }
        }
        Ok(pods)
    }

    /// Stateful sets always scale. A deployment scales only if none of its
    /// claims is ReadWriteOnce.
    async fn is_scalable(&self, resource: &Resource) -> Result<bool, StoreError> {
        let dep = match resource {
            Resource::StatefulSet(_) => return Ok(true),
            Resource::Deployment(dep) => dep,
            _ => return Ok(false),
        };
        let namespace = dep.metadata.namespace.as_deref();
        for claim_name in dep.spec.template.spec.claim_names() {
            match get_typed::<PersistentVolumeClaim>(self.store(), namespace, claim_name).await {
                Ok(claim) if claim.is_read_write_once() => return Ok(false),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Current replica counts of the app's scalable workloads, keyed
    /// `<name>-dep` / `<name>-ss`.
    pub async fn get_scale_factor_map(&self, ctx: &AppContext) -> SchedulerResult<BTreeMap<String, i32>> {
        let mut factors = BTreeMap::new();
        for resource in &ctx.resources {
            let Some(factor_key) = scale_key(resource) else {
                continue;
            };
            let key = resource.key();
            match self.live_replicas(resource).await {
                Ok(Some(replicas)) => {
                    factors.insert(factor_key, replicas);
                }
                Ok(None) => {}
                Err(e) => return Err(update_failure(ctx, &key, e)),
            }
        }
        Ok(factors)
    }

    /// Live replica count of a scalable workload; `None` if it cannot scale.
    async fn live_replicas(&self, resource: &Resource) -> Result<Option<i32>, StoreError> {
        if !self.is_scalable(resource).await? {
            return Ok(None);
        }
        Ok(match self.store().get(&resource.key()).await? {
            Resource::Deployment(d) => Some(d.desired_replicas()),
            Resource::StatefulSet(s) => Some(s.desired_replicas()),
            _ => None,
        })
    }

    /// Set replica counts from `scale_map`. Workloads missing from the map,
    /// or not scalable, are left alone. The app needs validating afterwards.
    pub async fn scale_application(&self, ctx: &mut AppContext, scale_map: &BTreeMap<String, i32>) -> SchedulerResult<()> {
        let previous = ctx.begin(Stage::Scaling);
        match self.scale_workloads(ctx, scale_map).await {
            Ok(updated) => {
                for live in updated {
                    ctx.refresh(live);
                }
                Ok(())
            }
            Err(e) => Err(ctx.abort(previous, e)),
        }
    }

    async fn scale_workloads(&self, ctx: &AppContext, scale_map: &BTreeMap<String, i32>) -> SchedulerResult<Vec<Resource>> {
        let mut updated = Vec::new();
        for resource in &ctx.resources {
            let Some(replicas) = scale_key(resource).and_then(|k| scale_map.get(&k).copied()) else {
                continue;
            };
            let key = resource.key();
            let scalable = self.is_scalable(resource).await.map_err(|e| update_failure(ctx, &key, e))?;
            if !scalable {
                info!(app = %ctx.app_key, object = %key, "Skipping workload that cannot scale");
                continue;
            }

            let live = self.store().get(&key).await.map_err(|e| update_failure(ctx, &key, e))?;
            let scaled = match live {
                Resource::Deployment(mut d) => {
                    d.spec.replicas = Some(replicas);
                    update_typed(self.store(), d).await.map(Resource::from)
                }
                Resource::StatefulSet(mut s) => {
                    s.spec.replicas = Some(replicas);
                    update_typed(self.store(), s).await.map(Resource::from)
                }
                other => Ok(other),
            }
            .map_err(|e| update_failure(ctx, &key, e))?;

            info!(app = %ctx.app_key, object = %key, replicas, "Scaled workload");
            updated.push(scaled);
        }
        Ok(updated)
    }

    /// Nodes the app's pods run on. Waits for at least one running pod; a
    /// pod on a node the registry does not know is an error.
    pub async fn get_nodes_for_app(&self, ctx: &AppContext) -> SchedulerResult<Vec<Node>> {
        let names = do_retry(self.timeouts().default_policy(), || async move {
            let pods = match self.pods_for_app(ctx).await {
                Ok(pods) => pods,
                Err(e) if e.is_transient() => return RetryOutcome::Retry(e.to_string()),
                Err(e) => return RetryOutcome::Fail(e.to_string()),
            };

            let mut names = BTreeSet::new();
            for pod in pods.iter().filter(|p| p.is_ready()) {
                let Some(node) = pod.node_name() else {
                    continue;
                };
                if !self.nodes.contains(node) {
                    return RetryOutcome::Fail(format!(
                        "pod {} runs on node {} which is not in the registry",
                        pod.metadata.name, node
                    ));
                }
                names.insert(node.to_string());
            }
            if names.is_empty() {
                RetryOutcome::Retry("no running pods yet".to_string())
            } else {
                RetryOutcome::Done(names)
            }
        })
        .await
        .map_err(|e| SchedulerError::NodeLookupFailure {
            app: ctx.app_key.clone(),
            cause: e.to_string(),
        })?;

        Ok(names.iter().filter_map(|n| self.nodes.get(n).cloned()).collect())
    }

    /// Delete every pod of the app and wait for each to go away. A pod that
    /// comes back under the same name with a new uid counts as gone.
    pub async fn delete_tasks(&self, ctx: &AppContext) -> SchedulerResult<()> {
        let pods = self
            .pods_for_app(ctx)
            .await
            .map_err(|e| SchedulerError::DestroyFailure {
                app: ctx.app_key.clone(),
                object: ObjectRef::namespace(&ctx.namespace),
                cause: format!("failed to list pods: {}", e),
            })?;

        for pod in &pods {
            let key = pod_key(pod);
            self.delete_with_retry(&key, self.timeouts().destroy())
                .await
                .map_err(|e| destroy_failure(ctx, &key, e.to_string()))?;
        }

        let store = self.store();
        for pod in &pods {
            let key = pod_key(pod);
            let key = &key;
            let uid = pod.uid();
            do_retry(self.timeouts().delete_tasks_wait(), || async move {
                match store.get(key).await {
                    Err(e) if e.is_not_found() => RetryOutcome::Done(()),
                    Ok(live) if live.metadata().uid.as_deref() != uid => RetryOutcome::Done(()),
                    Ok(_) => RetryOutcome::Retry("pod still exists".to_string()),
                    Err(e) => RetryOutcome::Retry(e.to_string()),
                }
            })
            .await
            .map_err(|e| destroy_failure(ctx, key, e.to_string()))?;
            info!(app = %ctx.app_key, pod = %pod.metadata.name, "Deleted pod");
        }
        Ok(())
    }
}

fn pod_key(pod: &Pod) -> ResourceKey {
    ResourceKey::new(ResourceKind::Pod, pod.metadata.namespace.as_deref(), &pod.metadata.name)
}

fn update_failure(ctx: &AppContext, key: &ResourceKey, e: StoreError) -> SchedulerError {
    SchedulerError::UpdateFailure {
        app: ctx.app_key.clone(),
        object: ObjectRef::from(key),
        cause: e.to_string(),
    }
}

fn destroy_failure(ctx: &AppContext, key: &ResourceKey, cause: String) -> SchedulerError {
    SchedulerError::DestroyFailure {
        app: ctx.app_key.clone(),
        object: ObjectRef::from(key),
        cause,
    }
}
