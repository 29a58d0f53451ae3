//! Node-level actions: readiness, cordon/uncordon, the scheduler service
//! and draining a node before it is decommissioned.

use super::Orchestrator;
use crate::cluster::get_typed;
use crate::errors::{SchedulerError, SchedulerResult, StoreError};
use crate::node::{Node, ServiceAction, wait_for_node_ready};
use crate::retry::{RetryOutcome, RetryPolicy, do_retry};
use convoy_common::resources::{PersistentVolumeClaim, Pod, StorageClass};
use convoy_common::{ResourceKey, ResourceKind};
use std::time::Duration;
use tracing::info;

const SCHEDULING: &str = "scheduling";

/// One `base` timeout per started group of `step` pods.
fn decommission_policy(base: RetryPolicy, pods: usize, step: usize) -> RetryPolicy {
    let steps = u32::try_from((pods / step.max(1)).saturating_add(1)).unwrap_or(u32::MAX);
    RetryPolicy::new(base.timeout.saturating_mul(steps), base.interval)
}

impl Orchestrator {
    /// Wait for `node` to report ready.
    pub async fn is_node_ready(&self, node: &Node) -> SchedulerResult<()> {
        wait_for_node_ready(self.store(), &node.name, self.timeouts().node_ready()).await
    }

    /// Uncordon `node`.
    pub async fn enable_scheduling_on_node(&mut self, node: &Node) -> SchedulerResult<()> {
        self.set_scheduling(node, true).await
    }

    /// Cordon `node`: no new pods land on it.
    pub async fn disable_scheduling_on_node(&mut self, node: &Node) -> SchedulerResult<()> {
        self.set_scheduling(node, false).await
    }

    async fn set_scheduling(&mut self, node: &Node, schedulable: bool) -> SchedulerResult<()> {
        let action = if schedulable { "uncordon" } else { "cordon" };
        self.store()
            .set_unschedulable(&node.name, !schedulable)
            .await
            .map_err(|e| SchedulerError::NodeServiceFailure {
                node: node.name.clone(),
                service: SCHEDULING.to_string(),
                action: action.to_string(),
                cause: e.to_string(),
            })?;
        self.nodes.set_schedulable(&node.name, schedulable);
        info!(node = %node.name, action, "Changed node scheduling");
        Ok(())
    }

    /// Start the scheduler service on `node`.
    pub async fn start_sched_on_node(&self, node: &Node) -> SchedulerResult<()> {
        let timeout = self.timeouts().default_policy().timeout;
        self.scheduler_service(node, ServiceAction::Start, timeout).await
    }

    /// Stop the scheduler service on `node`.
    pub async fn stop_sched_on_node(&self, node: &Node) -> SchedulerResult<()> {
        let timeout = self.timeouts().find_files_on_worker();
        self.scheduler_service(node, ServiceAction::Stop, timeout).await
    }

    async fn scheduler_service(&self, node: &Node, action: ServiceAction, timeout: Duration) -> SchedulerResult<()> {
        let service = &self.config.cluster.scheduler_service;
        self.node_driver
            .systemctl(node, service, action, timeout)
            .await
            .map_err(|e| SchedulerError::NodeServiceFailure {
                node: node.name.clone(),
                service: service.clone(),
                action: action.to_string(),
                cause: e.to_string(),
            })?;
        info!(node = %node.name, service = %service, action = %action, "Ran node service action");
        Ok(())
    }

    /// Delete the pods on `node` whose volumes come from `provisioner` and
    /// wait for them to go away. The wait allows one default timeout per
    /// `pods_per_decommission_step` pods.
    pub async fn prepare_node_to_decommission(&self, node: &Node, provisioner: &str) -> SchedulerResult<()> {
        let decommission_failure = |cause: String| SchedulerError::DecommissionFailure {
            node: node.name.clone(),
            cause,
        };

        let pods = self
            .store()
            .pods_on_node(&node.name)
            .await
            .map_err(|e| decommission_failure(format!("failed to list pods: {}", e)))?;

        let mut drained = Vec::new();
        for pod in pods {
            let uses = self
                .uses_provisioner(&pod, provisioner)
                .await
                .map_err(|e| decommission_failure(format!("failed to inspect pod {}: {}", pod.metadata.name, e)))?;
            if uses {
                drained.push(pod);
            }
        }

        for pod in &drained {
            let key = ResourceKey::new(ResourceKind::Pod, pod.metadata.namespace.as_deref(), &pod.metadata.name);
            self.delete_with_retry(&key, self.timeouts().destroy())
                .await
                .map_err(|e| decommission_failure(format!("failed to delete pod {}: {}", key, e)))?;
        }

        let policy = decommission_policy(
            self.timeouts().default_policy(),
            drained.len(),
            self.config.cluster.pods_per_decommission_step,
        );
        let store = self.store();
        let drained = &drained;
        do_retry(policy, || async move {
            for pod in drained {
                let key = ResourceKey::new(ResourceKind::Pod, pod.metadata.namespace.as_deref(), &pod.metadata.name);
                match store.get(&key).await {
                    Err(e) if e.is_not_found() => {}
                    Ok(live) if live.metadata().uid.as_deref() != pod.uid() => {}
                    Ok(_) => return RetryOutcome::Retry(format!("pod {} still on node", key)),
                    Err(e) => return RetryOutcome::Retry(e.to_string()),
                }
            }
            RetryOutcome::Done(())
        })
        .await
        .map_err(|e| decommission_failure(e.to_string()))?;

        info!(node = %node.name, provisioner, pods = drained.len(), "Node drained for decommission");
        Ok(())
    }

    /// Whether any claim mounted by `pod` belongs to a storage class of
    /// `provisioner`.
    async fn uses_provisioner(&self, pod: &Pod, provisioner: &str) -> Result<bool, StoreError> {
        let namespace = pod.metadata.namespace.as_deref();
        for claim_name in pod.spec.claim_names() {
            let claim = match get_typed::<PersistentVolumeClaim>(self.store(), namespace, claim_name).await {
                Ok(claim) => claim,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let Some(class_name) = &claim.spec.storage_class_name else {
                continue;
            };
            match get_typed::<StorageClass>(self.store(), None, class_name).await {
                Ok(class) if class.provisioner == provisioner => return Ok(true),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterStore, Verb};
    use crate::orchestrator::ScheduleOptions;
    use crate::orchestrator::testing::{MYSQL, PROVISIONER, harness, worker};

    const CACHE: &str = r#"
kind: Deployment
metadata:
  name: cache
spec:
  replicas: 2
  template:
    metadata:
      labels:
        app: cache
    spec:
      containers:
        - name: memcached
          image: memcached:1.6
"#;

    #[test]
    fn test_decommission_policy_grows_per_step() {
        let base = RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(10));
        assert_eq!(decommission_policy(base, 0, 40).timeout, Duration::from_secs(60));
        assert_eq!(decommission_policy(base, 81, 40).timeout, Duration::from_secs(180));
        assert_eq!(decommission_policy(base, 5, 0).timeout, Duration::from_secs(360));
        assert_eq!(decommission_policy(base, 81, 40).interval, base.interval);
    }

    #[test]
    fn test_decommission_policy_saturates() {
        let base = RetryPolicy::new(Duration::from_secs(u64::MAX / 2), Duration::from_secs(10));
        assert_eq!(decommission_policy(base, usize::MAX, 1).timeout, Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cordon_and_uncordon() {
        let mut h = harness(&[]).await;
        let node = worker(&h, "worker-0");

        h.orchestrator.disable_scheduling_on_node(&node).await.unwrap();
        assert!(h.cluster.get_node("worker-0").await.unwrap().unschedulable);
        assert!(!worker(&h, "worker-0").schedulable);

        h.orchestrator.enable_scheduling_on_node(&node).await.unwrap();
        assert!(!h.cluster.get_node("worker-0").await.unwrap().unschedulable);
        assert!(worker(&h, "worker-0").schedulable);
        assert_eq!(h.cluster.count(Verb::SetUnschedulable, "Node worker-0").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cordon_failure_names_node() {
        let mut h = harness(&[]).await;
        let node = worker(&h, "worker-1");
        h.cluster
            .inject_fault(Verb::SetUnschedulable, None, StoreError::Unavailable("api down".into()), 1)
            .await;

        let err = h.orchestrator.disable_scheduling_on_node(&node).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::NodeServiceFailure { ref node, ref action, .. } if node == "worker-1" && action == "cordon"
        ));
        assert!(worker(&h, "worker-1").schedulable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_start_scheduler_service() {
        let h = harness(&[]).await;
        let node = worker(&h, "worker-0");
        let service = h.orchestrator.config().cluster.scheduler_service.clone();

        h.orchestrator.stop_sched_on_node(&node).await.unwrap();
        assert!(!h.node_driver.service_running("worker-0", &service).await);
        h.orchestrator.start_sched_on_node(&node).await.unwrap();
        assert!(h.node_driver.service_running("worker-0", &service).await);

        h.node_driver.mark_unreachable("worker-0").await;
        let err = h.orchestrator.stop_sched_on_node(&node).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NodeServiceFailure { ref action, .. } if action == "stop"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_ready() {
        let h = harness(&[]).await;
        h.orchestrator.is_node_ready(&worker(&h, "worker-0")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_decommission_drains_only_provisioner_pods() {
        let h = harness(&[("mysql", MYSQL), ("cache", CACHE)]).await;
        h.orchestrator
            .schedule("1", &ScheduleOptions::for_apps(["mysql", "cache"]))
            .await
            .unwrap();

        let mysql_pod = h
            .cluster
            .list_pods("mysql-1", &Default::default())
            .await
            .unwrap()
            .remove(0);
        let node = worker(&h, mysql_pod.node_name().unwrap());
        let cache_before: Vec<Pod> = h
            .cluster
            .pods_on_node(&node.name)
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some("cache-1"))
            .collect();

        h.orchestrator.prepare_node_to_decommission(&node, PROVISIONER).await.unwrap();

        let remaining = h.cluster.pods_on_node(&node.name).await.unwrap();
        assert!(remaining.iter().all(|p| p.metadata.namespace.as_deref() != Some("mysql-1")));
        assert_eq!(
            remaining
                .iter()
                .filter(|p| p.metadata.namespace.as_deref() == Some("cache-1"))
                .count(),
            cache_before.len()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_decommission_ignores_other_provisioners() {
        let h = harness(&[("mysql", MYSQL)]).await;
        h.orchestrator.schedule("1", &ScheduleOptions::for_apps(["mysql"])).await.unwrap();
        let pod = h
            .cluster
            .list_pods("mysql-1", &Default::default())
            .await
            .unwrap()
            .remove(0);
        let node = worker(&h, pod.node_name().unwrap());

        h.orchestrator
            .prepare_node_to_decommission(&node, "kubernetes.io/aws-ebs")
            .await
            .unwrap();
        assert_eq!(h.cluster.pods_on_node(&node.name).await.unwrap().len(), 1);
    }
}
