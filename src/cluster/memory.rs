//! In-process cluster store.
//!
//! Assigns UIDs and resource versions, enforces "already exists" and
//! "not found", records every call in an operation log and can fail calls on
//! demand. With convergence enabled it also plays the controllers: workloads
//! get running pods on worker nodes, claims bind, snapshots become ready and
//! transfer objects finish. Pods place their volume directory on an attached
//! [`InMemoryNodeDriver`] and remove it again when deleted.

use super::ClusterStore;
use crate::errors::StoreError;
use crate::node::{InMemoryNodeDriver, pod_volume_dir};
use async_trait::async_trait;
use chrono::Utc;
use convoy_common::meta::selector_matches;
use convoy_common::resources::{
    ClaimPhase, ClaimStatus, ClaimVolumeSource, ClusterNode, ClusterPairStatus, ContainerStatus,
    GroupVolumeSnapshotStatus, MASTER_ROLE_LABELS, MigrationScheduleStatus, Namespace, PairStatus,
    PersistentVolumeClaim, Pod, PodPhase, PodStatus, PodTemplateSpec, PodVolume, REGION_LABEL, RestoreVolumeInfo,
    STORAGE_RESOURCE, ScheduledTransfer, TransferState, TransferStatus, VolumeSnapshot, VolumeSnapshotRestoreStatus,
    VolumeSnapshotSpec, VolumeSnapshotStatus, WorkloadStatus, ZONE_LABEL,
};
use convoy_common::{ObjectMeta, Resource, ResourceKey, ResourceKind};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Get,
    Update,
    Delete,
    List,
    CreateNamespace,
    GetNamespace,
    ListNodes,
    SetUnschedulable,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Create => "create",
            Verb::Get => "get",
            Verb::Update => "update",
            Verb::Delete => "delete",
            Verb::List => "list",
            Verb::CreateNamespace => "create-namespace",
            Verb::GetNamespace => "get-namespace",
            Verb::ListNodes => "list-nodes",
            Verb::SetUnschedulable => "set-unschedulable",
        };
        f.write_str(s)
    }
}

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOp {
    pub verb: Verb,
    pub target: String,
}

#[derive(Debug)]
struct Fault {
    verb: Verb,
    kind: Option<ResourceKind>,
    error: StoreError,
    remaining: usize,
}

#[derive(Debug, Default)]
struct ClusterState {
    objects: BTreeMap<ResourceKey, Resource>,
    namespaces: BTreeMap<String, Namespace>,
    nodes: BTreeMap<String, ClusterNode>,
    /// Pods and claims created on behalf of a workload.
    owners: BTreeMap<ResourceKey, ResourceKey>,
    ops: Vec<StoreOp>,
    faults: Vec<Fault>,
    next_version: u64,
    next_placement: usize,
}

/// Volume directory changes to apply on the node driver once the state lock
/// is released.
#[derive(Debug, Default)]
struct DirEffects {
    added: Vec<(String, String)>,
    removed: Vec<(String, String)>,
}

pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
    auto_converge: bool,
    node_driver: Option<(InMemoryNodeDriver, String)>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// An empty cluster with convergence enabled and no nodes.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClusterState::default()),
            auto_converge: true,
            node_driver: None,
        }
    }

    /// One ready master (`master-0`) plus `workers` ready workers
    /// (`worker-<i>`, zone `zone-<i>`).
    pub fn with_workers(workers: usize) -> Self {
        let mut nodes = BTreeMap::new();
        let master = synthetic_node("master-0", true, None);
        nodes.insert(master.metadata.name.clone(), master);
        for i in 0..workers {
            let node = synthetic_node(&format!("worker-{}", i), false, Some(i));
            nodes.insert(node.metadata.name.clone(), node);
        }

        let cluster = Self::new();
        let state = ClusterState {
            nodes,
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            ..cluster
        }
    }

    pub fn with_auto_converge(mut self, enabled: bool) -> Self {
        self.auto_converge = enabled;
        self
    }

    /// Place pod volume directories under `pods_root` on `driver`.
    pub fn with_node_driver(mut self, driver: InMemoryNodeDriver, pods_root: impl Into<String>) -> Self {
        self.node_driver = Some((driver, pods_root.into()));
        self
    }

    pub async fn add_node(&self, node: ClusterNode) {
        let mut state = self.state.lock().await;
        state.nodes.insert(node.metadata.name.clone(), node);
    }

    /// Fail the next `times` calls of `verb` (for `kind`, or any kind) with `error`.
    pub async fn inject_fault(&self, verb: Verb, kind: Option<ResourceKind>, error: StoreError, times: usize) {
        self.state.lock().await.faults.push(Fault {
            verb,
            kind,
            error,
            remaining: times,
        });
    }

    pub async fn ops(&self) -> Vec<StoreOp> {
        self.state.lock().await.ops.clone()
    }

    /// Index of the first recorded `verb` on `target` in the operation log.
    pub async fn position(&self, verb: Verb, target: &str) -> Option<usize> {
        self.state
            .lock()
            .await
            .ops
            .iter()
            .position(|op| op.verb == verb && op.target == target)
    }

    pub async fn count(&self, verb: Verb, target: &str) -> usize {
        self.state
            .lock()
            .await
            .ops
            .iter()
            .filter(|op| op.verb == verb && op.target == target)
            .count()
    }

    /// Change a stored object in place, as a controller would.
    pub async fn mutate<F>(&self, key: &ResourceKey, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Resource),
    {
        let mut state = self.state.lock().await;
        let object = state
            .objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        f(object);
        Ok(())
    }

    pub async fn contains(&self, key: &ResourceKey) -> bool {
        self.state.lock().await.objects.contains_key(key)
    }

    pub async fn object_count(&self, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .await
            .objects
            .keys()
            .filter(|k| k.kind == kind)
            .count()
    }

    async fn apply(&self, effects: DirEffects) {
        let Some((driver, _)) = &self.node_driver else {
            return;
        };
        for (node, path) in effects.added {
            driver.add_file(&node, &path).await;
        }
        for (node, path) in effects.removed {
            driver.remove_file(&node, &path).await;
        }
    }

    fn pods_root(&self) -> Option<&str> {
        self.node_driver.as_ref().map(|(_, root)| root.as_str())
    }
}

fn synthetic_node(name: &str, master: bool, index: Option<usize>) -> ClusterNode {
    let mut meta = ObjectMeta::named(name);
    meta.uid = Some(Uuid::new_v4().to_string());
    if master {
        meta.labels.insert(MASTER_ROLE_LABELS[0].to_string(), String::new());
    }
    if let Some(i) = index {
        meta.labels.insert(ZONE_LABEL.to_string(), format!("zone-{}", i));
        meta.labels.insert(REGION_LABEL.to_string(), "region-0".to_string());
    }
    ClusterNode {
        metadata: meta,
        ready: true,
        ..Default::default()
    }
}

impl ClusterState {
    fn record(&mut self, verb: Verb, target: impl Into<String>) {
        self.ops.push(StoreOp {
            verb,
            target: target.into(),
        });
    }

    fn check_fault(&mut self, verb: Verb, kind: Option<ResourceKind>) -> Result<(), StoreError> {
        let fault = self.faults.iter_mut().find(|f| {
            f.remaining > 0 && f.verb == verb && (f.kind.is_none() || f.kind == kind)
        });
        match fault {
            Some(fault) => {
                fault.remaining -= 1;
                Err(fault.error.clone())
            }
            None => Ok(()),
        }
    }

    fn next_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn stamp(&mut self, meta: &mut ObjectMeta) {
        meta.uid = Some(Uuid::new_v4().to_string());
        meta.resource_version = Some(self.next_version());
        meta.creation_timestamp = Some(Utc::now());
    }

    /// Next schedulable, ready worker, round-robin.
    fn place(&mut self) -> Option<String> {
        let workers: Vec<&ClusterNode> = self
            .nodes
            .values()
            .filter(|n| n.ready && !n.unschedulable && !n.is_master())
            .collect();
        if workers.is_empty() {
            return None;
        }
        let node = workers[self.next_placement % workers.len()].metadata.name.clone();
        self.next_placement += 1;
        Some(node)
    }

    fn insert_owned(&mut self, owner: &ResourceKey, resource: Resource) {
        let key = resource.key();
        self.owners.insert(key.clone(), owner.clone());
        self.objects.insert(key, resource);
    }

    fn owned_by(&self, owner: &ResourceKey, kind: ResourceKind) -> Vec<ResourceKey> {
        self.owners
            .iter()
            .filter(|(child, o)| *o == owner && child.kind == kind)
            .map(|(child, _)| child.clone())
            .collect()
    }

    fn remove_pod(&mut self, key: &ResourceKey, pods_root: Option<&str>, effects: &mut DirEffects) {
        self.owners.remove(key);
        if let Some(Resource::Pod(pod)) = self.objects.remove(key)
            && let (Some(root), Some(node), Some(uid)) = (pods_root, pod.node_name(), pod.uid())
        {
            effects.removed.push((node.to_string(), pod_volume_dir(root, uid)));
        }
    }

    /// Bring the owner's pods to `replicas`, naming them `<owner>-<ordinal>`.
    /// Returns how many of them are ready.
    fn reconcile_pods(
        &mut self,
        owner: &ResourceKey,
        template: &PodTemplateSpec,
        replicas: i32,
        claim_templates: &[String],
        pods_root: Option<&str>,
        effects: &mut DirEffects,
    ) -> i32 {
        let namespace = owner.namespace.clone();
        let replicas = replicas.max(0) as usize;

        let mut existing = self.owned_by(owner, ResourceKind::Pod);
        existing.sort();
        for key in existing.iter() {
            let ordinal = key
                .name
                .rsplit('-')
                .next()
                .and_then(|n| n.parse::<usize>().ok());
            if ordinal.is_none_or(|o| o >= replicas) {
                self.remove_pod(key, pods_root, effects);
            }
        }

        let mut ready = 0;
        for ordinal in 0..replicas {
            let name = format!("{}-{}", owner.name, ordinal);
            let key = ResourceKey::new(ResourceKind::Pod, namespace.as_deref(), &name);
            if let Some(Resource::Pod(pod)) = self.objects.get(&key) {
                if pod.is_ready() {
                    ready += 1;
                }
                continue;
            }

            let mut meta = ObjectMeta {
                name,
                namespace: namespace.clone(),
                labels: template.metadata.labels.clone(),
                ..Default::default()
            };
            self.stamp(&mut meta);

            let mut spec = template.spec.clone();
            for claim_template in claim_templates {
                spec.volumes.push(PodVolume {
                    name: claim_template.clone(),
                    persistent_volume_claim: Some(ClaimVolumeSource {
                        claim_name: format!("{}-{}-{}", claim_template, owner.name, ordinal),
                        read_only: false,
                    }),
                });
            }

            let mut pod = Pod {
                metadata: meta,
                spec,
                status: None,
            };
            if self.converge_pod(&mut pod, pods_root, effects) {
                ready += 1;
            }
            self.insert_owned(owner, pod.into());
        }
        ready as i32
    }

    /// Schedule and start a pod. Returns whether it is ready.
    fn converge_pod(&mut self, pod: &mut Pod, pods_root: Option<&str>, effects: &mut DirEffects) -> bool {
        if pod.spec.node_name.is_none() {
            pod.spec.node_name = self.place();
        }
        let Some(node) = pod.spec.node_name.clone() else {
            pod.status = Some(PodStatus::default());
            return false;
        };
        pod.status = Some(PodStatus {
            phase: PodPhase::Running,
            container_statuses: pod
                .spec
                .containers
                .iter()
                .map(|c| ContainerStatus {
                    name: c.name.clone(),
                    ready: true,
                    restart_count: 0,
                })
                .collect(),
        });
        if let (Some(root), Some(uid)) = (pods_root, pod.uid()) {
            effects.added.push((node, pod_volume_dir(root, uid)));
        }
        true
    }

    fn converge(&mut self, resource: &mut Resource, pods_root: Option<&str>, effects: &mut DirEffects) {
        let key = resource.key();
        match resource {
            Resource::Deployment(dep) => {
                let ready = self.reconcile_pods(
                    &key,
                    &dep.spec.template,
                    dep.desired_replicas(),
                    &[],
                    pods_root,
                    effects,
                );
                dep.status = Some(WorkloadStatus {
                    replicas: dep.desired_replicas(),
                    ready_replicas: ready,
                });
            }
            Resource::StatefulSet(ss) => {
                for (ordinal, claim_name) in ss.claim_names().into_iter().enumerate() {
                    let claim_key = ResourceKey::new(ResourceKind::PersistentVolumeClaim, key.namespace.as_deref(), &claim_name);
                    if self.objects.contains_key(&claim_key) {
                        continue;
                    }
                    let per_template = ss.desired_replicas().max(1) as usize;
                    let template = &ss.spec.volume_claim_templates[ordinal / per_template];
                    let mut claim = PersistentVolumeClaim {
                        metadata: ObjectMeta {
                            name: claim_name,
                            namespace: key.namespace.clone(),
                            labels: ss.spec.template.metadata.labels.clone(),
                            annotations: template.metadata.annotations.clone(),
                            ..Default::default()
                        },
                        spec: template.spec.clone(),
                        status: None,
                    };
                    self.stamp(&mut claim.metadata);
                    bind_claim(&mut claim);
                    self.insert_owned(&key, claim.into());
                }

                let claim_templates: Vec<String> = ss
                    .spec
                    .volume_claim_templates
                    .iter()
                    .map(|t| t.metadata.name.clone())
                    .collect();
                let ready = self.reconcile_pods(
                    &key,
                    &ss.spec.template,
                    ss.desired_replicas(),
                    &claim_templates,
                    pods_root,
                    effects,
                );
                ss.status = Some(WorkloadStatus {
                    replicas: ss.desired_replicas(),
                    ready_replicas: ready,
                });
            }
            Resource::PersistentVolumeClaim(claim) => bind_claim(claim),
            Resource::Pod(pod) => {
                self.converge_pod(pod, pods_root, effects);
            }
            Resource::VolumeSnapshot(snap) => {
                if snap.spec.snapshot_data_name.is_none() {
                    let uid = snap.metadata.uid.clone().unwrap_or_default();
                    snap.spec.snapshot_data_name = Some(format!("snapdata-{}", uid));
                }
                snap.status = Some(VolumeSnapshotStatus {
                    ready: true,
                    error: None,
                });
            }
            Resource::GroupVolumeSnapshot(group) => {
                let claims: Vec<String> = self
                    .objects
                    .values()
                    .filter_map(|r| match r {
                        Resource::PersistentVolumeClaim(c)
                            if c.metadata.namespace == key.namespace
                                && group.spec.pvc_selector.matches(&c.metadata.labels) =>
                        {
                            Some(c.metadata.name.clone())
                        }
                        _ => None,
                    })
                    .collect();

                let mut members = Vec::with_capacity(claims.len());
                for claim in claims {
                    let name = format!("{}-snap-{}", group.metadata.name, claim);
                    let snap_key = ResourceKey::new(ResourceKind::VolumeSnapshot, key.namespace.as_deref(), &name);
                    if !self.objects.contains_key(&snap_key) {
                        let mut snap = VolumeSnapshot {
                            metadata: ObjectMeta {
                                name: name.clone(),
                                namespace: key.namespace.clone(),
                                ..Default::default()
                            },
                            spec: VolumeSnapshotSpec {
                                persistent_volume_claim_name: claim,
                                snapshot_data_name: None,
                            },
                            status: None,
                        };
                        self.stamp(&mut snap.metadata);
                        let mut member = Resource::from(snap);
                        self.converge(&mut member, pods_root, effects);
                        self.insert_owned(&key, member);
                    }
                    members.push(name);
                }
                group.status = Some(GroupVolumeSnapshotStatus {
                    status: TransferState::Successful,
                    volume_snapshots: members,
                });
            }
            Resource::VolumeSnapshotRestore(restore) => {
                let snapshot_key = ResourceKey::new(
                    ResourceKind::VolumeSnapshot,
                    Some(&restore.spec.source_namespace),
                    &restore.spec.source_name,
                );
                let volumes = match self.objects.get(&snapshot_key) {
                    Some(Resource::VolumeSnapshot(snap)) => {
                        let claim_key = ResourceKey::new(
                            ResourceKind::PersistentVolumeClaim,
                            Some(&restore.spec.source_namespace),
                            &snap.spec.persistent_volume_claim_name,
                        );
                        let volume = match self.objects.get(&claim_key) {
                            Some(Resource::PersistentVolumeClaim(c)) => c
                                .spec
                                .volume_name
                                .clone()
                                .unwrap_or_else(|| c.metadata.name.clone()),
                            _ => snap.spec.persistent_volume_claim_name.clone(),
                        };
                        vec![RestoreVolumeInfo {
                            volume,
                            snapshot: snap.metadata.name.clone(),
                            status: TransferState::Successful,
                        }]
                    }
                    _ => Vec::new(),
                };
                restore.status = Some(VolumeSnapshotRestoreStatus {
                    status: TransferState::Successful,
                    volumes,
                });
            }
            Resource::ClusterPair(pair) => {
                pair.status = Some(ClusterPairStatus {
                    scheduler_status: PairStatus::Ready,
                    storage_status: PairStatus::Ready,
                });
            }
            Resource::Migration(m) => m.status = Some(TransferStatus::completed()),
            Resource::ApplicationBackup(b) => b.status = Some(TransferStatus::completed()),
            Resource::ApplicationRestore(r) => r.status = Some(TransferStatus::completed()),
            Resource::ApplicationClone(c) => c.status = Some(TransferStatus::completed()),
            Resource::MigrationSchedule(schedule) => {
                if schedule.status.as_ref().is_none_or(|s| s.items.is_empty()) {
                    schedule.status = Some(MigrationScheduleStatus {
                        items: vec![ScheduledTransfer {
                            name: format!("{}-interval-{}", schedule.metadata.name, Utc::now().format("%Y-%m-%d-%H%M%S")),
                            status: TransferState::Successful,
                            creation_timestamp: Some(Utc::now()),
                        }],
                    });
                }
            }
            Resource::SchedulePolicy(_)
            | Resource::StorageClass(_)
            | Resource::Service(_)
            | Resource::Secret(_)
            | Resource::ConfigMap(_)
            | Resource::Rule(_)
            | Resource::ScalingRule(_)
            | Resource::BackupLocation(_) => {}
        }
    }
}

fn bind_claim(claim: &mut PersistentVolumeClaim) {
    if claim.spec.volume_name.is_none() {
        let uid = claim.metadata.uid.clone().unwrap_or_default();
        claim.spec.volume_name = Some(format!("pvc-{}", uid));
    }
    let mut capacity = BTreeMap::new();
    if let Some(size) = claim.requested_size() {
        capacity.insert(STORAGE_RESOURCE.to_string(), size);
    }
    claim.status = Some(ClaimStatus {
        phase: ClaimPhase::Bound,
        capacity,
    });
}

/// Carry the stored object's status over to an incoming update.
fn preserve_status(incoming: Resource, existing: &Resource) -> Resource {
    let (Ok(mut value), Ok(old)) = (serde_json::to_value(&incoming), serde_json::to_value(existing)) else {
        return incoming;
    };
    if let (Some(map), Some(status)) = (value.as_object_mut(), old.get("status")) {
        map.insert("status".to_string(), status.clone());
    }
    serde_json::from_value(value).unwrap_or(incoming)
}

#[async_trait]
impl ClusterStore for InMemoryCluster {
    async fn create(&self, mut resource: Resource) -> Result<Resource, StoreError> {
        let key = resource.key();
        let mut effects = DirEffects::default();
        let created = {
            let mut state = self.state.lock().await;
            state.record(Verb::Create, key.to_string());
            state.check_fault(Verb::Create, Some(key.kind))?;

            if let Some(ns) = &key.namespace
                && !state.namespaces.contains_key(ns)
            {
                return Err(StoreError::NotFound(format!("Namespace {}", ns)));
            }
            if state.objects.contains_key(&key) {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }

            state.stamp(resource.metadata_mut());
            if self.auto_converge {
                state.converge(&mut resource, self.pods_root(), &mut effects);
            }
            state.objects.insert(key, resource.clone());
            resource
        };
        self.apply(effects).await;
        Ok(created)
    }

    async fn get(&self, key: &ResourceKey) -> Result<Resource, StoreError> {
        let mut state = self.state.lock().await;
        state.record(Verb::Get, key.to_string());
        state.check_fault(Verb::Get, Some(key.kind))?;
        state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn update(&self, resource: Resource) -> Result<Resource, StoreError> {
        let key = resource.key();
        let mut effects = DirEffects::default();
        let updated = {
            let mut state = self.state.lock().await;
            state.record(Verb::Update, key.to_string());
            state.check_fault(Verb::Update, Some(key.kind))?;

            let existing = state
                .objects
                .get(&key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

            let mut updated = preserve_status(resource, &existing);
            {
                let meta = updated.metadata_mut();
                meta.uid = existing.metadata().uid.clone();
                meta.creation_timestamp = existing.metadata().creation_timestamp;
            }
            updated.metadata_mut().resource_version = Some(state.next_version());
            if self.auto_converge {
                state.converge(&mut updated, self.pods_root(), &mut effects);
            }
            state.objects.insert(key, updated.clone());
            updated
        };
        self.apply(effects).await;
        Ok(updated)
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), StoreError> {
        let mut effects = DirEffects::default();
        {
            let mut state = self.state.lock().await;
            state.record(Verb::Delete, key.to_string());
            state.check_fault(Verb::Delete, Some(key.kind))?;

            if !state.objects.contains_key(key) {
                return Err(StoreError::NotFound(key.to_string()));
            }
            if key.kind == ResourceKind::Pod {
                state.remove_pod(key, self.pods_root(), &mut effects);
            } else {
                state.objects.remove(key);
                state.owners.remove(key);
            }

            // Owned pods and snapshots go with their owner; owned claims stay behind.
            for pod in state.owned_by(key, ResourceKind::Pod) {
                state.remove_pod(&pod, self.pods_root(), &mut effects);
            }
            for snap in state.owned_by(key, ResourceKind::VolumeSnapshot) {
                state.objects.remove(&snap);
                state.owners.remove(&snap);
            }
        }
        self.apply(effects).await;
        Ok(())
    }

    async fn list(&self, kind: ResourceKind, namespace: Option<&str>) -> Result<Vec<Resource>, StoreError> {
        let mut state = self.state.lock().await;
        state.record(Verb::List, format!("{} {}", kind, namespace.unwrap_or("*")));
        state.check_fault(Verb::List, Some(kind))?;
        Ok(state
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind && (namespace.is_none() || k.namespace.as_deref() == namespace))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn create_namespace(&self, mut namespace: Namespace) -> Result<Namespace, StoreError> {
        let mut state = self.state.lock().await;
        let name = namespace.metadata.name.clone();
        state.record(Verb::CreateNamespace, format!("Namespace {}", name));
        state.check_fault(Verb::CreateNamespace, None)?;
        if state.namespaces.contains_key(&name) {
            return Err(StoreError::AlreadyExists(format!("Namespace {}", name)));
        }
        state.stamp(&mut namespace.metadata);
        state.namespaces.insert(name, namespace.clone());
        Ok(namespace)
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, StoreError> {
        let mut state = self.state.lock().await;
        state.record(Verb::GetNamespace, format!("Namespace {}", name));
        state.check_fault(Verb::GetNamespace, None)?;
        state
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Namespace {}", name)))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, StoreError> {
        let mut state = self.state.lock().await;
        state.record(Verb::List, format!("Pod {}", namespace));
        state.check_fault(Verb::List, Some(ResourceKind::Pod))?;
        Ok(state
            .objects
            .values()
            .filter_map(|r| match r {
                Resource::Pod(pod)
                    if pod.metadata.namespace.as_deref() == Some(namespace)
                        && selector_matches(selector, &pod.metadata.labels) =>
                {
                    Some(pod.clone())
                }
                _ => None,
            })
            .collect())
    }

    async fn pods_on_node(&self, node: &str) -> Result<Vec<Pod>, StoreError> {
        let mut state = self.state.lock().await;
        state.record(Verb::List, format!("Pod node={}", node));
        state.check_fault(Verb::List, Some(ResourceKind::Pod))?;
        Ok(state
            .objects
            .values()
            .filter_map(|r| match r {
                Resource::Pod(pod) if pod.node_name() == Some(node) => Some(pod.clone()),
                _ => None,
            })
            .collect())
    }

    async fn list_nodes(&self) -> Result<Vec<ClusterNode>, StoreError> {
        let mut state = self.state.lock().await;
        state.record(Verb::ListNodes, "Node *");
        state.check_fault(Verb::ListNodes, None)?;
        Ok(state.nodes.values().cloned().collect())
    }

    async fn get_node(&self, name: &str) -> Result<ClusterNode, StoreError> {
        let state = self.state.lock().await;
        state
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Node {}", name)))
    }

    async fn set_unschedulable(&self, node: &str, unschedulable: bool) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.record(Verb::SetUnschedulable, format!("Node {}", node));
        state.check_fault(Verb::SetUnschedulable, None)?;
        let entry = state
            .nodes
            .get_mut(node)
            .ok_or_else(|| StoreError::NotFound(format!("Node {}", node)))?;
        entry.unschedulable = unschedulable;
        Ok(())
    }
}
