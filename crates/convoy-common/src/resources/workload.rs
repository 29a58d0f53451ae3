//! Compute workloads and the core objects that accompany them.

use super::storage::PersistentVolumeClaim;
use crate::meta::{LabelSelector, ObjectMeta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    #[serde(default)]
    pub containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<PodVolume>,
}

impl PodSpec {
    /// Claim names referenced by this pod's volumes.
    pub fn claim_names(&self) -> impl Iterator<Item = &str> {
        self.volumes
            .iter()
            .filter_map(|v| v.persistent_volume_claim.as_ref())
            .map(|c| c.claim_name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,

    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodVolume {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<ClaimVolumeSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimVolumeSource {
    pub claim_name: String,

    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub ready_replicas: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: DeploymentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkloadStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default)]
    pub selector: LabelSelector,

    #[serde(default)]
    pub template: PodTemplateSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSet {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: StatefulSetSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkloadStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default)]
    pub selector: LabelSelector,

    #[serde(default)]
    pub service_name: String,

    #[serde(default)]
    pub template: PodTemplateSpec,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_templates: Vec<PersistentVolumeClaim>,
}

/// Replica count a workload asks for; an unset count means one.
pub fn desired_replicas(replicas: Option<i32>) -> i32 {
    replicas.unwrap_or(1)
}

impl Deployment {
    pub fn desired_replicas(&self) -> i32 {
        desired_replicas(self.spec.replicas)
    }

    pub fn ready_replicas(&self) -> i32 {
        self.status.as_ref().map_or(0, |s| s.ready_replicas)
    }
}

impl StatefulSet {
    pub fn desired_replicas(&self) -> i32 {
        desired_replicas(self.spec.replicas)
    }

    pub fn ready_replicas(&self) -> i32 {
        self.status.as_ref().map_or(0, |s| s.ready_replicas)
    }

    /// Claims the controller creates for each ordinal:
    /// `<template>-<statefulset>-<ordinal>`.
    pub fn claim_names(&self) -> Vec<String> {
        let replicas = self.desired_replicas().max(0);
        self.spec
            .volume_claim_templates
            .iter()
            .flat_map(|tmpl| {
                (0..replicas)
                    .map(move |ordinal| format!("{}-{}-{}", tmpl.metadata.name, self.metadata.name, ordinal))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    #[serde(default)]
    pub ports: Vec<ServicePort>,

    #[serde(default, rename = "clusterIP", skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub port: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub data: BTreeMap<String, String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub secret_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Pre/post-snapshot hook rule run inside selected pods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub rules: Vec<RuleItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleItem {
    #[serde(default)]
    pub pod_selector: BTreeMap<String, String>,

    #[serde(default)]
    pub actions: Vec<RuleActionItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleActionItem {
    #[serde(rename = "type")]
    pub action_type: String,

    pub value: String,

    #[serde(default)]
    pub background: bool,

    #[serde(default)]
    pub run_in_single_pod: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: PodSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PodStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,

    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,

    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub restart_count: u32,
}

impl Pod {
    pub fn phase(&self) -> PodPhase {
        self.status.as_ref().map_or(PodPhase::Pending, |s| s.phase)
    }

    /// Running with every reported container ready.
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.phase == PodPhase::Running && s.container_statuses.iter().all(|c| c.ready)
        })
    }

    pub fn node_name(&self) -> Option<&str> {
        self.spec.node_name.as_deref()
    }

    pub fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }
}

/// Condition/action policy evaluated by the cluster autoscaler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingRule {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ScalingRuleSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingRuleSpec {
    /// Objects the rule applies to.
    #[serde(default)]
    pub selector: LabelSelector,

    #[serde(default)]
    pub namespace_selector: LabelSelector,

    #[serde(default)]
    pub conditions: Vec<ConditionExpression>,

    #[serde(default)]
    pub actions: Vec<ScalingAction>,

    /// Seconds between condition evaluations.
    #[serde(default)]
    pub poll_interval: i64,

    /// Seconds to wait after an action before acting again.
    #[serde(default)]
    pub actions_cool_down_period: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionExpression {
    pub key: String,
    pub operator: ConditionOperator,

    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingAction {
    pub name: String,

    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statefulset_claim_names_follow_ordinals() {
        let ss = StatefulSet {
            metadata: ObjectMeta::named("cassandra"),
            spec: StatefulSetSpec {
                replicas: Some(2),
                volume_claim_templates: vec![PersistentVolumeClaim {
                    metadata: ObjectMeta::named("data"),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(ss.claim_names(), vec!["data-cassandra-0", "data-cassandra-1"]);
    }

    #[test]
    fn pod_readiness_requires_running_and_ready_containers() {
        let mut pod = Pod::default();
        assert!(!pod.is_ready());
        assert_eq!(pod.phase(), PodPhase::Pending);

        pod.status = Some(PodStatus {
            phase: PodPhase::Running,
            container_statuses: vec![
                ContainerStatus {
                    name: "app".into(),
                    ready: true,
                    restart_count: 0,
                },
                ContainerStatus {
                    name: "sidecar".into(),
                    ready: false,
                    restart_count: 2,
                },
            ],
        });
        assert!(!pod.is_ready());

        if let Some(status) = pod.status.as_mut() {
            status.container_statuses[1].ready = true;
        }
        assert!(pod.is_ready());
    }

    #[test]
    fn deployment_decodes_claim_references() {
        let yaml = r#"
metadata:
  name: mysql
spec:
  replicas: 2
  selector:
    matchLabels:
      app: mysql
  template:
    metadata:
      labels:
        app: mysql
    spec:
      containers:
        - name: mysql
          image: mysql:8
      volumes:
        - name: data
          persistentVolumeClaim:
            claimName: mysql-data
"#;
        let dep: Deployment = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(dep.desired_replicas(), 2);
        assert_eq!(dep.ready_replicas(), 0);
        assert_eq!(dep.spec.template.spec.claim_names().collect::<Vec<_>>(), vec!["mysql-data"]);
    }

    #[test]
    fn scaling_rule_decodes_conditions_and_actions() {
        let yaml = r#"
metadata:
  name: volume-resize
spec:
  selector:
    matchLabels:
      app: mysql
  conditions:
    - key: "100 * (used_bytes / capacity_bytes)"
      operator: Gt
      values: ["50"]
  actions:
    - name: resize-volume
      params:
        scalepercentage: "100"
  pollInterval: 2
"#;
        let rule: ScalingRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.spec.conditions[0].operator, ConditionOperator::Gt);
        assert_eq!(rule.spec.actions[0].params["scalepercentage"], "100");
        assert_eq!(rule.spec.poll_interval, 2);
    }
}
