//! Turning one descriptor into one live cluster object.
//!
//! Before submission a descriptor is bound to the app namespace, has its
//! `{{NAMESPACE}}` placeholders substituted and picks up the provisioner,
//! replica scaling and security annotations the schedule calls for. Creation
//! is create-or-adopt: a name collision fetches the existing object and uses
//! it, warning if its declared state differs from the request.

use super::Orchestrator;
use super::autoscale::AutoscaleParams;
use crate::cluster::get_typed;
use crate::errors::{ObjectRef, SchedulerError, SchedulerResult, StoreError};
use crate::retry::{RetryError, RetryOutcome, RetryPolicy, do_retry};
use convoy_common::resources::{ConfigMap, PodSpec, Secret};
use convoy_common::{ObjectMeta, Resource, ResourceKey, ResourceKind};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{info, warn};

pub const NAMESPACE_PLACEHOLDER: &str = "{{NAMESPACE}}";

pub const SECRET_NAME_ANNOTATION: &str = "openstorage.io/auth-secret-name";
pub const SECRET_NAMESPACE_ANNOTATION: &str = "openstorage.io/auth-secret-namespace";

const SECRET_NAME_KEY: &str = "secret_name";
const SECRET_NAMESPACE_KEY: &str = "secret_namespace";
const AUTH_TOKEN_KEY: &str = "auth-token";

/// Rules declared here stay here instead of moving to the app namespace.
const SYSTEM_NAMESPACE: &str = "kube-system";

// Tolerates inner whitespace: `{{ NAMESPACE }}`
static NAMESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{\s*NAMESPACE\s*\}\}").unwrap());

/// Auth secret reference injected into objects the storage layer acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityAnnotations {
    pub secret_name: String,
    pub secret_namespace: String,
}

impl SecurityAnnotations {
    pub fn from_config_map(config_map: &ConfigMap) -> SchedulerResult<Self> {
        let lookup = |key: &str| {
            config_map
                .data
                .get(key)
                .cloned()
                .ok_or_else(|| SchedulerError::ConfigLookupFailure {
                    name: config_map.metadata.name.clone(),
                    cause: format!("missing '{}' key", key),
                })
        };
        Ok(Self {
            secret_name: lookup(SECRET_NAME_KEY)?,
            secret_namespace: lookup(SECRET_NAMESPACE_KEY)?,
        })
    }

    /// Annotate `resource` if its kind takes security annotations. For a
    /// stateful set the claim templates are annotated instead.
    pub fn apply(&self, resource: &mut Resource) {
        match resource {
            Resource::StatefulSet(ss) => {
                for template in &mut ss.spec.volume_claim_templates {
                    self.annotate(&mut template.metadata);
                }
            }
            Resource::PersistentVolumeClaim(_)
            | Resource::VolumeSnapshot(_)
            | Resource::GroupVolumeSnapshot(_)
            | Resource::VolumeSnapshotRestore(_)
            | Resource::Migration(_)
            | Resource::ApplicationBackup(_)
            | Resource::ApplicationRestore(_)
            | Resource::ApplicationClone(_) => self.annotate(resource.metadata_mut()),
            Resource::ClusterPair(_)
            | Resource::MigrationSchedule(_)
            | Resource::SchedulePolicy(_)
            | Resource::StorageClass(_)
            | Resource::Deployment(_)
            | Resource::Service(_)
            | Resource::Secret(_)
            | Resource::ConfigMap(_)
            | Resource::Rule(_)
            | Resource::Pod(_)
            | Resource::ScalingRule(_)
            | Resource::BackupLocation(_) => {}
        }
    }

    fn annotate(&self, meta: &mut ObjectMeta) {
        meta.annotations
            .insert(SECRET_NAME_ANNOTATION.to_string(), self.secret_name.clone());
        meta.annotations
            .insert(SECRET_NAMESPACE_ANNOTATION.to_string(), self.secret_namespace.clone());
    }
}

/// Everything a descriptor needs besides itself to be submitted.
#[derive(Debug, Clone)]
pub(crate) struct Submission<'a> {
    pub namespace: &'a str,
    pub provisioner: &'a str,
    pub scale_factor: i32,
    pub security: Option<&'a SecurityAnnotations>,
}

impl Submission<'_> {
    /// A copy of `template` ready to send to the store.
    pub fn prepare(&self, template: &Resource) -> Resource {
        let mut resource = template.clone();
        assign_namespace(&mut resource, self.namespace);
        substitute_namespace(&mut resource, self.namespace);

        match &mut resource {
            Resource::StorageClass(class) => class.provisioner = self.provisioner.to_string(),
            Resource::Deployment(dep) if self.scale_factor > 1 => {
                dep.spec.replicas = Some(dep.desired_replicas() * self.scale_factor);
            }
            Resource::StatefulSet(ss) if self.scale_factor > 1 => {
                ss.spec.replicas = Some(ss.desired_replicas() * self.scale_factor);
            }
            _ => {}
        }

        if let Some(security) = self.security {
            security.apply(&mut resource);
        }
        resource
    }
}

fn assign_namespace(resource: &mut Resource, namespace: &str) {
    let kind = resource.kind();
    let meta = resource.metadata_mut();
    if kind.is_cluster_scoped() {
        meta.namespace = None;
        return;
    }
    let keep = match kind {
        ResourceKind::Rule => meta.namespace.as_deref() == Some(SYSTEM_NAMESPACE),
        ResourceKind::ApplicationClone => meta.namespace.is_some(),
        _ => false,
    };
    if !keep {
        meta.namespace = Some(namespace.to_string());
    }
}

fn substitute(value: &str, namespace: &str) -> String {
    NAMESPACE_REGEX.replace_all(value, namespace).into_owned()
}

fn substitute_meta(meta: &mut ObjectMeta, namespace: &str) {
    meta.name = substitute(&meta.name, namespace);
    for value in meta.annotations.values_mut() {
        *value = substitute(value, namespace);
    }
}

fn substitute_claim_refs(spec: &mut PodSpec, namespace: &str) {
    for volume in &mut spec.volumes {
        if let Some(source) = &mut volume.persistent_volume_claim {
            source.claim_name = substitute(&source.claim_name, namespace);
        }
    }
}

/// Replace namespace placeholders in names, annotations and claim references.
fn substitute_namespace(resource: &mut Resource, namespace: &str) {
    substitute_meta(resource.metadata_mut(), namespace);
    match resource {
        Resource::Deployment(dep) => substitute_claim_refs(&mut dep.spec.template.spec, namespace),
        Resource::StatefulSet(ss) => {
            substitute_claim_refs(&mut ss.spec.template.spec, namespace);
            for template in &mut ss.spec.volume_claim_templates {
                substitute_meta(&mut template.metadata, namespace);
            }
        }
        Resource::Pod(pod) => substitute_claim_refs(&mut pod.spec, namespace),
        Resource::VolumeSnapshot(snap) => {
            snap.spec.persistent_volume_claim_name = substitute(&snap.spec.persistent_volume_claim_name, namespace);
        }
        _ => {}
    }
}

/// Whether every field set in `requested` has the same value in `existing`.
/// Null and empty collections in `requested` match anything, since the
/// store fills in fields a template leaves out.
fn is_subset(requested: &Value, existing: &Value) -> bool {
    let is_blank = |v: &Value| match v {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if is_blank(requested) {
        return true;
    }
    match (requested, existing) {
        (Value::Object(req), Value::Object(ex)) => req.iter().all(|(k, v)| match ex.get(k) {
            Some(e) => is_subset(v, e),
            None => is_blank(v),
        }),
        (Value::Array(req), Value::Array(ex)) => {
            req.len() == ex.len() && req.iter().zip(ex).all(|(r, e)| is_subset(r, e))
        }
        (req, ex) => req == ex,
    }
}

/// Whether an adopted object's declared state differs from what was requested.
pub(crate) fn has_drifted(requested: &Resource, existing: &Resource) -> bool {
    !is_subset(&requested.spec_fingerprint(), &existing.spec_fingerprint())
}

impl Orchestrator {
    /// Create `resource`, or adopt the existing object of the same name.
    /// Unavailability retries under `policy`; any other failure is terminal.
    pub(crate) async fn create_or_adopt(
        &self,
        app_key: &str,
        resource: &Resource,
        policy: RetryPolicy,
    ) -> Result<Resource, RetryError<StoreError>> {
        let key = resource.key();
        let key = &key;
        let store = self.store();
        do_retry(policy, || async move {
            match store.create(resource.clone()).await {
                Ok(created) => {
                    info!(app = %app_key, object = %key, "Created object");
                    RetryOutcome::Done(created)
                }
                Err(e) if e.is_already_exists() => match store.get(key).await {
                    Ok(existing) => {
                        if has_drifted(resource, &existing) {
                            warn!(app = %app_key, object = %key, "Adopted object differs from the requested spec");
                        }
                        info!(app = %app_key, object = %key, "Found existing object");
                        RetryOutcome::Done(existing)
                    }
                    // Deleted between the create and the read: create again.
                    Err(e) if e.is_not_found() || e.is_transient() => RetryOutcome::Retry(e),
                    Err(e) => RetryOutcome::Fail(e),
                },
                Err(e) if e.is_transient() => RetryOutcome::Retry(e),
                Err(e) => RetryOutcome::Fail(e),
            }
        })
        .await
    }

    /// Delete `key`, treating an already-absent object as deleted.
    pub(crate) async fn delete_with_retry(
        &self,
        key: &ResourceKey,
        policy: RetryPolicy,
    ) -> Result<(), RetryError<StoreError>> {
        let store = self.store();
        do_retry(policy, || async move {
            match store.delete(key).await {
                Ok(()) => RetryOutcome::Done(()),
                Err(e) if e.is_not_found() => RetryOutcome::Done(()),
                Err(e) if e.is_transient() => RetryOutcome::Retry(e),
                Err(e) => RetryOutcome::Fail(e),
            }
        })
        .await
    }

    /// Submit one prepared descriptor. Annotated claims are bound to the
    /// autoscaling rule afterwards; a failed bind leaves the claim in place.
    pub(crate) async fn materialize(
        &self,
        app_key: &str,
        resource: Resource,
        autoscale: Option<&AutoscaleParams>,
    ) -> SchedulerResult<Resource> {
        let key = resource.key();
        let live = self
            .create_or_adopt(app_key, &resource, self.timeouts().object_create())
            .await
            .map_err(|e| SchedulerError::ScheduleFailure {
                app: app_key.to_string(),
                object: ObjectRef::from(&key),
                cause: e.to_string(),
            })?;

        if let (Resource::PersistentVolumeClaim(claim), Some(params)) = (&live, autoscale)
            && params.applies_to(&claim.metadata)
        {
            self.bind_autoscale(app_key, params, claim).await?;
        }
        Ok(live)
    }

    /// The security annotations named by the configured config map, if any.
    pub(crate) async fn security_annotations(&self) -> SchedulerResult<Option<SecurityAnnotations>> {
        let Some(name) = self.config.cluster.security_config_map.as_deref() else {
            return Ok(None);
        };
        let config_map = self.security_config_map(name).await?;
        SecurityAnnotations::from_config_map(&config_map).map(Some)
    }

    async fn security_config_map(&self, name: &str) -> SchedulerResult<ConfigMap> {
        let namespace = self.config.cluster.security_namespace.as_str();
        get_typed::<ConfigMap>(self.store(), Some(namespace), name)
            .await
            .map_err(|e| SchedulerError::ConfigLookupFailure {
                name: name.to_string(),
                cause: e.to_string(),
            })
    }

    /// The auth token held by the secret the config map `name` points at.
    pub async fn token_from_config_map(&self, name: &str) -> SchedulerResult<String> {
        let config_map = self.security_config_map(name).await?;
        let security = SecurityAnnotations::from_config_map(&config_map)?;

        let secret = get_typed::<Secret>(self.store(), Some(&security.secret_namespace), &security.secret_name)
            .await
            .map_err(|e| SchedulerError::ConfigLookupFailure {
                name: name.to_string(),
                cause: format!("secret {}/{}: {}", security.secret_namespace, security.secret_name, e),
            })?;

        secret
            .data
            .get(AUTH_TOKEN_KEY)
            .cloned()
            .ok_or_else(|| SchedulerError::ConfigLookupFailure {
                name: name.to_string(),
                cause: format!(
                    "secret {}/{} has no '{}' key",
                    security.secret_namespace, security.secret_name, AUTH_TOKEN_KEY
                ),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterStore, InMemoryCluster};
    use crate::orchestrator::testing::harness;
    use convoy_common::resources::{
        ApplicationClone, ClaimVolumeSource, Deployment, Namespace, PersistentVolumeClaim, PodVolume, Rule,
        StorageClass,
    };
    use serde_json::json;

    fn submission<'a>(security: Option<&'a SecurityAnnotations>) -> Submission<'a> {
        Submission {
            namespace: "db-1",
            provisioner: "kubernetes.io/portworx-volume",
            scale_factor: 1,
            security,
        }
    }

    #[test]
    fn test_prepare_assigns_namespace_by_kind() {
        let sub = submission(None);

        let claim: Resource = PersistentVolumeClaim {
            metadata: ObjectMeta::named("data"),
            ..Default::default()
        }
        .into();
        assert_eq!(sub.prepare(&claim).namespace(), Some("db-1"));

        let class: Resource = StorageClass {
            metadata: ObjectMeta::namespaced("fast", "elsewhere"),
            ..Default::default()
        }
        .into();
        let class = sub.prepare(&class);
        assert_eq!(class.namespace(), None);
        match class {
            Resource::StorageClass(c) => assert_eq!(c.provisioner, "kubernetes.io/portworx-volume"),
            other => panic!("unexpected {}", other.kind()),
        }

        let system_rule: Resource = Rule {
            metadata: ObjectMeta::namespaced("quiesce", SYSTEM_NAMESPACE),
            ..Default::default()
        }
        .into();
        assert_eq!(sub.prepare(&system_rule).namespace(), Some(SYSTEM_NAMESPACE));

        let clone: Resource = ApplicationClone {
            metadata: ObjectMeta::namespaced("copy", "admin"),
            ..Default::default()
        }
        .into();
        assert_eq!(sub.prepare(&clone).namespace(), Some("admin"));
    }

    #[test]
    fn test_prepare_substitutes_placeholders() {
        let mut claim = PersistentVolumeClaim {
            metadata: ObjectMeta::named("data-{{NAMESPACE}}"),
            ..Default::default()
        };
        claim
            .metadata
            .annotations
            .insert("note".into(), "owned by {{ NAMESPACE }}".into());
        let prepared = submission(None).prepare(&claim.into());
        assert_eq!(prepared.name(), "data-db-1");
        assert_eq!(prepared.metadata().annotation("note"), Some("owned by db-1"));

        let mut dep = Deployment {
            metadata: ObjectMeta::named("web"),
            ..Default::default()
        };
        dep.spec.template.spec.volumes.push(PodVolume {
            name: "data".into(),
            persistent_volume_claim: Some(ClaimVolumeSource {
                claim_name: "data-{{NAMESPACE}}".into(),
                read_only: false,
            }),
        });
        match submission(None).prepare(&dep.into()) {
            Resource::Deployment(d) => {
                assert_eq!(d.spec.template.spec.claim_names().collect::<Vec<_>>(), vec!["data-db-1"]);
            }
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn test_prepare_applies_scale_factor() {
        let mut dep = Deployment {
            metadata: ObjectMeta::named("web"),
            ..Default::default()
        };
        dep.spec.replicas = Some(2);
        let sub = Submission {
            scale_factor: 3,
            ..submission(None)
        };
        match sub.prepare(&dep.into()) {
            Resource::Deployment(d) => assert_eq!(d.desired_replicas(), 6),
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn test_security_annotations_only_on_supported_kinds() {
        let security = SecurityAnnotations {
            secret_name: "px-admin".into(),
            secret_namespace: "portworx".into(),
        };
        let sub = submission(Some(&security));

        let claim = sub.prepare(
            &PersistentVolumeClaim {
                metadata: ObjectMeta::named("data"),
                ..Default::default()
            }
            .into(),
        );
        assert_eq!(claim.metadata().annotation(SECRET_NAME_ANNOTATION), Some("px-admin"));
        assert_eq!(claim.metadata().annotation(SECRET_NAMESPACE_ANNOTATION), Some("portworx"));

        let config = sub.prepare(
            &ConfigMap {
                metadata: ObjectMeta::named("settings"),
                ..Default::default()
            }
            .into(),
        );
        assert!(config.metadata().annotations.is_empty());
    }

    #[test]
    fn test_config_map_missing_key_is_lookup_failure() {
        let mut config_map = ConfigMap {
            metadata: ObjectMeta::namespaced("px-auth", "default"),
            ..Default::default()
        };
        config_map.data.insert(SECRET_NAME_KEY.into(), "px-admin".into());
        let err = SecurityAnnotations::from_config_map(&config_map).unwrap_err();
        assert!(matches!(err, SchedulerError::ConfigLookupFailure { ref cause, .. } if cause.contains("secret_namespace")));
    }

    #[test]
    fn test_subset_ignores_server_filled_fields() {
        let requested = json!({"spec": {"size": "2Gi", "volumeName": null, "modes": []}});
        let existing = json!({"spec": {"size": "2Gi", "volumeName": "pvc-1", "modes": ["ReadWriteOnce"]}});
        assert!(is_subset(&requested, &existing));

        let drifted = json!({"spec": {"size": "3Gi"}});
        assert!(!is_subset(&drifted, &existing));
    }

    async fn store_with_namespace() -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        cluster
            .create_namespace(Namespace {
                metadata: ObjectMeta::named("db-1"),
            })
            .await
            .unwrap();
        cluster
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_or_adopt_returns_existing_object() {
        let h = harness(&[]).await;
        h.cluster
            .create_namespace(Namespace {
                metadata: ObjectMeta::named("db-1"),
            })
            .await
            .unwrap();
        let claim: Resource = PersistentVolumeClaim {
            metadata: ObjectMeta::namespaced("data", "db-1"),
            ..Default::default()
        }
        .into();

        let policy = h.orchestrator.timeouts().object_create();
        let first = h.orchestrator.create_or_adopt("db", &claim, policy).await.unwrap();
        let second = h.orchestrator.create_or_adopt("db", &claim, policy).await.unwrap();
        assert_eq!(first.metadata().uid, second.metadata().uid);
        assert!(!has_drifted(&claim, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_or_adopt_retries_unavailable_and_fails_on_rejection() {
        let h = harness(&[]).await;
        h.cluster
            .create_namespace(Namespace {
                metadata: ObjectMeta::named("db-1"),
            })
            .await
            .unwrap();
        let claim: Resource = PersistentVolumeClaim {
            metadata: ObjectMeta::namespaced("data", "db-1"),
            ..Default::default()
        }
        .into();
        let policy = h.orchestrator.timeouts().object_create();

        h.cluster
            .inject_fault(crate::cluster::Verb::Create, None, StoreError::Unavailable("leader lost".into()), 2)
            .await;
        assert!(h.orchestrator.create_or_adopt("db", &claim, policy).await.is_ok());

        let other: Resource = ConfigMap {
            metadata: ObjectMeta::namespaced("settings", "db-1"),
            ..Default::default()
        }
        .into();
        h.cluster
            .inject_fault(crate::cluster::Verb::Create, None, StoreError::Rejected("quota".into()), 1)
            .await;
        let err = h.orchestrator.create_or_adopt("db", &other, policy).await.unwrap_err();
        assert!(!err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_from_config_map() {
        let cluster = store_with_namespace().await;
        cluster
            .create_namespace(Namespace {
                metadata: ObjectMeta::named("default"),
            })
            .await
            .unwrap();
        let mut config_map = ConfigMap {
            metadata: ObjectMeta::namespaced("px-auth", "default"),
            ..Default::default()
        };
        config_map.data.insert(SECRET_NAME_KEY.into(), "px-admin".into());
        config_map.data.insert(SECRET_NAMESPACE_KEY.into(), "db-1".into());
        cluster.create(config_map.into()).await.unwrap();

        let mut secret = Secret {
            metadata: ObjectMeta::namespaced("px-admin", "db-1"),
            ..Default::default()
        };
        secret.data.insert(AUTH_TOKEN_KEY.into(), "s3cr3t".into());
        cluster.create(secret.into()).await.unwrap();

        let h = harness(&[]).await;
        let orchestrator = Orchestrator::new(
            std::sync::Arc::new(cluster),
            h.storage.clone(),
            std::sync::Arc::new(h.node_driver.clone()),
            Default::default(),
        );
        assert_eq!(orchestrator.token_from_config_map("px-auth").await.unwrap(), "s3cr3t");

        let err = orchestrator.token_from_config_map("absent").await.unwrap_err();
        assert!(matches!(err, SchedulerError::ConfigLookupFailure { .. }));
    }
}
