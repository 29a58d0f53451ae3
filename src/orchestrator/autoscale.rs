//! Autoscaling rule binding for storage claims.
//!
//! A claim opts in with the `convoy.io/autoscale-enabled` annotation. When the
//! schedule options carry enabled [`AutoscaleParams`], the claim's label set
//! becomes the selector of a cluster-scoped [`ScalingRule`] named after the
//! params. Claims sharing a rule name share one rule object: the second bind
//! adopts what the first created.

use super::Orchestrator;
use crate::errors::{ObjectRef, SchedulerError, SchedulerResult};
use convoy_common::resources::{ConditionExpression, PersistentVolumeClaim, ScalingAction, ScalingRule, ScalingRuleSpec};
use convoy_common::{LabelSelector, ObjectMeta, Quantity, Resource, ResourceKey, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

pub const AUTOSCALE_ANNOTATION: &str = "convoy.io/autoscale-enabled";

/// Label stamped on every namespace and rule convoy creates.
pub const CREATOR_LABEL: &str = "creator";
pub const CREATOR_NAME: &str = "convoy";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscaleParams {
    #[serde(default)]
    pub enabled: bool,
    pub name: String,
    /// Seconds between condition evaluations.
    #[serde(default)]
    pub poll_interval: i64,
    #[serde(default)]
    pub actions_cool_down_period: i64,
    #[serde(default)]
    pub conditions: Vec<ConditionExpression>,
    #[serde(default)]
    pub actions: Vec<ScalingAction>,
    /// Capacity an annotated claim must reach once the rule has acted.
    #[serde(default)]
    pub expected_size: Option<Quantity>,
}

impl AutoscaleParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            enabled: true,
            name: name.into(),
            poll_interval: 0,
            actions_cool_down_period: 0,
            conditions: Vec::new(),
            actions: Vec::new(),
            expected_size: None,
        }
    }

    /// Whether a claim with `meta` gets bound to this rule.
    pub fn applies_to(&self, meta: &ObjectMeta) -> bool {
        self.enabled && meta.annotation_flag(AUTOSCALE_ANNOTATION) == Some(true)
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(ResourceKind::ScalingRule, None, &self.name)
    }

    /// The rule selecting claims labelled `match_labels`.
    pub fn rule_for(&self, match_labels: BTreeMap<String, String>) -> ScalingRule {
        let creator: BTreeMap<String, String> =
            [(CREATOR_LABEL.to_string(), CREATOR_NAME.to_string())].into_iter().collect();

        let mut metadata = ObjectMeta::named(&self.name);
        metadata.labels = creator.clone();

        ScalingRule {
            metadata,
            spec: ScalingRuleSpec {
                selector: LabelSelector::new(match_labels),
                namespace_selector: LabelSelector::new(creator),
                conditions: self.conditions.clone(),
                actions: self.actions.clone(),
                poll_interval: self.poll_interval,
                actions_cool_down_period: self.actions_cool_down_period,
            },
        }
    }
}

impl Orchestrator {
    /// Create (or adopt) the scaling rule for `claim`.
    pub async fn bind_autoscale(
        &self,
        app_key: &str,
        params: &AutoscaleParams,
        claim: &PersistentVolumeClaim,
    ) -> SchedulerResult<ScalingRule> {
        let rule: Resource = params.rule_for(claim.metadata.labels.clone()).into();
        let key = rule.key();

        let bound = self
            .create_or_adopt(app_key, &rule, self.timeouts().object_create())
            .await
            .map_err(|e| SchedulerError::ScheduleFailure {
                app: app_key.to_string(),
                object: ObjectRef::from(&key),
                cause: format!("failed to bind scaling rule for claim {}: {}", claim.metadata.name, e),
            })?;

        info!(app = %app_key, rule = %params.name, claim = %claim.metadata.name, "Bound scaling rule");
        ScalingRule::try_from(bound).map_err(|other| SchedulerError::ScheduleFailure {
            app: app_key.to_string(),
            object: ObjectRef::from(&key),
            cause: format!("store returned {} for a scaling rule", other.key()),
        })
    }

    /// Delete the scaling rule; an absent rule counts as deleted.
    pub(crate) async fn unbind_autoscale(&self, app_key: &str, params: &AutoscaleParams) -> SchedulerResult<()> {
        let key = params.key();
        self.delete_with_retry(&key, self.timeouts().destroy())
            .await
            .map_err(|e| SchedulerError::DestroyFailure {
                app: app_key.to_string(),
                object: ObjectRef::from(&key),
                cause: e.to_string(),
            })?;
        info!(app = %app_key, rule = %params.name, "Deleted scaling rule");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Verb;
    use crate::orchestrator::testing::harness;
    use convoy_common::resources::ConditionOperator;

    fn params() -> AutoscaleParams {
        let mut params = AutoscaleParams::new("volume-resize");
        params.conditions.push(ConditionExpression {
            key: "px.io/volume_usage_percent".into(),
            operator: ConditionOperator::Gt,
            values: vec!["50".into()],
        });
        params.actions.push(ScalingAction {
            name: "openstorage.io.action.volume/resize".into(),
            params: [("scalepercentage".to_string(), "100".to_string())].into_iter().collect(),
        });
        params
    }

    fn annotated_claim(name: &str, flag: &str) -> PersistentVolumeClaim {
        let mut claim = PersistentVolumeClaim {
            metadata: ObjectMeta::namespaced(name, "db-1"),
            ..Default::default()
        };
        claim.metadata.annotations.insert(AUTOSCALE_ANNOTATION.into(), flag.into());
        claim.metadata.labels.insert("app".into(), "db".into());
        claim
    }

    #[test]
    fn test_applies_only_when_enabled_and_annotated() {
        let mut params = params();
        assert!(params.applies_to(&annotated_claim("a", "true").metadata));
        assert!(!params.applies_to(&annotated_claim("a", "false").metadata));
        assert!(!params.applies_to(&annotated_claim("a", "maybe").metadata));
        assert!(!params.applies_to(&ObjectMeta::named("plain")));

        params.enabled = false;
        assert!(!params.applies_to(&annotated_claim("a", "true").metadata));
    }

    #[test]
    fn test_rule_selects_claim_labels_and_creator_namespaces() {
        let claim = annotated_claim("a", "true");
        let rule = params().rule_for(claim.metadata.labels.clone());
        assert_eq!(rule.metadata.name, "volume-resize");
        assert_eq!(rule.metadata.namespace, None);
        assert_eq!(rule.spec.selector.match_labels.get("app").map(String::as_str), Some("db"));
        assert_eq!(
            rule.spec.namespace_selector.match_labels.get(CREATOR_LABEL).map(String::as_str),
            Some(CREATOR_NAME)
        );
        assert_eq!(rule.spec.conditions.len(), 1);
        assert_eq!(rule.spec.actions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebinding_adopts_existing_rule() {
        let h = harness(&[]).await;
        let params = params();

        let first = h
            .orchestrator
            .bind_autoscale("db", &params, &annotated_claim("a", "true"))
            .await
            .unwrap();
        let second = h
            .orchestrator
            .bind_autoscale("db", &params, &annotated_claim("b", "true"))
            .await
            .unwrap();

        assert_eq!(first.metadata.uid, second.metadata.uid);
        assert_eq!(h.cluster.object_count(ResourceKind::ScalingRule).await, 1);
        assert_eq!(h.cluster.count(Verb::Create, "ScalingRule volume-resize").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbind_tolerates_missing_rule() {
        let h = harness(&[]).await;
        h.orchestrator.unbind_autoscale("db", &params()).await.unwrap();
    }
}
