//! Phase sequencing: templates in, application contexts out.
//!
//! The namespace is ensured first, then each descriptor phase runs in
//! order. Descriptors within one phase are created concurrently; the next
//! phase starts only once every descriptor of the current one is live.

use super::Orchestrator;
use super::autoscale::{CREATOR_LABEL, CREATOR_NAME};
use super::context::{AppContext, ScheduleOptions, Stage};
use super::materialize::Submission;
use crate::errors::{ObjectRef, SchedulerError, SchedulerResult};
use crate::retry::{RetryOutcome, do_retry};
use crate::template::AppTemplate;
use convoy_common::ObjectMeta;
use convoy_common::resources::Namespace;
use futures::future::try_join_all;
use tracing::info;

impl Orchestrator {
    /// Schedule one instance of every selected template. An empty key list
    /// selects every enabled template. The first failure aborts the call;
    /// objects already created stay in the cluster.
    pub async fn schedule(&self, instance_id: &str, options: &ScheduleOptions) -> SchedulerResult<Vec<AppContext>> {
        let templates: Vec<&AppTemplate> = if options.app_keys.is_empty() {
            self.templates.enabled().collect()
        } else {
            options
                .app_keys
                .iter()
                .map(|key| self.template(key))
                .collect::<SchedulerResult<_>>()?
        };

        let mut contexts = Vec::with_capacity(templates.len());
        for template in templates {
            let mut ctx = AppContext::new(instance_id, template, options.clone());
            self.schedule_app(&mut ctx).await?;
            contexts.push(ctx);
        }
        Ok(contexts)
    }

    /// Materialize the context's own template into its namespace.
    pub async fn schedule_app(&self, ctx: &mut AppContext) -> SchedulerResult<()> {
        let previous = ctx.begin(Stage::Materializing);
        let app_key = ctx.app_key.clone();
        match self.materialize_into(ctx, &app_key).await {
            Ok(()) => {
                info!(app = %ctx.app_key, namespace = %ctx.namespace, objects = ctx.resources.len(), "Scheduled app");
                Ok(())
            }
            Err(e) => Err(ctx.abort(previous, e)),
        }
    }

    /// Materialize further templates into an existing context, appending to
    /// its descriptor list and reusing its namespace.
    pub async fn add_tasks(&self, ctx: &mut AppContext, options: &ScheduleOptions) -> SchedulerResult<()> {
        if options.app_keys.is_empty() {
            return Err(SchedulerError::ScheduleFailure {
                app: ctx.app_key.clone(),
                object: ObjectRef::namespace(&ctx.namespace),
                cause: "no app keys given to add".to_string(),
            });
        }

        let previous = ctx.begin(Stage::Materializing);
        for key in &options.app_keys {
            if let Err(e) = self.materialize_into(ctx, key).await {
                return Err(ctx.abort(previous, e));
            }
            info!(app = %ctx.app_key, added = %key, namespace = %ctx.namespace, "Added tasks");
        }
        Ok(())
    }

    /// Rebind `ctx` to instance `id`. Only the local descriptors move; the
    /// next schedule or add creates them under the new namespace.
    pub fn update_tasks_id(&self, ctx: &mut AppContext, id: &str) {
        let from = ctx.namespace.clone();
        ctx.update_id(id);
        info!(app = %ctx.app_key, from = %from, to = %ctx.namespace, "Rebound app instance");
    }

    fn template(&self, key: &str) -> SchedulerResult<&AppTemplate> {
        self.templates
            .get(key)
            .ok_or_else(|| SchedulerError::UnknownApp { app: key.to_string() })
    }

    /// Run every phase of template `key` against the context's namespace.
    async fn materialize_into(&self, ctx: &mut AppContext, key: &str) -> SchedulerResult<()> {
        let template = self.template(key)?;
        self.ensure_namespace(&ctx.app_key, &ctx.namespace).await?;

        let security = self.security_annotations().await?;
        let provisioner = ctx
            .options
            .storage_provisioner
            .clone()
            .unwrap_or_else(|| self.storage.provisioner().to_string());
        let submission = Submission {
            namespace: &ctx.namespace,
            provisioner: &provisioner,
            scale_factor: ctx.options.scale_factor,
            security: security.as_ref(),
        };
        let autoscale = ctx.options.autoscale.as_ref();

        let mut realized = Vec::new();
        for (phase, descriptors) in template.by_phase() {
            let live = try_join_all(
                descriptors
                    .into_iter()
                    .map(|d| self.materialize(&ctx.app_key, submission.prepare(d), autoscale)),
            )
            .await?;
            info!(app = %ctx.app_key, phase = %phase, objects = live.len(), "Phase complete");
            realized.extend(live);
        }

        for live in realized {
            if ctx.resources.iter().any(|r| r.key() == live.key()) {
                ctx.refresh(live);
            } else {
                ctx.resources.push(live);
            }
        }
        Ok(())
    }

    /// Create the app namespace, or adopt it if it already exists.
    async fn ensure_namespace(&self, app_key: &str, name: &str) -> SchedulerResult<Namespace> {
        let mut metadata = ObjectMeta::named(name);
        metadata.labels.insert(CREATOR_LABEL.to_string(), CREATOR_NAME.to_string());
        metadata.labels.insert("app".to_string(), app_key.to_string());
        let namespace = Namespace { metadata };

        let store = self.store();
        let namespace = &namespace;
        do_retry(self.timeouts().object_create(), || async move {
            match store.create_namespace(namespace.clone()).await {
                Ok(created) => {
                    info!(app = %app_key, namespace = %name, "Created namespace");
                    RetryOutcome::Done(created)
                }
                Err(e) if e.is_already_exists() => match store.get_namespace(name).await {
                    Ok(existing) => {
                        info!(app = %app_key, namespace = %name, "Found existing namespace");
                        RetryOutcome::Done(existing)
                    }
                    Err(e) if e.is_not_found() || e.is_transient() => RetryOutcome::Retry(e),
                    Err(e) => RetryOutcome::Fail(e),
                },
                Err(e) if e.is_transient() => RetryOutcome::Retry(e),
                Err(e) => RetryOutcome::Fail(e),
            }
        })
        .await
        .map_err(|e| SchedulerError::ScheduleFailure {
            app: app_key.to_string(),
            object: ObjectRef::namespace(name),
            cause: e.to_string(),
        })
    }
}
