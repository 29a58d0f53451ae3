use super::autoscale::AutoscaleParams;
use crate::errors::SchedulerError;
use crate::template::AppTemplate;
use convoy_common::{Resource, ResourceKind};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Where an application context is in its lifecycle.
///
/// ```text
/// Created → Materializing → Validating → Running
///                               ▲           │
///                               └─ Resizing / Scaling
/// Running → Destroying → LeakChecking → Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Created,
    Materializing,
    Validating,
    Running,
    Resizing,
    Scaling,
    Destroying,
    LeakChecking,
    Terminated,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Created => "created",
            Stage::Materializing => "materializing",
            Stage::Validating => "validating",
            Stage::Running => "running",
            Stage::Resizing => "resizing",
            Stage::Scaling => "scaling",
            Stage::Destroying => "destroying",
            Stage::LeakChecking => "leak-checking",
            Stage::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Options an application is scheduled with.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleOptions {
    /// Templates to schedule; empty means every enabled template.
    pub app_keys: Vec<String>,
    /// Provisioner written into storage classes instead of the storage
    /// driver's own.
    pub storage_provisioner: Option<String>,
    /// Multiplier applied to declared workload replica counts.
    pub scale_factor: i32,
    pub autoscale: Option<AutoscaleParams>,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            app_keys: Vec::new(),
            storage_provisioner: None,
            scale_factor: 1,
            autoscale: None,
        }
    }
}

impl ScheduleOptions {
    pub fn for_apps<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            app_keys: keys.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_autoscale(mut self, params: AutoscaleParams) -> Self {
        self.autoscale = Some(params);
        self
    }
}

/// One scheduled instance of an application template.
///
/// The context exclusively owns its descriptor list. The descriptors are a
/// snapshot of what the store returned when they were created or last
/// updated; the store stays the system of record.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub id: String,
    pub app_key: String,
    pub enabled: bool,
    pub namespace: String,
    pub resources: Vec<Resource>,
    pub options: ScheduleOptions,
    stage: Stage,
    last_error: Option<SchedulerError>,
}

impl AppContext {
    pub fn new(instance_id: &str, template: &AppTemplate, options: ScheduleOptions) -> Self {
        Self {
            id: instance_id.to_string(),
            app_key: template.key.clone(),
            enabled: template.enabled,
            namespace: template.namespace_for(instance_id),
            resources: Vec::new(),
            options,
            stage: Stage::Created,
            last_error: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The failure that halted the most recent operation, if it failed.
    pub fn last_error(&self) -> Option<&SchedulerError> {
        self.last_error.as_ref()
    }

    pub fn resources_of(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind() == kind)
    }

    /// Rebind this context to a new instance id. Namespaced descriptors move
    /// to the matching namespace; nothing is sent to the cluster.
    pub fn update_id(&mut self, id: &str) {
        let namespace = format!("{}-{}", self.app_key, id);
        for resource in &mut self.resources {
            let meta = resource.metadata_mut();
            if meta.namespace.as_deref() == Some(self.namespace.as_str()) {
                meta.namespace = Some(namespace.clone());
            }
        }
        self.id = id.to_string();
        self.namespace = namespace;
    }

    /// Replace the cached copy of a descriptor with a fresher one.
    pub(crate) fn refresh(&mut self, live: Resource) {
        let key = live.key();
        if let Some(slot) = self.resources.iter_mut().find(|r| r.key() == key) {
            *slot = live;
        }
    }

    /// Enter `stage`, returning the stage to fall back to on failure.
    pub(crate) fn begin(&mut self, stage: Stage) -> Stage {
        debug!(app = %self.app_key, id = %self.id, from = %self.stage, to = %stage, "Stage change");
        self.last_error = None;
        std::mem::replace(&mut self.stage, stage)
    }

    pub(crate) fn finish(&mut self, stage: Stage) {
        debug!(app = %self.app_key, id = %self.id, stage = %stage, "Stage reached");
        self.stage = stage;
    }

    /// Record `err` and fall back to `previous`.
    pub(crate) fn abort(&mut self, previous: Stage, err: SchedulerError) -> SchedulerError {
        warn!(app = %self.app_key, id = %self.id, stage = %self.stage, error = %err, "Operation failed");
        self.stage = previous;
        self.last_error = Some(err.clone());
        err
    }
}
