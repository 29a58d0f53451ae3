//! Typed error hierarchy for the convoy orchestrator.
//!
//! Two enums cover the two sides of every call:
//! - `StoreError`: what a cluster collaborator reports back
//! - `SchedulerError`: the kind-tagged failures the orchestrator surfaces,
//!   each naming the owning app (or node) and the offending object

use convoy_common::{ResourceKey, ResourceKind};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by the cluster resource store and node collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Transient: the control plane could not serve the request right now.
    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    /// Terminal: the control plane refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Whether a retry loop should try again after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Names the object an error is about: `PersistentVolumeClaim mysql-1/data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    pub fn namespace(name: impl Into<String>) -> Self {
        Self::new("Namespace", None, name)
    }

    /// Whether this reference names an object of `kind`.
    pub fn is(&self, kind: ResourceKind) -> bool {
        self.kind == kind.as_str()
    }
}

impl From<ResourceKey> for ObjectRef {
    fn from(key: ResourceKey) -> Self {
        Self {
            kind: key.kind.to_string(),
            namespace: key.namespace,
            name: key.name,
        }
    }
}

impl From<&ResourceKey> for ObjectRef {
    fn from(key: &ResourceKey) -> Self {
        key.clone().into()
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Failures surfaced by the orchestrator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Failed to schedule app {app}: {object}: {cause}")]
    ScheduleFailure {
        app: String,
        object: ObjectRef,
        cause: String,
    },

    #[error("Failed to validate app {app}: {object}: {cause}")]
    ValidateFailure {
        app: String,
        object: ObjectRef,
        cause: String,
    },

    #[error("Failed to destroy app {app}: {object}: {cause}")]
    DestroyFailure {
        app: String,
        object: ObjectRef,
        cause: String,
    },

    #[error("Failed to resize volumes of app {app}: {object}: {cause}")]
    ResizeFailure {
        app: String,
        object: ObjectRef,
        cause: String,
    },

    #[error("Failed to update app {app}: {object}: {cause}")]
    UpdateFailure {
        app: String,
        object: ObjectRef,
        cause: String,
    },

    #[error("Failed to look up storage of app {app}: {object}: {cause}")]
    StorageLookupFailure {
        app: String,
        object: ObjectRef,
        cause: String,
    },

    #[error("No application template named {app}")]
    UnknownApp { app: String },

    #[error("Failed to find nodes for app {app}: {cause}")]
    NodeLookupFailure { app: String, cause: String },

    #[error("Failed to decommission node {node}: {cause}")]
    DecommissionFailure { node: String, cause: String },

    #[error("Failed to look up config map {name}: {cause}")]
    ConfigLookupFailure { name: String, cause: String },

    #[error("App {app} declares unsupported resource kind '{kind}'{}", source_hint(.source_file))]
    UnsupportedResourceKind {
        app: String,
        kind: String,
        source_file: Option<String>,
    },

    #[error("Volume directory {path} of pod {pod} still present on node {node}")]
    VolumeDirLeak {
        pod: String,
        node: String,
        path: String,
    },

    #[error("Node {node} is not ready: {cause}")]
    NodeNotReady { node: String, cause: String },

    #[error("Failed to {action} service {service} on node {node}: {cause}")]
    NodeServiceFailure {
        node: String,
        service: String,
        action: String,
        cause: String,
    },

    #[error("Timed out after {timeout:?} waiting for {operation}: {cause}")]
    Timeout {
        operation: String,
        timeout: Duration,
        cause: String,
    },
}

fn source_hint(source_file: &Option<String>) -> String {
    source_file
        .as_ref()
        .map(|f| format!(" in {}", f))
        .unwrap_or_default()
}

impl SchedulerError {
    /// The app this error belongs to, if it is app-scoped.
    pub fn app(&self) -> Option<&str> {
        match self {
            SchedulerError::ScheduleFailure { app, .. }
            | SchedulerError::ValidateFailure { app, .. }
            | SchedulerError::DestroyFailure { app, .. }
            | SchedulerError::ResizeFailure { app, .. }
            | SchedulerError::UpdateFailure { app, .. }
            | SchedulerError::StorageLookupFailure { app, .. }
            | SchedulerError::UnknownApp { app }
            | SchedulerError::NodeLookupFailure { app, .. }
            | SchedulerError::UnsupportedResourceKind { app, .. } => Some(app),
            SchedulerError::DecommissionFailure { .. }
            | SchedulerError::ConfigLookupFailure { .. }
            | SchedulerError::VolumeDirLeak { .. }
            | SchedulerError::NodeNotReady { .. }
            | SchedulerError::NodeServiceFailure { .. }
            | SchedulerError::Timeout { .. } => None,
        }
    }

    /// The object this error names, for resource-scoped variants.
    pub fn object(&self) -> Option<&ObjectRef> {
        match self {
            SchedulerError::ScheduleFailure { object, .. }
            | SchedulerError::ValidateFailure { object, .. }
            | SchedulerError::DestroyFailure { object, .. }
            | SchedulerError::ResizeFailure { object, .. }
            | SchedulerError::UpdateFailure { object, .. }
            | SchedulerError::StorageLookupFailure { object, .. } => Some(object),
            _ => None,
        }
    }
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        assert!(StoreError::AlreadyExists("x".into()).is_already_exists());
        assert!(StoreError::NotFound("x".into()).is_not_found());
        assert!(StoreError::Unavailable("etcd leader lost".into()).is_transient());
        assert!(!StoreError::Rejected("bad spec".into()).is_transient());
    }

    #[test]
    fn test_schedule_failure_display_names_object() {
        let err = SchedulerError::ScheduleFailure {
            app: "mysql".into(),
            object: ResourceKey::new(ResourceKind::PersistentVolumeClaim, Some("mysql-1"), "data").into(),
            cause: "request rejected: quota".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to schedule app mysql: PersistentVolumeClaim mysql-1/data: request rejected: quota"
        );
        assert_eq!(err.app(), Some("mysql"));
        assert!(err.object().is_some_and(|o| o.is(ResourceKind::PersistentVolumeClaim)));
    }

    #[test]
    fn test_unsupported_kind_display() {
        let err = SchedulerError::UnsupportedResourceKind {
            app: "cron".into(),
            kind: "CronJob".into(),
            source_file: Some("specs/cron/job.yaml".into()),
        };
        assert_eq!(
            err.to_string(),
            "App cron declares unsupported resource kind 'CronJob' in specs/cron/job.yaml"
        );

        let err = SchedulerError::UnsupportedResourceKind {
            app: "cron".into(),
            kind: "CronJob".into(),
            source_file: None,
        };
        assert!(err.to_string().ends_with("'CronJob'"));
    }

    #[test]
    fn test_leak_error_is_not_app_scoped() {
        let err = SchedulerError::VolumeDirLeak {
            pod: "mysql-0".into(),
            node: "worker-2".into(),
            path: "/var/lib/kubelet/pods/uid-1/volumes".into(),
        };
        assert_eq!(err.app(), None);
        assert!(err.to_string().contains("worker-2"));
    }
}
