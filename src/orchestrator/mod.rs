//! The application lifecycle orchestrator.
//!
//! An [`Orchestrator`] turns application templates into live cluster objects
//! and drives them through their lifecycle:
//!
//! ```text
//! schedule ──▶ wait_for_running ──▶ resize_volume / scale_application
//!                     ▲                          │
//!                     └──────────────────────────┘
//!          ──▶ destroy ──▶ (wait_for_destroy, leak check)
//! ```
//!
//! Every operation works on an [`AppContext`], which owns the realized
//! descriptor list. The orchestrator itself holds no per-app state; it only
//! carries its collaborators and configuration.

mod autoscale;
mod context;
mod describe;
mod destroy;
mod materialize;
mod nodes;
mod schedule;
mod validate;
mod volumes;
mod workloads;

pub use autoscale::{AUTOSCALE_ANNOTATION, AutoscaleParams, CREATOR_LABEL, CREATOR_NAME};
pub use context::{AppContext, ScheduleOptions, Stage};
pub use destroy::DestroyOptions;
pub use materialize::{
    NAMESPACE_PLACEHOLDER, SECRET_NAME_ANNOTATION, SECRET_NAMESPACE_ANNOTATION, SecurityAnnotations,
};
pub use volumes::{RESIZE_STEP, RESIZE_SUPPORTED_ANNOTATION, SNAPSHOT_PARENT_PARAM, Snapshot, Volume};
pub use workloads::{DEPLOYMENT_SUFFIX, STATEFUL_SET_SUFFIX};

use crate::cluster::ClusterStore;
use crate::config::{ConvoyConfig, TimeoutsConfig};
use crate::errors::SchedulerResult;
use crate::node::{NodeDriver, NodeRegistry};
use crate::storage::StorageDriver;
use crate::template::TemplateRegistry;
use std::sync::Arc;

pub struct Orchestrator {
    store: Arc<dyn ClusterStore>,
    storage: Arc<dyn StorageDriver>,
    node_driver: Arc<dyn NodeDriver>,
    nodes: NodeRegistry,
    templates: TemplateRegistry,
    config: ConvoyConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        storage: Arc<dyn StorageDriver>,
        node_driver: Arc<dyn NodeDriver>,
        config: ConvoyConfig,
    ) -> Self {
        Self {
            store,
            storage,
            node_driver,
            nodes: NodeRegistry::new(),
            templates: TemplateRegistry::new(),
            config,
        }
    }

    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_nodes(mut self, nodes: NodeRegistry) -> Self {
        self.nodes = nodes;
        self
    }

    /// Rebuild the node registry from the cluster, waiting for every node
    /// to report ready.
    pub async fn refresh_nodes(&mut self) -> SchedulerResult<()> {
        let policy = self.config.timeouts.node_ready();
        self.nodes.refresh(self.store.as_ref(), policy).await
    }

    pub fn store(&self) -> &dyn ClusterStore {
        self.store.as_ref()
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn templates_mut(&mut self) -> &mut TemplateRegistry {
        &mut self.templates
    }

    pub fn config(&self) -> &ConvoyConfig {
        &self.config
    }

    fn timeouts(&self) -> &TimeoutsConfig {
        &self.config.timeouts
    }
}
