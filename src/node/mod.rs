//! Cluster nodes: an explicit registry and the driver used to act on them.
//!
//! The registry is a plain value the caller owns and refreshes; nothing in the
//! crate keeps a process-wide node cache.

mod memory;

pub use memory::InMemoryNodeDriver;

use crate::cluster::ClusterStore;
use crate::errors::{SchedulerError, SchedulerResult, StoreError};
use crate::retry::{RetryOutcome, RetryPolicy, do_retry};
use async_trait::async_trait;
use convoy_common::resources::ClusterNode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Master,
    Worker,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Master => write!(f, "master"),
            NodeType::Worker => write!(f, "worker"),
        }
    }
}

/// A node as the orchestrator sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub name: String,
    pub node_type: NodeType,
    pub zone: Option<String>,
    pub region: Option<String>,
    pub addresses: Vec<String>,
    pub schedulable: bool,
}

impl Node {
    pub fn is_worker(&self) -> bool {
        self.node_type == NodeType::Worker
    }
}

impl From<&ClusterNode> for Node {
    fn from(node: &ClusterNode) -> Self {
        Self {
            name: node.metadata.name.clone(),
            node_type: if node.is_master() {
                NodeType::Master
            } else {
                NodeType::Worker
            },
            zone: node.zone().map(str::to_string),
            region: node.region().map(str::to_string),
            addresses: node.internal_addresses(),
            schedulable: !node.unschedulable,
        }
    }
}

/// Known nodes, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<String, Node>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.name.clone(), n)).collect(),
        }
    }

    /// Rebuild from the cluster's node list. Each node must report ready
    /// within `policy`; the registry is left untouched on failure.
    pub async fn refresh(&mut self, store: &dyn ClusterStore, policy: RetryPolicy) -> SchedulerResult<()> {
        let listed = store.list_nodes().await.map_err(|e| SchedulerError::NodeNotReady {
            node: "*".to_string(),
            cause: format!("failed to list nodes: {}", e),
        })?;

        let mut nodes = BTreeMap::new();
        for cluster_node in &listed {
            wait_for_node_ready(store, &cluster_node.metadata.name, policy).await?;
            let node = Node::from(cluster_node);
            info!(node = %node.name, node_type = %node.node_type, "Registered node");
            nodes.insert(node.name.clone(), node);
        }

        self.nodes = nodes;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn workers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.is_worker())
    }

    pub fn masters(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| !n.is_worker())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Record a scheduling toggle made through the store.
    pub(crate) fn set_schedulable(&mut self, name: &str, schedulable: bool) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.schedulable = schedulable;
        }
    }
}

/// Poll until the named node reports ready.
pub async fn wait_for_node_ready(store: &dyn ClusterStore, name: &str, policy: RetryPolicy) -> SchedulerResult<()> {
    do_retry(policy, || async move {
        match store.get_node(name).await {
            Ok(node) if node.ready => RetryOutcome::Done(()),
            Ok(_) => RetryOutcome::Retry("node has not reported ready".to_string()),
            Err(e) if e.is_not_found() => RetryOutcome::Fail(e.to_string()),
            Err(e) => RetryOutcome::Retry(e.to_string()),
        }
    })
    .await
    .map_err(|e| SchedulerError::NodeNotReady {
        node: name.to_string(),
        cause: e.to_string(),
    })
}

/// `<pods_root>/<pod uid>/volumes`
pub fn pod_volume_dir(pods_root: &str, pod_uid: &str) -> String {
    format!("{}/{}/volumes", pods_root.trim_end_matches('/'), pod_uid)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceAction::Start => write!(f, "start"),
            ServiceAction::Stop => write!(f, "stop"),
            ServiceAction::Restart => write!(f, "restart"),
        }
    }
}

/// Abstraction over remote node access for testability.
#[async_trait]
pub trait NodeDriver: Send + Sync {
    /// Whether `path` exists on the node. The probe itself is bounded by `timeout`.
    async fn file_exists(&self, node: &Node, path: &str, timeout: Duration) -> Result<bool, StoreError>;

    /// Run a systemd-style action on a node service.
    async fn systemctl(
        &self,
        node: &Node,
        service: &str,
        action: ServiceAction,
        timeout: Duration,
    ) -> Result<(), StoreError>;
}
