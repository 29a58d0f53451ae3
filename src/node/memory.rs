use super::{Node, NodeDriver, ServiceAction};
use crate::errors::StoreError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct NodeState {
    files: BTreeMap<String, BTreeSet<String>>,
    /// Nodes that never delete files, simulating leaked volume directories.
    retaining: BTreeSet<String>,
    unreachable: BTreeSet<String>,
    stopped_services: BTreeSet<(String, String)>,
    service_log: Vec<(String, String, ServiceAction)>,
}

/// Node driver backed by in-process state. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNodeDriver {
    state: Arc<Mutex<NodeState>>,
}

impl InMemoryNodeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_file(&self, node: &str, path: &str) {
        let mut state = self.state.lock().await;
        state
            .files
            .entry(node.to_string())
            .or_default()
            .insert(path.to_string());
    }

    /// Remove a file unless the node retains files.
    pub async fn remove_file(&self, node: &str, path: &str) {
        let mut state = self.state.lock().await;
        if state.retaining.contains(node) {
            return;
        }
        if let Some(files) = state.files.get_mut(node) {
            files.remove(path);
        }
    }

    /// From now on, `node` keeps every file it has.
    pub async fn retain_files_on(&self, node: &str) {
        self.state.lock().await.retaining.insert(node.to_string());
    }

    pub async fn mark_unreachable(&self, node: &str) {
        self.state.lock().await.unreachable.insert(node.to_string());
    }

    pub async fn files_on(&self, node: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .files
            .get(node)
            .map(|f| f.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn service_running(&self, node: &str, service: &str) -> bool {
        let state = self.state.lock().await;
        !state
            .stopped_services
            .contains(&(node.to_string(), service.to_string()))
    }

    /// Every service action issued, in order.
    pub async fn service_log(&self) -> Vec<(String, String, ServiceAction)> {
        self.state.lock().await.service_log.clone()
    }
}

#[async_trait]
impl NodeDriver for InMemoryNodeDriver {
    async fn file_exists(&self, node: &Node, path: &str, _timeout: Duration) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        if state.unreachable.contains(&node.name) {
            return Err(StoreError::Unavailable(format!("node {} is unreachable", node.name)));
        }
        Ok(state
            .files
            .get(&node.name)
            .is_some_and(|files| files.contains(path)))
    }

    async fn systemctl(
        &self,
        node: &Node,
        service: &str,
        action: ServiceAction,
        _timeout: Duration,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.unreachable.contains(&node.name) {
            return Err(StoreError::Unavailable(format!("node {} is unreachable", node.name)));
        }
        let key = (node.name.clone(), service.to_string());
        match action {
            ServiceAction::Stop => {
                state.stopped_services.insert(key);
            }
            ServiceAction::Start | ServiceAction::Restart => {
                state.stopped_services.remove(&key);
            }
        }
        state
            .service_log
            .push((node.name.clone(), service.to_string(), action));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeType;

    fn worker(name: &str) -> Node {
        Node {
            name: name.into(),
            node_type: NodeType::Worker,
            zone: None,
            region: None,
            addresses: vec![],
            schedulable: true,
        }
    }

    #[tokio::test]
    async fn test_retaining_node_keeps_files() {
        let driver = InMemoryNodeDriver::new();
        driver.add_file("w1", "/pods/a/volumes").await;
        driver.add_file("w2", "/pods/b/volumes").await;
        driver.retain_files_on("w2").await;

        driver.remove_file("w1", "/pods/a/volumes").await;
        driver.remove_file("w2", "/pods/b/volumes").await;

        let timeout = Duration::from_secs(1);
        assert!(!driver.file_exists(&worker("w1"), "/pods/a/volumes", timeout).await.unwrap());
        assert!(driver.file_exists(&worker("w2"), "/pods/b/volumes", timeout).await.unwrap());
    }

    #[tokio::test]
    async fn test_service_actions_toggle_state() {
        let driver = InMemoryNodeDriver::new();
        let node = worker("w1");
        let timeout = Duration::from_secs(1);

        driver.systemctl(&node, "kubelet", ServiceAction::Stop, timeout).await.unwrap();
        assert!(!driver.service_running("w1", "kubelet").await);
        driver.systemctl(&node, "kubelet", ServiceAction::Start, timeout).await.unwrap();
        assert!(driver.service_running("w1", "kubelet").await);
        assert_eq!(driver.service_log().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_node_errors() {
        let driver = InMemoryNodeDriver::new();
        driver.mark_unreachable("w1").await;
        let err = driver
            .file_exists(&worker("w1"), "/x", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
