//! The cluster resource store the orchestrator drives.
//!
//! The store is the system of record for every object's live state. The
//! orchestrator only ever talks to it through [`ClusterStore`], so a real
//! control-plane client and the in-memory [`InMemoryCluster`] are
//! interchangeable.

mod memory;

pub use memory::{InMemoryCluster, StoreOp, Verb};

use crate::errors::StoreError;
use async_trait::async_trait;
use convoy_common::resources::{ClusterNode, Namespace, Pod};
use convoy_common::{Resource, ResourceKey, ResourceKind, TypedResource};
use std::collections::BTreeMap;

/// Abstraction over the cluster control plane for testability.
///
/// `create` must report a name collision as [`StoreError::AlreadyExists`];
/// reads of absent objects must report [`StoreError::NotFound`].
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Create an object; returns it with server-assigned fields filled in.
    async fn create(&self, resource: Resource) -> Result<Resource, StoreError>;

    async fn get(&self, key: &ResourceKey) -> Result<Resource, StoreError>;

    /// Replace an existing object's declared state.
    async fn update(&self, resource: Resource) -> Result<Resource, StoreError>;

    async fn delete(&self, key: &ResourceKey) -> Result<(), StoreError>;

    async fn list(&self, kind: ResourceKind, namespace: Option<&str>) -> Result<Vec<Resource>, StoreError>;

    async fn create_namespace(&self, namespace: Namespace) -> Result<Namespace, StoreError>;

    async fn get_namespace(&self, name: &str) -> Result<Namespace, StoreError>;

    /// Pods in `namespace` whose labels include every `selector` entry.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, StoreError>;

    /// Pods scheduled onto `node`, across all namespaces.
    async fn pods_on_node(&self, node: &str) -> Result<Vec<Pod>, StoreError>;

    async fn list_nodes(&self) -> Result<Vec<ClusterNode>, StoreError>;

    async fn get_node(&self, name: &str) -> Result<ClusterNode, StoreError>;

    /// Cordon (`true`) or uncordon (`false`) a node.
    async fn set_unschedulable(&self, node: &str, unschedulable: bool) -> Result<(), StoreError>;
}

/// Fetch an object and unwrap it as its payload type.
pub async fn get_typed<T: TypedResource>(
    store: &dyn ClusterStore,
    namespace: Option<&str>,
    name: &str,
) -> Result<T, StoreError> {
    let key = ResourceKey::new(T::KIND, namespace, name);
    let resource = store.get(&key).await?;
    T::try_from(resource).map_err(|other| {
        StoreError::Rejected(format!("expected {} but store returned {}", key, other.key()))
    })
}

/// Replace an object with `value`, returning the stored payload.
pub async fn update_typed<T: TypedResource>(store: &dyn ClusterStore, value: T) -> Result<T, StoreError> {
    let updated = store.update(value.into()).await?;
    T::try_from(updated).map_err(|other| {
        StoreError::Rejected(format!("store returned unexpected {}", other.key()))
    })
}
