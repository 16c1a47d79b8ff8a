//! Node registry implementation
//!
//! Maps the five domain operations onto the key-value storage contract:
//! key derivation under a fixed prefix, existence semantics, and the
//! classification of backend outcomes into domain errors.

use std::sync::Arc;

use corral_storage::{Storage, StorageError};
use corral_types::Node;

use crate::errors::{RegistryError, Result};

/// Key prefix for the node collection. Every node lives at
/// `{NODE_PREFIX}/{name}`.
pub const NODE_PREFIX: &str = "/registry/nodes";

/// Provides CRUD + list operations for [`Node`] objects.
///
/// Stateless apart from the storage handle: no cache, no locks. Each call
/// performs at most two storage operations.
pub struct NodeRegistry {
    storage: Arc<dyn Storage>,
}

impl NodeRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn node_key(name: &str) -> String {
        format!("{NODE_PREFIX}/{name}")
    }

    /// Key-safety check, independent of the schema's own validation. A name
    /// that embeds the key separator could alias another node's key or
    /// escape the collection prefix entirely.
    fn check_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(RegistryError::invalid("node name must not be empty"));
        }
        if name.contains('/') || name.chars().any(char::is_whitespace) {
            return Err(RegistryError::invalid(format!(
                "node name {name:?} contains characters reserved for storage keys"
            )));
        }
        Ok(())
    }

    fn check_node(node: &Node) -> Result<()> {
        Self::check_name(&node.name)?;
        node.validate()
            .map_err(|err| RegistryError::invalid(err.to_string()))
    }

    fn encode(node: &Node) -> Result<Vec<u8>> {
        serde_json::to_vec(node).map_err(|err| RegistryError::internal("failed to encode node", err))
    }

    fn decode(bytes: &[u8]) -> std::result::Result<Node, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Store a new node. Fails `AlreadyExists` when the name is taken.
    pub async fn create_node(&self, node: &Node) -> Result<()> {
        Self::check_node(node)?;
        let key = Self::node_key(&node.name);

        // Existence probe: a cheap conflict answer without going through a
        // write. The create below is the authoritative guard.
        match self.storage.get(&key).await {
            Ok(_) => {
                return Err(RegistryError::AlreadyExists {
                    name: node.name.clone(),
                })
            }
            Err(StorageError::NotFound) => {}
            Err(err) => return Err(RegistryError::internal("failed to check existing node", err)),
        }

        match self.storage.create(&key, Self::encode(node)?).await {
            Ok(()) => {
                tracing::debug!(name = %node.name, "created node");
                Ok(())
            }
            // Lost a race with a concurrent create for the same name.
            Err(StorageError::AlreadyExists) => Err(RegistryError::AlreadyExists {
                name: node.name.clone(),
            }),
            Err(err) => Err(RegistryError::internal("failed to create node", err)),
        }
    }

    /// Retrieve a node by name.
    pub async fn get_node(&self, name: &str) -> Result<Node> {
        Self::check_name(name)?;
        match self.storage.get(&Self::node_key(name)).await {
            Ok(bytes) => Self::decode(&bytes)
                .map_err(|err| RegistryError::internal("failed to decode stored node", err)),
            Err(StorageError::NotFound) => Err(RegistryError::NotFound {
                name: name.to_string(),
            }),
            Err(err) => Err(RegistryError::internal("failed to fetch node", err)),
        }
    }

    /// Replace an existing node wholesale. Fails `NotFound` when the name
    /// was never created (or has been deleted).
    pub async fn update_node(&self, node: &Node) -> Result<()> {
        Self::check_node(node)?;
        let key = Self::node_key(&node.name);

        match self.storage.get(&key).await {
            Ok(_) => {}
            Err(StorageError::NotFound) => {
                return Err(RegistryError::NotFound {
                    name: node.name.clone(),
                })
            }
            Err(err) => return Err(RegistryError::internal("failed to check existing node", err)),
        }

        match self.storage.update(&key, Self::encode(node)?).await {
            Ok(()) => {
                tracing::debug!(name = %node.name, "updated node");
                Ok(())
            }
            // The node vanished between the probe and the write.
            Err(StorageError::NotFound) => Err(RegistryError::NotFound {
                name: node.name.clone(),
            }),
            Err(err) => Err(RegistryError::internal("failed to update node", err)),
        }
    }

    /// Remove a node by name. Idempotent: deleting an absent node succeeds.
    pub async fn delete_node(&self, name: &str) -> Result<()> {
        Self::check_name(name)?;
        match self.storage.delete(&Self::node_key(name)).await {
            Ok(()) => {
                tracing::debug!(name, "deleted node");
                Ok(())
            }
            Err(StorageError::NotFound) => Ok(()),
            Err(err) => Err(RegistryError::internal("failed to delete node", err)),
        }
    }

    /// All registered nodes, sorted by name. An empty collection is an
    /// empty vector, not an error.
    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let prefix = format!("{NODE_PREFIX}/");
        let values = self
            .storage
            .list(&prefix)
            .await
            .map_err(|err| RegistryError::ListFailed(anyhow::Error::new(err)))?;

        let mut nodes = Vec::with_capacity(values.len());
        for value in &values {
            let node = Self::decode(value)
                .map_err(|err| RegistryError::ListFailed(anyhow::Error::new(err)))?;
            nodes.push(node);
        }
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use corral_storage::MemoryStorage;

    fn registry() -> NodeRegistry {
        NodeRegistry::new(Arc::new(MemoryStorage::new()))
    }

    fn node(name: &str) -> Node {
        let mut node = Node::new(name);
        node.spec.capacity.insert("cpu".into(), 4);
        node
    }

    #[tokio::test]
    async fn create_then_get_returns_equal_node() {
        let registry = registry();
        let worker = node("worker-1");
        registry.create_node(&worker).await.unwrap();
        assert_eq!(registry.get_node("worker-1").await.unwrap(), worker);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts_and_leaves_state_untouched() {
        let registry = registry();
        let original = node("worker-1");
        registry.create_node(&original).await.unwrap();

        let mut second = node("worker-1");
        second.spec.unschedulable = true;
        let err = registry.create_node(&second).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists { ref name } if name == "worker-1"));

        // The losing create must not have overwritten the stored value.
        assert_eq!(registry.get_node("worker-1").await.unwrap(), original);
    }

    #[tokio::test]
    async fn get_of_unknown_name_is_not_found() {
        let registry = registry();
        let err = registry.get_node("ghost").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { ref name } if name == "ghost"));
    }

    #[tokio::test]
    async fn get_after_delete_is_not_found() {
        let registry = registry();
        registry.create_node(&node("worker-1")).await.unwrap();
        registry.delete_node("worker-1").await.unwrap();
        let err = registry.get_node("worker-1").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn update_replaces_the_whole_node() {
        let registry = registry();
        let mut worker = node("worker-1");
        worker.labels.insert("zone".into(), "eu-west".into());
        registry.create_node(&worker).await.unwrap();

        let mut replacement = node("worker-1");
        replacement.spec.unschedulable = true;
        registry.update_node(&replacement).await.unwrap();

        let stored = registry.get_node("worker-1").await.unwrap();
        assert_eq!(stored, replacement);
        // Full replace, not a merge: the old label is gone.
        assert!(stored.labels.is_empty());
    }

    #[tokio::test]
    async fn update_of_unknown_name_is_not_found() {
        let registry = registry();
        let err = registry.update_node(&node("ghost")).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { ref name } if name == "ghost"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let registry = registry();
        registry.create_node(&node("worker-1")).await.unwrap();
        registry.delete_node("worker-1").await.unwrap();
        registry.delete_node("worker-1").await.unwrap();
        registry.delete_node("never-created").await.unwrap();
    }

    #[tokio::test]
    async fn list_is_empty_then_grows_with_creates() {
        let registry = registry();
        assert!(registry.list_nodes().await.unwrap().is_empty());

        for name in ["worker-3", "worker-1", "worker-2"] {
            registry.create_node(&node(name)).await.unwrap();
        }

        let nodes = registry.list_nodes().await.unwrap();
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["worker-1", "worker-2", "worker-3"]);
    }

    #[tokio::test]
    async fn invalid_node_never_touches_storage() {
        let registry = registry();

        let err = registry.create_node(&Node::new("")).await.unwrap_err();
        assert!(matches!(err, RegistryError::Invalid { .. }));

        let mut bad_capacity = node("worker-1");
        bad_capacity.spec.capacity.insert("cpu".into(), 0);
        let err = registry.create_node(&bad_capacity).await.unwrap_err();
        assert!(matches!(err, RegistryError::Invalid { .. }));

        assert!(registry.list_nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn separator_in_name_is_rejected_before_key_derivation() {
        let registry = registry();
        registry.create_node(&node("worker-1")).await.unwrap();

        // "../worker-1" would alias an existing key if it reached the join.
        for name in ["../worker-1", "a/b", "has space", "tab\there"] {
            let err = registry.create_node(&node(name)).await.unwrap_err();
            assert!(matches!(err, RegistryError::Invalid { .. }), "{name}");
            let err = registry.get_node(name).await.unwrap_err();
            assert!(matches!(err, RegistryError::Invalid { .. }), "{name}");
            let err = registry.delete_node(name).await.unwrap_err();
            assert!(matches!(err, RegistryError::Invalid { .. }), "{name}");
        }

        assert_eq!(registry.list_nodes().await.unwrap().len(), 1);
    }

    /// Backend double whose every operation fails with an opaque error.
    struct BrokenStorage;

    #[async_trait]
    impl Storage for BrokenStorage {
        async fn get(&self, _key: &str) -> std::result::Result<Vec<u8>, StorageError> {
            Err(StorageError::Database(sled::Error::Unsupported(
                "injected failure".into(),
            )))
        }
        async fn create(
            &self,
            _key: &str,
            _value: Vec<u8>,
        ) -> std::result::Result<(), StorageError> {
            Err(StorageError::Database(sled::Error::Unsupported(
                "injected failure".into(),
            )))
        }
        async fn update(
            &self,
            _key: &str,
            _value: Vec<u8>,
        ) -> std::result::Result<(), StorageError> {
            Err(StorageError::Database(sled::Error::Unsupported(
                "injected failure".into(),
            )))
        }
        async fn delete(&self, _key: &str) -> std::result::Result<(), StorageError> {
            Err(StorageError::Database(sled::Error::Unsupported(
                "injected failure".into(),
            )))
        }
        async fn list(&self, _prefix: &str) -> std::result::Result<Vec<Vec<u8>>, StorageError> {
            Err(StorageError::Database(sled::Error::Unsupported(
                "injected failure".into(),
            )))
        }
    }

    #[tokio::test]
    async fn opaque_backend_failures_are_classified() {
        let registry = NodeRegistry::new(Arc::new(BrokenStorage));

        let err = registry.create_node(&node("worker-1")).await.unwrap_err();
        assert!(matches!(err, RegistryError::Internal { .. }));

        let err = registry.get_node("worker-1").await.unwrap_err();
        assert!(matches!(err, RegistryError::Internal { .. }));

        let err = registry.update_node(&node("worker-1")).await.unwrap_err();
        assert!(matches!(err, RegistryError::Internal { .. }));

        let err = registry.delete_node("worker-1").await.unwrap_err();
        assert!(matches!(err, RegistryError::Internal { .. }));

        let err = registry.list_nodes().await.unwrap_err();
        assert!(matches!(err, RegistryError::ListFailed(_)));
    }
}
