use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schema-level validation failures for a [`Node`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NodeValidationError {
    #[error("node name must not be empty")]
    EmptyName,

    #[error("label key must not be empty")]
    EmptyLabelKey,

    #[error("capacity for {resource:?} must be greater than zero")]
    ZeroCapacity { resource: String },
}

/// Desired configuration of a cluster node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Address the node's agent is reachable on, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Marks the node as ineligible for new workloads.
    #[serde(default)]
    pub unschedulable: bool,
    /// Declared resource capacity, e.g. `cpu` or `memory-mb`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capacity: BTreeMap<String, u64>,
}

/// Observed lifecycle phase of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Ready,
    NotReady,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl NodeStatus {
    /// String representation used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::NotReady => "not_ready",
        }
    }
}

/// A registered cluster node. `name` is the unique identifier within the
/// collection; everything else is declarative state carried along with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Schema validation. Key-safety of the name is the registry's concern,
    /// not this check.
    pub fn validate(&self) -> Result<(), NodeValidationError> {
        if self.name.is_empty() {
            return Err(NodeValidationError::EmptyName);
        }
        if self.labels.keys().any(|k| k.is_empty()) {
            return Err(NodeValidationError::EmptyLabelKey);
        }
        if let Some((resource, _)) = self.spec.capacity.iter().find(|(_, qty)| **qty == 0) {
            return Err(NodeValidationError::ZeroCapacity {
                resource: resource.clone(),
            });
        }
        Ok(())
    }
}
