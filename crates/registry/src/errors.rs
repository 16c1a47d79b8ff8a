//! Error types for the node registry

use thiserror::Error;

/// Domain errors. Every backend failure is classified into exactly one of
/// these; raw storage errors never cross this boundary.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid node: {reason}")]
    Invalid { reason: String },

    #[error("node not found: {name}")]
    NotFound { name: String },

    #[error("node already exists: {name}")]
    AlreadyExists { name: String },

    #[error("failed to list nodes: {0}")]
    ListFailed(#[source] anyhow::Error),

    #[error("{context}: {source}")]
    Internal {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl RegistryError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    pub fn internal(
        context: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal {
            context,
            source: anyhow::Error::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
