use thiserror::Error;

use crate::resources::Kind;

/// Failure of a resource store operation.
///
/// `NotFound` is the create-vs-update branch signal and is never reported
/// as a pass failure on its own. Everything else is a hard failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: Kind,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: Kind,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} was modified concurrently")]
    Conflict {
        kind: Kind,
        namespace: String,
        name: String,
    },

    #[error("store rejected request: {0}")]
    Rejected(String),

    #[error("expected a {expected} object, store returned {found}")]
    KindMismatch { expected: Kind, found: Kind },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store document is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(kind: Kind, namespace: &str, name: &str) -> Self {
        StoreError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
