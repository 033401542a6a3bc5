//! Repository error types.
//!
//! [`RepositoryError`] is the single error type surfaced by sessions, nodes,
//! the version manager and the repository itself. Storage and core failures
//! are wrapped with their cause preserved; lock failures carry a dedicated
//! [`LockError`].

use arbor_core::{CoreError, NodeKey};
use arbor_storage::StorageError;
use thiserror::Error;

use crate::concurrency::LockError;

/// Errors produced by repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No item with the given identifier exists (or it was removed in this session).
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// No item exists at the given path.
    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A node type or protected-item rule would be broken.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A checked-in node was mutated, or a versioning rule was broken.
    #[error("version error: {0}")]
    Version(String),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// A node scheduled for removal is still referenced.
    #[error("node {target} is still referenced by {referrer} (property {property})")]
    ReferentialIntegrity {
        target: NodeKey,
        referrer: NodeKey,
        property: String,
    },

    /// Pending changes exist where none are allowed, or an item went stale.
    #[error("invalid item state: {0}")]
    InvalidItemState(String),

    #[error("item exists: {0}")]
    ItemExists(String),

    #[error("no such node type: {0}")]
    NoSuchNodeType(String),

    #[error("no such workspace: {0}")]
    NoSuchWorkspace(String),

    #[error("invalid name pattern '{pattern}': {reason}")]
    InvalidNamePattern { pattern: String, reason: String },

    /// A merge conflict outside best-effort mode.
    #[error("merge failed: {0}")]
    Merge(String),

    #[error("value format: {0}")]
    ValueFormat(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The session has logged out.
    #[error("session is no longer live")]
    SessionClosed,

    #[error("repository is closed")]
    RepositoryClosed,

    /// Failure inside the graph layer.
    #[error("repository failure: {0}")]
    Storage(#[from] StorageError),
}

impl From<CoreError> for RepositoryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValueFormat { .. } => RepositoryError::ValueFormat(err.to_string()),
            CoreError::NoSuchNodeType { name } => RepositoryError::NoSuchNodeType(name),
            CoreError::InvalidName { .. } | CoreError::InvalidPath { .. } => {
                RepositoryError::InvalidPath(err.to_string())
            }
            other => RepositoryError::ConstraintViolation(other.to_string()),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = RepositoryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_map_to_repository_taxonomy() {
        let err: RepositoryError = CoreError::NoSuchNodeType {
            name: "x:missing".to_string(),
        }
        .into();
        assert!(matches!(err, RepositoryError::NoSuchNodeType(ref n) if n == "x:missing"));

        let err: RepositoryError = CoreError::InvalidPath {
            path: "a[".to_string(),
            reason: "unterminated index".to_string(),
        }
        .into();
        assert!(matches!(err, RepositoryError::InvalidPath(_)));
    }

    #[test]
    fn test_storage_errors_keep_their_cause() {
        let err: RepositoryError = StorageError::WorkspaceNotFound("ws".to_string()).into();
        insta::assert_snapshot!(err.to_string(), @"repository failure: workspace not found: ws");
    }
}
