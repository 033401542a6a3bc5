//! Storage error types for arbor-storage.
//!
//! [`StorageError`] covers all anticipated failure modes in the storage layer:
//! backend and serialization failures, missing workspaces and nodes, and
//! integrity violations detected while applying a batch.

use arbor_core::{CoreError, NodeKey};
use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The SQLite backend reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Stored data could not be decoded into core types.
    #[error("corrupt data: {0}")]
    Corrupt(#[from] CoreError),

    /// The named workspace does not exist.
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    /// A workspace with that name already exists.
    #[error("workspace already exists: {0}")]
    WorkspaceExists(String),

    /// A node was not found in the given workspace.
    #[error("node not found: workspace={workspace}, node={key}")]
    NodeNotFound { workspace: String, key: NodeKey },

    /// A node with that identifier already exists in the workspace.
    #[error("node already exists: workspace={workspace}, node={key}")]
    NodeExists { workspace: String, key: NodeKey },

    /// A data integrity violation was detected.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },
}
