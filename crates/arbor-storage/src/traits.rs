//! The [`GraphStore`] trait defining the storage contract for workspaces.
//!
//! Reads address nodes by identifier or by path; writes go through
//! [`Batch`]es that are applied all-or-nothing. All backends
//! (InMemoryStore, SqliteStore) implement this trait, so they are fully
//! swappable without changing the session layer.

use arbor_core::{NodeKey, Path, PropertyData};

use crate::batch::{Batch, BatchOutcome, WorkspaceBatch};
use crate::document::NodeDocument;
use crate::error::StorageError;
use crate::query::{QueryCommand, QueryRow};

/// The storage contract for hierarchical workspaces.
///
/// The trait is synchronous; callers share a store behind a mutex.
pub trait GraphStore: Send {
    // -------------------------------------------------------------------
    // Workspaces
    // -------------------------------------------------------------------

    /// Names of all workspaces, sorted.
    fn workspaces(&self) -> Result<Vec<String>, StorageError>;

    /// Creates a workspace whose root has identifier `root` and the given
    /// properties.
    fn create_workspace(
        &mut self,
        name: &str,
        root: NodeKey,
        root_properties: Vec<PropertyData>,
    ) -> Result<(), StorageError>;

    /// Identifier of the workspace root.
    fn root_key(&self, workspace: &str) -> Result<NodeKey, StorageError>;

    fn has_workspace(&self, workspace: &str) -> Result<bool, StorageError> {
        Ok(self.workspaces()?.iter().any(|w| w == workspace))
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    fn get_node(&self, workspace: &str, key: &NodeKey) -> Result<Option<NodeDocument>, StorageError>;

    fn find_by_path(&self, workspace: &str, path: &Path) -> Result<Option<NodeDocument>, StorageError>;

    fn path_of(&self, workspace: &str, key: &NodeKey) -> Result<Path, StorageError>;

    /// Documents of the subtree rooted at `key`, at most `depth` levels deep.
    fn subgraph(
        &self,
        workspace: &str,
        key: &NodeKey,
        depth: usize,
    ) -> Result<Vec<NodeDocument>, StorageError>;

    fn query(&self, workspace: &str, command: &QueryCommand) -> Result<Vec<QueryRow>, StorageError>;

    // -------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------

    /// Applies several batches, possibly against different workspaces, as
    /// one atomic unit. Either every batch is applied or none is.
    fn execute_all(&mut self, batches: Vec<WorkspaceBatch>) -> Result<Vec<BatchOutcome>, StorageError>;

    /// Applies one batch atomically.
    fn execute(&mut self, workspace: &str, batch: Batch) -> Result<BatchOutcome, StorageError> {
        let mut outcomes = self.execute_all(vec![WorkspaceBatch::new(workspace, batch)])?;
        Ok(outcomes.pop().unwrap_or_default())
    }
}
