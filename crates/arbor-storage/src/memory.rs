//! In-memory implementation of [`GraphStore`].
//!
//! [`InMemoryStore`] is a first-class backend for tests and ephemeral
//! repositories. Batches are applied to copies of the affected workspaces,
//! which replace the originals only when every operation succeeded.

use std::collections::{BTreeMap, HashMap};

use arbor_core::{Name, NodeKey, Path, PropertyData};

use crate::batch::{BatchOutcome, WorkspaceBatch};
use crate::document::NodeDocument;
use crate::error::StorageError;
use crate::query::{QueryCommand, QueryRow};
use crate::table::{self, NodeSource, NodeTable};
use crate::traits::GraphStore;

/// Data stored for a single workspace.
#[derive(Debug, Clone)]
struct StoredWorkspace {
    name: String,
    root: NodeKey,
    nodes: HashMap<NodeKey, NodeDocument>,
}

impl NodeSource for StoredWorkspace {
    fn workspace(&self) -> &str {
        &self.name
    }

    fn root(&self) -> NodeKey {
        self.root
    }

    fn load(&self, key: &NodeKey) -> Result<Option<NodeDocument>, StorageError> {
        Ok(self.nodes.get(key).cloned())
    }
}

impl NodeTable for StoredWorkspace {
    fn store(&mut self, doc: NodeDocument) -> Result<(), StorageError> {
        self.nodes.insert(doc.key, doc);
        Ok(())
    }

    fn delete(&mut self, key: &NodeKey) -> Result<(), StorageError> {
        self.nodes.remove(key);
        Ok(())
    }
}

/// In-memory workspace store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    workspaces: BTreeMap<String, StoredWorkspace>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        InMemoryStore {
            workspaces: BTreeMap::new(),
        }
    }

    /// Returns the stored workspace, or error if not found.
    fn get_stored(&self, workspace: &str) -> Result<&StoredWorkspace, StorageError> {
        self.workspaces
            .get(workspace)
            .ok_or_else(|| StorageError::WorkspaceNotFound(workspace.to_string()))
    }

    /// Total number of nodes across all workspaces.
    pub fn node_count(&self) -> usize {
        self.workspaces.values().map(|w| w.nodes.len()).sum()
    }
}

impl GraphStore for InMemoryStore {
    fn workspaces(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.workspaces.keys().cloned().collect())
    }

    fn create_workspace(
        &mut self,
        name: &str,
        root: NodeKey,
        root_properties: Vec<PropertyData>,
    ) -> Result<(), StorageError> {
        if self.workspaces.contains_key(name) {
            return Err(StorageError::WorkspaceExists(name.to_string()));
        }
        let mut doc = NodeDocument::new(root, None, Name::from(""));
        for property in root_properties {
            doc = doc.with_property(property);
        }
        let mut nodes = HashMap::new();
        nodes.insert(root, doc);
        self.workspaces.insert(
            name.to_string(),
            StoredWorkspace {
                name: name.to_string(),
                root,
                nodes,
            },
        );
        Ok(())
    }

    fn root_key(&self, workspace: &str) -> Result<NodeKey, StorageError> {
        Ok(self.get_stored(workspace)?.root)
    }

    fn get_node(&self, workspace: &str, key: &NodeKey) -> Result<Option<NodeDocument>, StorageError> {
        self.get_stored(workspace)?.load(key)
    }

    fn find_by_path(&self, workspace: &str, path: &Path) -> Result<Option<NodeDocument>, StorageError> {
        table::find_by_path(self.get_stored(workspace)?, path)
    }

    fn path_of(&self, workspace: &str, key: &NodeKey) -> Result<Path, StorageError> {
        table::path_of(self.get_stored(workspace)?, key)
    }

    fn subgraph(
        &self,
        workspace: &str,
        key: &NodeKey,
        depth: usize,
    ) -> Result<Vec<NodeDocument>, StorageError> {
        table::subgraph(self.get_stored(workspace)?, key, depth)
    }

    fn query(&self, workspace: &str, command: &QueryCommand) -> Result<Vec<QueryRow>, StorageError> {
        let stored = self.get_stored(workspace)?;
        let mut keys: Vec<&NodeKey> = stored.nodes.keys().collect();
        keys.sort();
        Ok(keys
            .into_iter()
            .filter_map(|k| stored.nodes.get(k))
            .flat_map(|doc| command.evaluate(doc))
            .collect())
    }

    fn execute_all(&mut self, batches: Vec<WorkspaceBatch>) -> Result<Vec<BatchOutcome>, StorageError> {
        let mut staged: BTreeMap<String, StoredWorkspace> = BTreeMap::new();
        let mut outcomes = Vec::with_capacity(batches.len());
        for wb in &batches {
            if !staged.contains_key(&wb.workspace) {
                let copy = self.get_stored(&wb.workspace)?.clone();
                staged.insert(wb.workspace.clone(), copy);
            }
            let target = staged
                .get_mut(&wb.workspace)
                .ok_or_else(|| StorageError::WorkspaceNotFound(wb.workspace.clone()))?;
            let mut outcome = BatchOutcome::default();
            for op in wb.batch.operations() {
                table::apply(target, op, &mut outcome)?;
            }
            outcomes.push(outcome);
        }
        self.workspaces.extend(staged);
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::query::Query;
    use arbor_core::Value;

    fn store_with(workspaces: &[&str]) -> InMemoryStore {
        let mut store = InMemoryStore::new();
        for ws in workspaces {
            store.create_workspace(ws, NodeKey::new(), vec![]).unwrap();
        }
        store
    }

    #[test]
    fn test_create_and_list_workspaces() {
        let mut store = store_with(&["default", "other"]);
        assert_eq!(store.workspaces().unwrap(), vec!["default", "other"]);
        let err = store.create_workspace("default", NodeKey::new(), vec![]).unwrap_err();
        assert!(matches!(err, StorageError::WorkspaceExists(_)));
    }

    #[test]
    fn test_execute_creates_and_resolves_paths() {
        let mut store = store_with(&["default"]);
        let root = store.root_key("default").unwrap();
        let a = NodeKey::new();
        let mut batch = Batch::new();
        batch.create_node(a, root, Name::from("a"), vec![PropertyData::single("x", Value::Long(1))]);
        let outcome = store.execute("default", batch).unwrap();
        assert_eq!(outcome.assigned.get(&a), Some(&a));

        let doc = store
            .find_by_path("default", &Path::parse("/a").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(doc.key, a);
        assert_eq!(store.path_of("default", &a).unwrap().to_string(), "/a");
    }

    #[test]
    fn test_failed_batch_leaves_store_untouched() {
        let mut store = store_with(&["default"]);
        let root = store.root_key("default").unwrap();
        let mut batch = Batch::new();
        batch.create_node(NodeKey::new(), root, Name::from("ok"), vec![]);
        batch.remove_node(NodeKey::new()); // missing node fails the batch
        assert!(store.execute("default", batch).is_err());
        assert_eq!(store.node_count(), 1);
    }

    #[test]
    fn test_execute_all_is_atomic_across_workspaces() {
        let mut store = store_with(&["default", "system"]);
        let root = store.root_key("default").unwrap();
        let mut good = Batch::new();
        good.create_node(NodeKey::new(), root, Name::from("a"), vec![]);
        let mut bad = Batch::new();
        bad.remove_node(NodeKey::new());
        let result = store.execute_all(vec![
            WorkspaceBatch::new("default", good),
            WorkspaceBatch::new("system", bad),
        ]);
        assert!(result.is_err());
        assert_eq!(store.node_count(), 2);
    }

    #[test]
    fn test_query_referrers() {
        let mut store = store_with(&["default"]);
        let root = store.root_key("default").unwrap();
        let target = NodeKey::new();
        let referrer = NodeKey::new();
        let mut batch = Batch::new();
        batch
            .create_node(target, root, Name::from("target"), vec![])
            .create_node(
                referrer,
                root,
                Name::from("referrer"),
                vec![PropertyData::single("ref", Value::Reference(target))],
            );
        store.execute("default", batch).unwrap();
        let rows = store
            .query("default", &Query::referrers_of([target]).strong_only().build())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].node, referrer);
    }

    #[test]
    fn test_unknown_workspace() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.root_key("nope"),
            Err(StorageError::WorkspaceNotFound(_))
        ));
    }
}
