//! SQLite implementation of [`GraphStore`].
//!
//! [`SqliteStore`] persists node documents as JSON TEXT columns in a SQLite
//! database with WAL mode and automatic schema migrations. Every call to
//! [`GraphStore::execute_all`] runs inside one transaction, so batches
//! spanning several workspaces commit or roll back together.

use rusqlite::{params, Connection, OptionalExtension};

use arbor_core::{Name, NodeKey, Path, PropertyData};

use crate::batch::{BatchOutcome, WorkspaceBatch};
use crate::document::NodeDocument;
use crate::error::StorageError;
use crate::query::{QueryCommand, QueryRow};
use crate::table::{self, NodeSource, NodeTable};
use crate::traits::GraphStore;

/// SQLite-backed implementation of [`GraphStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore { conn })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn table<'a>(&'a self, workspace: &'a str) -> Result<SqlTable<'a>, StorageError> {
        let root = root_key_in(&self.conn, workspace)?;
        Ok(SqlTable {
            conn: &self.conn,
            workspace,
            root,
        })
    }
}

/// Looks up the root identifier of `workspace`.
fn root_key_in(conn: &Connection, workspace: &str) -> Result<NodeKey, StorageError> {
    let root: Option<String> = conn
        .query_row(
            "SELECT root_key FROM workspaces WHERE name = ?1",
            params![workspace],
            |row| row.get(0),
        )
        .optional()?;
    match root {
        Some(text) => Ok(NodeKey::parse(&text)?),
        None => Err(StorageError::WorkspaceNotFound(workspace.to_string())),
    }
}

/// One workspace viewed through a connection (or an open transaction).
struct SqlTable<'c> {
    conn: &'c Connection,
    workspace: &'c str,
    root: NodeKey,
}

impl NodeSource for SqlTable<'_> {
    fn workspace(&self) -> &str {
        self.workspace
    }

    fn root(&self) -> NodeKey {
        self.root
    }

    fn load(&self, key: &NodeKey) -> Result<Option<NodeDocument>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT document FROM nodes WHERE workspace = ?1 AND node_key = ?2")?;
        let json: Option<String> = stmt
            .query_row(params![self.workspace, key.to_string()], |row| row.get(0))
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

impl NodeTable for SqlTable<'_> {
    fn store(&mut self, doc: NodeDocument) -> Result<(), StorageError> {
        let json = serde_json::to_string(&doc)?;
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR REPLACE INTO nodes (workspace, node_key, parent_key, document) VALUES (?1, ?2, ?3, ?4)",
        )?;
        stmt.execute(params![
            self.workspace,
            doc.key.to_string(),
            doc.parent.map(|p| p.to_string()),
            json
        ])?;
        Ok(())
    }

    fn delete(&mut self, key: &NodeKey) -> Result<(), StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM nodes WHERE workspace = ?1 AND node_key = ?2")?;
        stmt.execute(params![self.workspace, key.to_string()])?;
        Ok(())
    }
}

impl GraphStore for SqliteStore {
    fn workspaces(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name FROM workspaces ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    fn create_workspace(
        &mut self,
        name: &str,
        root: NodeKey,
        root_properties: Vec<PropertyData>,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM workspaces WHERE name = ?1)",
            params![name],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StorageError::WorkspaceExists(name.to_string()));
        }
        tx.execute(
            "INSERT INTO workspaces (name, root_key) VALUES (?1, ?2)",
            params![name, root.to_string()],
        )?;
        let mut doc = NodeDocument::new(root, None, Name::from(""));
        for property in root_properties {
            doc = doc.with_property(property);
        }
        {
            let mut target = SqlTable {
                conn: &tx,
                workspace: name,
                root,
            };
            target.store(doc)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn root_key(&self, workspace: &str) -> Result<NodeKey, StorageError> {
        root_key_in(&self.conn, workspace)
    }

    fn get_node(&self, workspace: &str, key: &NodeKey) -> Result<Option<NodeDocument>, StorageError> {
        self.table(workspace)?.load(key)
    }

    fn find_by_path(&self, workspace: &str, path: &Path) -> Result<Option<NodeDocument>, StorageError> {
        table::find_by_path(&self.table(workspace)?, path)
    }

    fn path_of(&self, workspace: &str, key: &NodeKey) -> Result<Path, StorageError> {
        table::path_of(&self.table(workspace)?, key)
    }

    fn subgraph(
        &self,
        workspace: &str,
        key: &NodeKey,
        depth: usize,
    ) -> Result<Vec<NodeDocument>, StorageError> {
        table::subgraph(&self.table(workspace)?, key, depth)
    }

    fn query(&self, workspace: &str, command: &QueryCommand) -> Result<Vec<QueryRow>, StorageError> {
        root_key_in(&self.conn, workspace)?;
        let mut stmt = self
            .conn
            .prepare_cached("SELECT document FROM nodes WHERE workspace = ?1 ORDER BY node_key")?;
        let rows = stmt.query_map(params![workspace], |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            let doc: NodeDocument = serde_json::from_str(&row?)?;
            result.extend(command.evaluate(&doc));
        }
        Ok(result)
    }

    fn execute_all(&mut self, batches: Vec<WorkspaceBatch>) -> Result<Vec<BatchOutcome>, StorageError> {
        let tx = self.conn.transaction()?;
        let mut outcomes = Vec::with_capacity(batches.len());
        for wb in &batches {
            let root = root_key_in(&tx, &wb.workspace)?;
            let mut target = SqlTable {
                conn: &tx,
                workspace: &wb.workspace,
                root,
            };
            let mut outcome = BatchOutcome::default();
            for op in wb.batch.operations() {
                table::apply(&mut target, op, &mut outcome)?;
            }
            outcomes.push(outcome);
        }
        tx.commit()?;
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::query::Query;
    use arbor_core::Value;

    fn store() -> SqliteStore {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .create_workspace("default", NodeKey::new(), vec![])
            .unwrap();
        store
    }

    #[test]
    fn test_workspace_roundtrip() {
        let mut store = store();
        assert_eq!(store.workspaces().unwrap(), vec!["default"]);
        assert!(store.has_workspace("default").unwrap());
        assert!(matches!(
            store.create_workspace("default", NodeKey::new(), vec![]),
            Err(StorageError::WorkspaceExists(_))
        ));
    }

    #[test]
    fn test_documents_persist_as_json() {
        let mut store = store();
        let root = store.root_key("default").unwrap();
        let a = NodeKey::new();
        let mut batch = Batch::new();
        batch.create_node(a, root, Name::from("a"), vec![PropertyData::single("t", Value::from("x"))]);
        store.execute("default", batch).unwrap();

        let doc = store.get_node("default", &a).unwrap().unwrap();
        assert_eq!(doc.property("t").and_then(|p| p.first()), Some(&Value::from("x")));
        assert_eq!(store.path_of("default", &a).unwrap().to_string(), "/a");
        let root_doc = store.get_node("default", &root).unwrap().unwrap();
        assert_eq!(root_doc.children.len(), 1);
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let mut store = store();
        let root = store.root_key("default").unwrap();
        let a = NodeKey::new();
        let mut batch = Batch::new();
        batch.create_node(a, root, Name::from("a"), vec![]);
        batch.remove_node(NodeKey::new());
        assert!(store.execute("default", batch).is_err());
        assert!(store.get_node("default", &a).unwrap().is_none());
        let root_doc = store.get_node("default", &root).unwrap().unwrap();
        assert!(root_doc.children.is_empty());
    }

    #[test]
    fn test_query_nodes_of_type() {
        let mut store = store();
        let root = store.root_key("default").unwrap();
        let mut batch = Batch::new();
        batch.create_node(
            NodeKey::new(),
            root,
            Name::from("typed"),
            vec![PropertyData::single(
                "jcr:primaryType",
                Value::Name(Name::from("nt:folder")),
            )],
        );
        store.execute("default", batch).unwrap();
        let rows = store
            .query("default", &Query::nodes_of_type("nt:folder"))
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
