//! Operation semantics shared by every backend.
//!
//! Backends expose a workspace as a [`NodeTable`] (load/store/delete of
//! documents plus the root identifier). Everything else, path resolution,
//! subgraph walks and the meaning of each [`Operation`], is implemented once
//! here so both backends behave identically.

use std::collections::HashSet;

use arbor_core::{Name, NodeKey, Path, Segment};

use crate::batch::{BatchOutcome, Operation};
use crate::document::{ChildRef, NodeDocument};
use crate::error::StorageError;

/// Read access to one workspace.
pub trait NodeSource {
    fn workspace(&self) -> &str;
    fn root(&self) -> NodeKey;
    fn load(&self, key: &NodeKey) -> Result<Option<NodeDocument>, StorageError>;

    /// Loads a node that must exist.
    fn require(&self, key: &NodeKey) -> Result<NodeDocument, StorageError> {
        self.load(key)?.ok_or_else(|| StorageError::NodeNotFound {
            workspace: self.workspace().to_string(),
            key: *key,
        })
    }
}

/// Write access to one workspace.
pub trait NodeTable: NodeSource {
    fn store(&mut self, doc: NodeDocument) -> Result<(), StorageError>;
    fn delete(&mut self, key: &NodeKey) -> Result<(), StorageError>;
}

/// Computes the path of `key` by walking parent links.
pub fn path_of(source: &impl NodeSource, key: &NodeKey) -> Result<Path, StorageError> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut current = source.require(key)?;
    let mut seen = HashSet::new();
    while let Some(parent_key) = current.parent {
        if !seen.insert(current.key) {
            return Err(StorageError::IntegrityError {
                reason: format!("cycle in parent chain at {}", current.key),
            });
        }
        let parent = source.require(&parent_key)?;
        let index = parent.child_index(&current.key).ok_or_else(|| StorageError::IntegrityError {
            reason: format!("{} is not listed as a child of {}", current.key, parent_key),
        })?;
        segments.push(Segment::new(current.name.clone(), index));
        current = parent;
    }
    segments.reverse();
    Ok(Path::root().resolve(&Path::relative(segments))?)
}

/// Resolves an absolute path by walking child references from the root.
pub fn find_by_path(
    source: &impl NodeSource,
    path: &Path,
) -> Result<Option<NodeDocument>, StorageError> {
    let mut current = source.require(&source.root())?;
    for segment in path.segments() {
        let child = match current.child_by_segment(segment) {
            Some(child) => child.key,
            None => return Ok(None),
        };
        current = match source.load(&child)? {
            Some(doc) => doc,
            None => return Ok(None),
        };
    }
    Ok(Some(current))
}

/// Breadth-first documents of the subtree at `key`, down to `depth` levels
/// below it (0 returns only the node itself).
pub fn subgraph(
    source: &impl NodeSource,
    key: &NodeKey,
    depth: usize,
) -> Result<Vec<NodeDocument>, StorageError> {
    let mut out = Vec::new();
    let mut frontier = vec![source.require(key)?];
    for level in 0..=depth {
        let mut next = Vec::new();
        for doc in frontier {
            if level < depth {
                for child in &doc.children {
                    next.push(source.require(&child.key)?);
                }
            }
            out.push(doc);
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    Ok(out)
}

/// Applies one operation, recording created identifiers in `outcome`.
pub fn apply(
    table: &mut impl NodeTable,
    op: &Operation,
    outcome: &mut BatchOutcome,
) -> Result<(), StorageError> {
    match op {
        Operation::CreateNode {
            key,
            parent,
            name,
            properties,
        } => {
            if table.load(key)?.is_some() {
                return Err(StorageError::NodeExists {
                    workspace: table.workspace().to_string(),
                    key: *key,
                });
            }
            let mut parent_doc = table.require(parent)?;
            let mut doc = NodeDocument::new(*key, Some(*parent), name.clone());
            for property in properties {
                doc.properties.insert(property.name.clone(), property.clone());
            }
            parent_doc.children.push(ChildRef {
                key: *key,
                name: name.clone(),
            });
            table.store(parent_doc)?;
            table.store(doc)?;
            outcome.assigned.insert(*key, *key);
        }
        Operation::SetProperties { key, properties } => {
            let mut doc = table.require(key)?;
            for property in properties {
                doc.properties.insert(property.name.clone(), property.clone());
            }
            table.store(doc)?;
        }
        Operation::RemoveProperties { key, names } => {
            let mut doc = table.require(key)?;
            for name in names {
                doc.properties.shift_remove(name);
            }
            table.store(doc)?;
        }
        Operation::RemoveNode { key } => {
            if *key == table.root() {
                return Err(StorageError::IntegrityError {
                    reason: "the root node cannot be removed".to_string(),
                });
            }
            let doc = table.require(key)?;
            if let Some(parent_key) = doc.parent {
                let mut parent = table.require(&parent_key)?;
                parent.children.retain(|c| c.key != *key);
                table.store(parent)?;
            }
            let mut stack = vec![doc];
            while let Some(next) = stack.pop() {
                for child in &next.children {
                    if let Some(child_doc) = table.load(&child.key)? {
                        stack.push(child_doc);
                    }
                }
                table.delete(&next.key)?;
            }
        }
        Operation::MoveNode {
            key,
            new_parent,
            new_name,
        } => move_node(table, key, new_parent, new_name)?,
        Operation::SetChildOrder { parent, order } => {
            let mut doc = table.require(parent)?;
            let current: HashSet<NodeKey> = doc.children.iter().map(|c| c.key).collect();
            let requested: HashSet<NodeKey> = order.iter().copied().collect();
            if current != requested || order.len() != doc.children.len() {
                return Err(StorageError::IntegrityError {
                    reason: format!("child order for {} is not a permutation of its children", parent),
                });
            }
            let mut reordered = Vec::with_capacity(order.len());
            for key in order {
                if let Some(pos) = doc.children.iter().position(|c| c.key == *key) {
                    reordered.push(doc.children.remove(pos));
                }
            }
            doc.children = reordered;
            table.store(doc)?;
        }
    }
    outcome.applied += 1;
    Ok(())
}

fn move_node(
    table: &mut impl NodeTable,
    key: &NodeKey,
    new_parent: &NodeKey,
    new_name: &Name,
) -> Result<(), StorageError> {
    if *key == table.root() {
        return Err(StorageError::IntegrityError {
            reason: "the root node cannot be moved".to_string(),
        });
    }
    // The destination must not lie inside the moved subtree.
    let mut cursor = Some(*new_parent);
    while let Some(ancestor) = cursor {
        if ancestor == *key {
            return Err(StorageError::IntegrityError {
                reason: format!("cannot move {} beneath itself", key),
            });
        }
        cursor = table.require(&ancestor)?.parent;
    }
    let mut doc = table.require(key)?;
    if let Some(old_parent) = doc.parent {
        let mut parent = table.require(&old_parent)?;
        parent.children.retain(|c| c.key != *key);
        table.store(parent)?;
    }
    let mut parent = table.require(new_parent)?;
    parent.children.push(ChildRef {
        key: *key,
        name: new_name.clone(),
    });
    table.store(parent)?;
    doc.parent = Some(*new_parent);
    doc.name = new_name.clone();
    table.store(doc)
}
