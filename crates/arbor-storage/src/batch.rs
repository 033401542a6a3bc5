//! Write batches.
//!
//! A [`Batch`] is an ordered list of [`Operation`]s applied atomically to one
//! workspace. Operations address nodes by identifier; a create operation's
//! requested identifier is honored and reported back in [`BatchOutcome`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use arbor_core::{Name, NodeKey, PropertyData};

/// A single write against a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Creates a node as the last child of `parent`.
    CreateNode {
        key: NodeKey,
        parent: NodeKey,
        name: Name,
        properties: Vec<PropertyData>,
    },
    /// Inserts or replaces properties.
    SetProperties {
        key: NodeKey,
        properties: Vec<PropertyData>,
    },
    RemoveProperties {
        key: NodeKey,
        names: Vec<Name>,
    },
    /// Removes a node and its whole subtree.
    RemoveNode { key: NodeKey },
    /// Re-parents and/or renames a node; it becomes the last child.
    MoveNode {
        key: NodeKey,
        new_parent: NodeKey,
        new_name: Name,
    },
    /// Reorders children; `order` must be a permutation of the current ones.
    SetChildOrder { parent: NodeKey, order: Vec<NodeKey> },
}

/// Ordered operations applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    operations: Vec<Operation>,
}

impl Batch {
    pub fn new() -> Self {
        Batch {
            operations: Vec::new(),
        }
    }

    pub fn push(&mut self, op: Operation) -> &mut Self {
        self.operations.push(op);
        self
    }

    pub fn create_node(
        &mut self,
        key: NodeKey,
        parent: NodeKey,
        name: Name,
        properties: Vec<PropertyData>,
    ) -> &mut Self {
        self.push(Operation::CreateNode {
            key,
            parent,
            name,
            properties,
        })
    }

    pub fn set_properties(&mut self, key: NodeKey, properties: Vec<PropertyData>) -> &mut Self {
        self.push(Operation::SetProperties { key, properties })
    }

    pub fn set_property(&mut self, key: NodeKey, property: PropertyData) -> &mut Self {
        self.set_properties(key, vec![property])
    }

    pub fn remove_properties(&mut self, key: NodeKey, names: Vec<Name>) -> &mut Self {
        self.push(Operation::RemoveProperties { key, names })
    }

    pub fn remove_node(&mut self, key: NodeKey) -> &mut Self {
        self.push(Operation::RemoveNode { key })
    }

    pub fn move_node(&mut self, key: NodeKey, new_parent: NodeKey, new_name: Name) -> &mut Self {
        self.push(Operation::MoveNode {
            key,
            new_parent,
            new_name,
        })
    }

    pub fn set_child_order(&mut self, parent: NodeKey, order: Vec<NodeKey>) -> &mut Self {
        self.push(Operation::SetChildOrder { parent, order })
    }

    /// Appends every operation of `other`.
    pub fn extend(&mut self, other: Batch) -> &mut Self {
        self.operations.extend(other.operations);
        self
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// A batch bound to the workspace it targets.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceBatch {
    pub workspace: String,
    pub batch: Batch,
}

impl WorkspaceBatch {
    pub fn new(workspace: impl Into<String>, batch: Batch) -> Self {
        WorkspaceBatch {
            workspace: workspace.into(),
            batch,
        }
    }
}

/// Result of applying a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// Requested identifier of each created node mapped to the identifier
    /// the store assigned.
    pub assigned: HashMap<NodeKey, NodeKey>,
    pub applied: usize,
}
