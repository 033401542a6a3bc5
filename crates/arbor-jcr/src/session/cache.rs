//! The per-session overlay over a workspace.
//!
//! # Architecture
//!
//! [`SessionCache`] keeps two maps:
//!
//! - `committed`: a read-through cache of persisted documents, filled lazily
//!   from the graph layer and discarded on refresh.
//! - `pending`: a write-ahead map from identifier to [`PendingNode`], holding
//!   the edited document and (for persisted nodes) the base it was edited
//!   from. Reads consult `pending` first.
//!
//! Removed nodes are dropped from both maps and remembered in `removed_keys`
//! and [`RemovedNodes`]. On save the pending state is diffed against each
//! base into one [`Batch`]: creates, moves, removes, property writes, then
//! child orders. A successful save moves every pending document into
//! `committed` and bumps the generation counter.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;

use arbor_core::lexicon::{
    JCR_BASE_VERSION, JCR_CREATED, JCR_CREATED_BY, JCR_IS_CHECKED_OUT, JCR_LAST_MODIFIED,
    JCR_LAST_MODIFIED_BY, JCR_PREDECESSORS, JCR_VERSION_HISTORY, MIX_CREATED, MIX_LAST_MODIFIED,
    MIX_REFERENCEABLE, MIX_VERSIONABLE,
};
use arbor_core::{
    Name, NodeDefinition, NodeKey, NodeTypeRegistry, Path, PropertyData, PropertyDefinition,
    PropertyType, Segment, Value,
};
use arbor_storage::{Batch, BatchOutcome, ChildRef, NodeDocument, Query, StorageError};

use crate::error::{RepositoryError, Result};
use crate::repository::{lock_store, SharedStore};
use crate::session::editor::Editor;
use crate::session::removed::RemovedNodes;

/// Lifecycle state of a node within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Persisted and unmodified.
    Clean,
    /// Created in this session and not yet saved.
    New,
    /// Persisted with unsaved modifications.
    Changed,
}

/// A pending edit of one node.
#[derive(Debug, Clone)]
pub(crate) struct PendingNode {
    pub(crate) doc: NodeDocument,
    /// Persisted state the edit started from; `None` for new nodes.
    pub(crate) base: Option<NodeDocument>,
    /// Child order must be written explicitly on save.
    pub(crate) reordered: bool,
}

impl PendingNode {
    pub(crate) fn status(&self) -> NodeStatus {
        if self.base.is_some() {
            NodeStatus::Changed
        } else {
            NodeStatus::New
        }
    }
}

/// Saved copy of the mutable overlay state, restored when a save fails.
pub(crate) struct Checkpoint {
    pending: IndexMap<NodeKey, PendingNode>,
}

/// Session-local overlay of one workspace.
pub struct SessionCache {
    workspace: String,
    user: String,
    store: SharedStore,
    registry: Arc<NodeTypeRegistry>,
    root: NodeKey,
    committed: HashMap<NodeKey, NodeDocument>,
    pending: IndexMap<NodeKey, PendingNode>,
    removed: RemovedNodes,
    removed_keys: HashSet<NodeKey>,
    /// Persisted nodes moved into a subtree that was then removed; they are
    /// deleted at their stored location.
    detached: Vec<NodeKey>,
    generation: u64,
}

impl SessionCache {
    pub(crate) fn new(
        workspace: &str,
        user: &str,
        store: SharedStore,
        registry: Arc<NodeTypeRegistry>,
    ) -> Result<Self> {
        let root = {
            let guard = lock_store(&store);
            guard.root_key(workspace).map_err(|e| match e {
                StorageError::WorkspaceNotFound(ws) => RepositoryError::NoSuchWorkspace(ws),
                other => other.into(),
            })?
        };
        Ok(SessionCache {
            workspace: workspace.to_string(),
            user: user.to_string(),
            store,
            registry,
            root,
            committed: HashMap::new(),
            pending: IndexMap::new(),
            removed: RemovedNodes::new(),
            removed_keys: HashSet::new(),
            detached: Vec::new(),
            generation: 0,
        })
    }

    /// A fresh overlay over the same workspace, used for internal edits that
    /// bypass this session's pending state.
    pub(crate) fn spawn(&self) -> SessionCache {
        SessionCache {
            workspace: self.workspace.clone(),
            user: self.user.clone(),
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            root: self.root,
            committed: HashMap::new(),
            pending: IndexMap::new(),
            removed: RemovedNodes::new(),
            removed_keys: HashSet::new(),
            detached: Vec::new(),
            generation: 0,
        }
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn root_key(&self) -> NodeKey {
        self.root
    }

    pub fn registry(&self) -> &Arc<NodeTypeRegistry> {
        &self.registry
    }

    pub(crate) fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Incremented on every save and refresh.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    /// The current state of `key`, loading it from the graph layer on first
    /// access.
    pub fn node(&mut self, key: &NodeKey) -> Result<&NodeDocument> {
        if self.removed_keys.contains(key) {
            return Err(RepositoryError::ItemNotFound(format!(
                "node {} was removed in this session",
                key
            )));
        }
        if self.pending.contains_key(key) {
            return Ok(&self.pending[key].doc);
        }
        if !self.committed.contains_key(key) {
            let doc = {
                let guard = lock_store(&self.store);
                guard.get_node(&self.workspace, key)?
            };
            let doc = doc.ok_or_else(|| {
                RepositoryError::ItemNotFound(format!("node {} in workspace {}", key, self.workspace))
            })?;
            self.committed.insert(*key, doc);
        }
        self.committed
            .get(key)
            .ok_or_else(|| RepositoryError::ItemNotFound(key.to_string()))
    }

    /// True if `key` names a node visible in this session, or one removed in
    /// it but not yet saved.
    pub(crate) fn exists(&mut self, key: &NodeKey) -> Result<bool> {
        if self.removed_keys.contains(key) {
            return Ok(true);
        }
        match self.node(key) {
            Ok(_) => Ok(true),
            Err(RepositoryError::ItemNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// True if `key` names a node visible in this session.
    pub fn is_visible(&mut self, key: &NodeKey) -> Result<bool> {
        match self.node(key) {
            Ok(_) => Ok(true),
            Err(RepositoryError::ItemNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Lifecycle state of property `name` on `key`.
    pub fn property_status(&self, key: &NodeKey, name: &str) -> NodeStatus {
        let Some(entry) = self.pending.get(key) else {
            return NodeStatus::Clean;
        };
        let Some(base) = entry.base.as_ref() else {
            return NodeStatus::New;
        };
        match (base.property(name), entry.doc.property(name)) {
            (None, _) => NodeStatus::New,
            (Some(before), Some(after)) if before == after => NodeStatus::Clean,
            _ => NodeStatus::Changed,
        }
    }

    pub fn status(&self, key: &NodeKey) -> NodeStatus {
        self.pending
            .get(key)
            .map(PendingNode::status)
            .unwrap_or(NodeStatus::Clean)
    }

    pub fn is_new(&self, key: &NodeKey) -> bool {
        self.status(key) == NodeStatus::New
    }

    pub fn is_modified(&self, key: &NodeKey) -> bool {
        self.status(key) == NodeStatus::Changed
    }

    pub fn children(&mut self, key: &NodeKey) -> Result<Vec<ChildRef>> {
        Ok(self.node(key)?.children.clone())
    }

    /// `key` followed by its ancestors up to the root.
    pub fn lineage(&mut self, key: &NodeKey) -> Result<Vec<NodeKey>> {
        let mut out = vec![*key];
        let mut current = self.node(key)?.parent;
        while let Some(parent) = current {
            if out.contains(&parent) {
                return Err(RepositoryError::InvalidItemState(format!(
                    "cycle in the parent chain of {}",
                    key
                )));
            }
            out.push(parent);
            current = self.node(&parent)?.parent;
        }
        Ok(out)
    }

    pub fn path_of(&mut self, key: &NodeKey) -> Result<Path> {
        let mut segments: Vec<Segment> = Vec::new();
        let mut current = *key;
        loop {
            let (parent, name) = {
                let doc = self.node(&current)?;
                (doc.parent, doc.name.clone())
            };
            let Some(parent) = parent else { break };
            let index = self.node(&parent)?.child_index(&current).ok_or_else(|| {
                RepositoryError::InvalidItemState(format!(
                    "{} is not listed as a child of {}",
                    current, parent
                ))
            })?;
            segments.push(Segment::new(name, index));
            if segments.len() > 4096 {
                return Err(RepositoryError::InvalidItemState(format!(
                    "parent chain of {} does not reach the root",
                    key
                )));
            }
            current = parent;
        }
        Ok(segments
            .into_iter()
            .rev()
            .fold(Path::root(), |path, segment| path.child(segment)))
    }

    /// Resolves an absolute path.
    pub fn find_by_path(&mut self, path: &Path) -> Result<NodeKey> {
        if !path.is_absolute() {
            return Err(RepositoryError::InvalidPath(format!(
                "expected an absolute path, got {}",
                path
            )));
        }
        let root = self.root;
        self.resolve(&root, path)
    }

    /// Resolves `path` relative to `from` (absolute paths start at the root).
    pub fn resolve(&mut self, from: &NodeKey, path: &Path) -> Result<NodeKey> {
        let mut current = if path.is_absolute() { self.root } else { *from };
        let not_found = || RepositoryError::PathNotFound(path.to_string());
        for segment in path.segments() {
            if segment.is_self_ref() {
                continue;
            }
            let next = {
                let doc = self.node(&current).map_err(|e| match e {
                    RepositoryError::ItemNotFound(_) => not_found(),
                    other => other,
                })?;
                if segment.is_parent_ref() {
                    doc.parent
                } else {
                    doc.child_by_segment(segment).map(|c| c.key)
                }
            };
            current = next.ok_or_else(not_found)?;
        }
        self.node(&current).map_err(|e| match e {
            RepositoryError::ItemNotFound(_) => not_found(),
            other => other,
        })?;
        Ok(current)
    }

    /// Keys of the subtree rooted at `key`, parents before children.
    pub fn subtree_keys(&mut self, key: &NodeKey) -> Result<Vec<NodeKey>> {
        let mut out = Vec::new();
        let mut stack = vec![*key];
        while let Some(next) = stack.pop() {
            let children = self.children(&next)?;
            out.push(next);
            stack.extend(children.iter().rev().map(|c| c.key));
        }
        Ok(out)
    }

    // -------------------------------------------------------------------
    // Types and definitions
    // -------------------------------------------------------------------

    pub fn primary_type(&mut self, key: &NodeKey) -> Result<Name> {
        self.node(key)?.primary_type().cloned().ok_or_else(|| {
            RepositoryError::InvalidItemState(format!("node {} has no primary type", key))
        })
    }

    pub fn mixin_types(&mut self, key: &NodeKey) -> Result<Vec<Name>> {
        Ok(self.node(key)?.mixin_types())
    }

    pub fn types(&mut self, key: &NodeKey) -> Result<(Name, Vec<Name>)> {
        Ok((self.primary_type(key)?, self.mixin_types(key)?))
    }

    pub fn is_node_type(&mut self, key: &NodeKey, candidate: &str) -> Result<bool> {
        let (primary, mixins) = self.types(key)?;
        Ok(self.registry.is_any(&primary, &mixins, candidate))
    }

    pub fn is_referenceable(&mut self, key: &NodeKey) -> Result<bool> {
        self.is_node_type(key, MIX_REFERENCEABLE)
    }

    /// Definition currently governing `property` on `key`.
    pub fn property_definition(
        &mut self,
        key: &NodeKey,
        property: &PropertyData,
    ) -> Result<Option<PropertyDefinition>> {
        let (primary, mixins) = self.types(key)?;
        Ok(self
            .registry
            .find_property_definition(
                &primary,
                &mixins,
                &property.name,
                &property.values,
                property.multiple,
                false,
            )
            .cloned())
    }

    /// Definition under which `key` sits in its parent; `None` for the root.
    pub fn node_definition(&mut self, key: &NodeKey) -> Result<Option<NodeDefinition>> {
        let (parent, name) = {
            let doc = self.node(key)?;
            (doc.parent, doc.name.clone())
        };
        let Some(parent) = parent else {
            return Ok(None);
        };
        let own_type = self.primary_type(key)?;
        let index = self.node(&parent)?.child_index(key).unwrap_or(1);
        let (primary, mixins) = self.types(&parent)?;
        Ok(self
            .registry
            .find_child_node_definition(
                &primary,
                &mixins,
                &name,
                Some(&own_type),
                index as usize,
                false,
            )
            .cloned())
    }

    /// False if `key` or its nearest versionable ancestor is checked in.
    pub fn is_checked_out(&mut self, key: &NodeKey) -> Result<bool> {
        for k in self.lineage(key)? {
            let flag = self
                .node(&k)?
                .property(JCR_IS_CHECKED_OUT)
                .and_then(PropertyData::first)
                .and_then(Value::as_bool);
            if let Some(flag) = flag {
                return Ok(flag);
            }
        }
        Ok(true)
    }

    // -------------------------------------------------------------------
    // Pending state
    // -------------------------------------------------------------------

    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty() || !self.removed.is_empty() || !self.detached.is_empty()
    }

    /// True if `key` or anything beneath it has unsaved changes.
    pub fn has_pending_changes_at_or_below(&mut self, key: &NodeKey) -> Result<bool> {
        if self.pending.contains_key(key) {
            return Ok(true);
        }
        let path = self.path_of(key)?;
        if self.removed.any_below(&path) {
            return Ok(true);
        }
        let keys: Vec<NodeKey> = self.pending.keys().copied().collect();
        for k in keys {
            if self.lineage(&k)?.contains(key) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Editor enforcing node-type, protection and checked-in rules.
    pub fn editor(&mut self, key: &NodeKey) -> Result<Editor<'_>> {
        self.node(key)?;
        Ok(Editor::new(self, *key, true))
    }

    /// Editor that bypasses protection and checked-in rules, for versioning
    /// and other internal bookkeeping.
    pub(crate) fn internal_editor(&mut self, key: &NodeKey) -> Result<Editor<'_>> {
        self.node(key)?;
        Ok(Editor::new(self, *key, false))
    }

    /// Pending entry for `key`, creating it from the current state.
    pub(crate) fn touch(&mut self, key: &NodeKey) -> Result<&mut PendingNode> {
        if !self.pending.contains_key(key) {
            let doc = self.node(key)?.clone();
            self.pending.insert(
                *key,
                PendingNode {
                    base: Some(doc.clone()),
                    doc,
                    reordered: false,
                },
            );
        }
        self.pending
            .get_mut(key)
            .ok_or_else(|| RepositoryError::ItemNotFound(key.to_string()))
    }

    pub(crate) fn insert_new(&mut self, doc: NodeDocument) {
        self.pending.insert(
            doc.key,
            PendingNode {
                doc,
                base: None,
                reordered: false,
            },
        );
    }

    /// Drops `keys` (a removed subtree) from the overlay. `top` is recorded
    /// in the removed set if it was persisted; `ancestors` is its parent
    /// chain at the time of removal.
    pub(crate) fn forget_subtree(
        &mut self,
        top: &NodeKey,
        top_path: Path,
        ancestors: Vec<NodeKey>,
        keys: &[NodeKey],
    ) {
        for key in keys {
            if let Some(entry) = self.pending.shift_remove(key) {
                let moved_in = key != top
                    && entry
                        .base
                        .as_ref()
                        .map(|base| base.parent != entry.doc.parent || base.name != entry.doc.name)
                        .unwrap_or(false);
                if moved_in {
                    self.detached.push(*key);
                }
            }
            self.committed.remove(key);
            self.removed_keys.insert(*key);
        }
        let top_persisted = self
            .pending
            .get(top)
            .map(|p| p.base.is_some())
            .unwrap_or(true);
        if top_persisted && !self.is_known_new(top) {
            self.removed.record(*top, top_path, ancestors, keys.to_vec());
        }
    }

    fn is_known_new(&self, key: &NodeKey) -> bool {
        self.pending.get(key).map(|p| p.base.is_none()).unwrap_or(false)
    }

    /// Applies externally written properties to the cached copy of `key`
    /// without marking anything as changed.
    pub(crate) fn absorb(&mut self, key: &NodeKey, set: &[PropertyData], removed: &[&str]) {
        if let Some(doc) = self.committed.get_mut(key) {
            apply_properties(doc, set, removed);
        }
        if let Some(entry) = self.pending.get_mut(key) {
            apply_properties(&mut entry.doc, set, removed);
            if let Some(base) = entry.base.as_mut() {
                apply_properties(base, set, removed);
            }
        }
    }

    // -------------------------------------------------------------------
    // Refresh
    // -------------------------------------------------------------------

    /// Discards cached persisted state. With `keep_changes` the pending edits
    /// survive; otherwise they are dropped as well.
    pub fn refresh(&mut self, keep_changes: bool) {
        self.committed.clear();
        if !keep_changes {
            self.pending.clear();
            self.removed.clear();
            self.removed_keys.clear();
            self.detached.clear();
        }
        self.generation += 1;
        tracing::debug!(
            workspace = %self.workspace,
            keep_changes,
            generation = self.generation,
            "session cache refreshed"
        );
    }

    /// Reverts `key` to its persisted state: properties, mixins and child
    /// order. Children created under it are dropped with their subtrees and
    /// children removed from it come back. A node that was moved, or that
    /// gained or lost a child through a move, needs a session-wide refresh.
    pub fn refresh_node(&mut self, key: &NodeKey) -> Result<()> {
        self.committed.remove(key);
        let Some(entry) = self.pending.get(key) else {
            return Ok(());
        };
        let Some(base) = entry.base.clone() else {
            return Err(RepositoryError::InvalidItemState(format!(
                "node {} has never been saved",
                key
            )));
        };
        let current = &entry.doc;
        let moved = || {
            RepositoryError::InvalidItemState(format!(
                "node {} was moved or has moved children; refresh the session instead",
                key
            ))
        };
        if base.parent != current.parent || base.name != current.name {
            return Err(moved());
        }
        let renamed = current
            .children
            .iter()
            .any(|c| base.children.iter().any(|b| b.key == c.key && b.name != c.name));
        if renamed {
            return Err(moved());
        }

        let mut dropped = Vec::new();
        for child in current.children.iter().filter(|c| base.child_index(&c.key).is_none()) {
            dropped.extend(self.new_subtree(&child.key).ok_or_else(moved)?);
        }
        let mut restored = Vec::new();
        for child in base.children.iter().filter(|c| current.child_index(&c.key).is_none()) {
            match self.removed.subtree(&child.key) {
                Some(keys) if !keys.iter().any(|k| self.detached.contains(k)) => {
                    restored.push(child.key)
                }
                _ => return Err(moved()),
            }
        }

        for k in &dropped {
            self.pending.shift_remove(k);
        }
        for child in restored {
            for k in self.removed.take(&child).unwrap_or_default() {
                self.removed_keys.remove(&k);
                self.committed.remove(&k);
            }
        }
        self.pending.shift_remove(key);
        self.committed.insert(*key, base);
        tracing::debug!(
            workspace = %self.workspace,
            node = %key,
            dropped = dropped.len(),
            "node refreshed"
        );
        Ok(())
    }

    /// Keys of the never-saved subtree rooted at `top`; `None` if it holds a
    /// persisted node.
    fn new_subtree(&self, top: &NodeKey) -> Option<Vec<NodeKey>> {
        let mut out = Vec::new();
        let mut stack = vec![*top];
        while let Some(next) = stack.pop() {
            let entry = self.pending.get(&next).filter(|e| e.base.is_none())?;
            stack.extend(entry.doc.children.iter().map(|c| c.key));
            out.push(next);
        }
        Some(out)
    }

    // -------------------------------------------------------------------
    // Save pipeline
    // -------------------------------------------------------------------

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pending: self.pending.clone(),
        }
    }

    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        self.pending = checkpoint.pending;
    }

    /// Stamps `mix:created` and `mix:lastModified` properties on pending nodes.
    pub(crate) fn apply_auto_properties(&mut self, now: i64) {
        let registry = Arc::clone(&self.registry);
        let user = self.user.clone();
        for entry in self.pending.values_mut() {
            let Some(primary) = entry.doc.primary_type().cloned() else {
                continue;
            };
            let mixins = entry.doc.mixin_types();
            if entry.base.is_none() && registry.is_any(&primary, &mixins, MIX_CREATED) {
                if entry.doc.property(JCR_CREATED).is_none() {
                    set_prop(&mut entry.doc, PropertyData::single(JCR_CREATED, Value::Date(now)));
                }
                if entry.doc.property(JCR_CREATED_BY).is_none() {
                    set_prop(
                        &mut entry.doc,
                        PropertyData::single(JCR_CREATED_BY, Value::String(user.clone())),
                    );
                }
            }
            if registry.is_any(&primary, &mixins, MIX_LAST_MODIFIED) {
                set_prop(
                    &mut entry.doc,
                    PropertyData::single(JCR_LAST_MODIFIED, Value::Date(now)),
                );
                set_prop(
                    &mut entry.doc,
                    PropertyData::single(JCR_LAST_MODIFIED_BY, Value::String(user.clone())),
                );
            }
        }
    }

    /// Pending versionable nodes that have no version history yet.
    pub(crate) fn versionables_without_history(&self) -> Vec<NodeKey> {
        self.pending
            .values()
            .filter(|entry| entry.doc.property(JCR_VERSION_HISTORY).is_none())
            .filter(|entry| match entry.doc.primary_type() {
                Some(primary) => {
                    self.registry
                        .is_any(primary, &entry.doc.mixin_types(), MIX_VERSIONABLE)
                }
                None => false,
            })
            .map(|entry| entry.doc.key)
            .collect()
    }

    /// Links a pending versionable node to its history and base version.
    pub(crate) fn assign_history(
        &mut self,
        key: &NodeKey,
        history: NodeKey,
        base_version: NodeKey,
    ) -> Result<()> {
        let entry = self.touch(key)?;
        set_prop(
            &mut entry.doc,
            PropertyData::single(JCR_VERSION_HISTORY, Value::Reference(history)),
        );
        set_prop(
            &mut entry.doc,
            PropertyData::single(JCR_BASE_VERSION, Value::Reference(base_version)),
        );
        set_prop(
            &mut entry.doc,
            PropertyData::multi(
                JCR_PREDECESSORS,
                PropertyType::Reference,
                vec![Value::Reference(base_version)],
            ),
        );
        if entry.doc.property(JCR_IS_CHECKED_OUT).is_none() {
            set_prop(
                &mut entry.doc,
                PropertyData::single(JCR_IS_CHECKED_OUT, Value::Boolean(true)),
            );
        }
        Ok(())
    }

    /// Every pending node must carry its mandatory properties and children.
    pub(crate) fn validate_mandatory(&self) -> Result<()> {
        for entry in self.pending.values() {
            let doc = &entry.doc;
            let Some(primary) = doc.primary_type() else {
                return Err(RepositoryError::ConstraintViolation(format!(
                    "node {} has no primary type",
                    doc.key
                )));
            };
            let mixins = doc.mixin_types();
            for def in self.registry.property_definitions(primary, &mixins) {
                if def.mandatory && !def.is_residual() && doc.property(def.name.as_str()).is_none() {
                    return Err(RepositoryError::ConstraintViolation(format!(
                        "node {} ({}) is missing mandatory property {}",
                        doc.key, doc.name, def.name
                    )));
                }
            }
            for def in self.registry.child_node_definitions(primary, &mixins) {
                if def.mandatory && !def.is_residual() && !doc.children.iter().any(|c| c.name == def.name) {
                    return Err(RepositoryError::ConstraintViolation(format!(
                        "node {} ({}) is missing mandatory child {}",
                        doc.key, doc.name, def.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fails if any surviving node still holds a strong reference to a node
    /// removed in this session.
    pub(crate) fn check_referential_integrity(&self) -> Result<()> {
        if self.removed_keys.is_empty() {
            return Ok(());
        }
        let targets: BTreeSet<NodeKey> = self.removed_keys.iter().copied().collect();
        for entry in self.pending.values() {
            for property in entry.doc.properties.values() {
                if let Some(target) = property.strong_references().find(|k| targets.contains(k)) {
                    return Err(RepositoryError::ReferentialIntegrity {
                        target,
                        referrer: entry.doc.key,
                        property: property.name.to_string(),
                    });
                }
            }
        }
        let rows = {
            let guard = lock_store(&self.store);
            guard.query(
                &self.workspace,
                &Query::referrers_of(targets.iter().copied()).strong_only().build(),
            )?
        };
        for row in rows {
            if self.removed_keys.contains(&row.node) {
                continue;
            }
            let (Some(target), Some(property)) = (row.target, row.property) else {
                continue;
            };
            if let Some(entry) = self.pending.get(&row.node) {
                let still_referenced = entry
                    .doc
                    .property(property.as_str())
                    .map(|p| p.strong_references().any(|k| k == target))
                    .unwrap_or(false);
                if !still_referenced {
                    continue;
                }
            }
            return Err(RepositoryError::ReferentialIntegrity {
                target,
                referrer: row.node,
                property: property.to_string(),
            });
        }
        Ok(())
    }

    /// Builds the batch writing all pending changes.
    pub(crate) fn build_batch(&mut self) -> Result<Batch> {
        let mut batch = Batch::new();

        // Creates: each new subtree top-down in child order.
        let new_tops: Vec<NodeKey> = self
            .pending
            .values()
            .filter(|e| e.base.is_none())
            .filter(|e| !e.doc.parent.map(|p| self.is_known_new(&p)).unwrap_or(false))
            .map(|e| e.doc.key)
            .collect();
        for top in new_tops {
            let mut stack = vec![top];
            while let Some(key) = stack.pop() {
                let Some(entry) = self.pending.get(&key) else {
                    continue;
                };
                let doc = &entry.doc;
                let parent = doc.parent.ok_or_else(|| {
                    RepositoryError::InvalidItemState(format!("new node {} has no parent", key))
                })?;
                batch.create_node(
                    key,
                    parent,
                    doc.name.clone(),
                    doc.properties.values().cloned().collect(),
                );
                stack.extend(
                    doc.children
                        .iter()
                        .rev()
                        .filter(|c| self.is_known_new(&c.key))
                        .map(|c| c.key),
                );
            }
        }

        // Moves, shallowest destination first.
        let mut moves: Vec<(usize, NodeKey, NodeKey, Name)> = Vec::new();
        let moved: Vec<(NodeKey, Option<NodeKey>, Name)> = self
            .pending
            .values()
            .filter(|e| {
                e.base
                    .as_ref()
                    .map(|b| b.parent != e.doc.parent || b.name != e.doc.name)
                    .unwrap_or(false)
            })
            .map(|e| (e.doc.key, e.doc.parent, e.doc.name.clone()))
            .collect();
        for (key, parent, name) in moved {
            let parent = parent.ok_or_else(|| {
                RepositoryError::ConstraintViolation("the root node cannot be moved".to_string())
            })?;
            let depth = self.lineage(&key)?.len();
            moves.push((depth, key, parent, name));
        }
        moves.sort_by_key(|(depth, ..)| *depth);
        for (_, key, parent, name) in moves {
            batch.move_node(key, parent, name);
        }

        // Removes.
        for key in &self.detached {
            batch.remove_node(*key);
        }
        for key in self.removed.keys() {
            batch.remove_node(key);
        }

        // Property writes on persisted nodes.
        for entry in self.pending.values() {
            let Some(base) = entry.base.as_ref() else {
                continue;
            };
            let set: Vec<PropertyData> = entry
                .doc
                .properties
                .values()
                .filter(|p| base.properties.get(&p.name) != Some(*p))
                .cloned()
                .collect();
            let gone: Vec<Name> = base
                .properties
                .keys()
                .filter(|n| !entry.doc.properties.contains_key(*n))
                .cloned()
                .collect();
            if !set.is_empty() {
                batch.set_properties(entry.doc.key, set);
            }
            if !gone.is_empty() {
                batch.remove_properties(entry.doc.key, gone);
            }
        }

        // Explicit child orders.
        for entry in self.pending.values().filter(|e| e.reordered) {
            batch.set_child_order(
                entry.doc.key,
                entry.doc.children.iter().map(|c| c.key).collect(),
            );
        }

        Ok(batch)
    }

    /// Moves pending state into the committed cache after a successful write.
    pub(crate) fn finish_save(&mut self, outcome: Option<&BatchOutcome>) {
        let remap = |key: NodeKey| {
            outcome
                .and_then(|o| o.assigned.get(&key).copied())
                .unwrap_or(key)
        };
        for (_, entry) in self.pending.drain(..) {
            let mut doc = entry.doc;
            doc.key = remap(doc.key);
            doc.parent = doc.parent.map(remap);
            for child in &mut doc.children {
                child.key = remap(child.key);
            }
            self.committed.insert(doc.key, doc);
        }
        for key in self.removed_keys.drain() {
            self.committed.remove(&key);
        }
        self.removed.clear();
        self.detached.clear();
        self.generation += 1;
    }
}

fn set_prop(doc: &mut NodeDocument, property: PropertyData) {
    doc.properties.insert(property.name.clone(), property);
}

fn apply_properties(doc: &mut NodeDocument, set: &[PropertyData], removed: &[&str]) {
    for property in set {
        set_prop(doc, property.clone());
    }
    for name in removed {
        doc.properties.shift_remove(*name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::lexicon::{ARBOR_ROOT, JCR_PRIMARY_TYPE, JCR_UUID, NT_UNSTRUCTURED};
    use arbor_storage::{GraphStore, InMemoryStore, Operation};
    use std::sync::Mutex;

    fn cache() -> SessionCache {
        let mut store = InMemoryStore::new();
        let root = NodeKey::new();
        store
            .create_workspace(
                "default",
                root,
                vec![
                    PropertyData::single(JCR_PRIMARY_TYPE, Value::Name(Name::from(ARBOR_ROOT))),
                    PropertyData::single(JCR_UUID, Value::String(root.to_string())),
                ],
            )
            .unwrap();
        let shared: SharedStore = Arc::new(Mutex::new(Box::new(store)));
        SessionCache::new(
            "default",
            "tester",
            shared,
            Arc::new(NodeTypeRegistry::with_builtins()),
        )
        .unwrap()
    }

    fn add(cache: &mut SessionCache, parent: &NodeKey, name: &str) -> NodeKey {
        cache
            .editor(parent)
            .unwrap()
            .create_child(Name::from(name), None, None)
            .unwrap()
    }

    fn save(cache: &mut SessionCache) {
        let batch = cache.build_batch().unwrap();
        let outcome = {
            let mut guard = lock_store(cache.store());
            guard.execute("default", batch).unwrap()
        };
        cache.finish_save(Some(&outcome));
    }

    #[test]
    fn test_new_nodes_resolve_before_save() {
        let mut cache = cache();
        let root = cache.root_key();
        let a = add(&mut cache, &root, "a");
        let b = add(&mut cache, &a, "b");
        assert!(cache.is_new(&b));
        let path = Path::parse("/a/b").unwrap();
        assert_eq!(cache.find_by_path(&path).unwrap(), b);
        assert_eq!(cache.path_of(&b).unwrap(), path);
        assert!(cache.has_pending_changes());
    }

    #[test]
    fn test_creates_are_emitted_parents_first() {
        let mut cache = cache();
        let root = cache.root_key();
        let a = add(&mut cache, &root, "a");
        let b = add(&mut cache, &a, "b");
        let c = add(&mut cache, &b, "c");
        let batch = cache.build_batch().unwrap();
        let created: Vec<NodeKey> = batch
            .operations()
            .iter()
            .filter_map(|op| match op {
                Operation::CreateNode { key, .. } => Some(*key),
                _ => None,
            })
            .collect();
        assert_eq!(created, vec![a, b, c]);
    }

    #[test]
    fn test_save_moves_pending_to_clean() {
        let mut cache = cache();
        let root = cache.root_key();
        let a = add(&mut cache, &root, "a");
        let generation = cache.generation();
        save(&mut cache);
        assert_eq!(cache.status(&a), NodeStatus::Clean);
        assert!(!cache.has_pending_changes());
        assert!(cache.generation() > generation);

        cache.refresh(false);
        assert_eq!(
            cache.primary_type(&a).unwrap(),
            Name::from(NT_UNSTRUCTURED)
        );
    }

    #[test]
    fn test_refresh_without_keep_discards_edits() {
        let mut cache = cache();
        let root = cache.root_key();
        let a = add(&mut cache, &root, "a");
        cache.refresh(false);
        assert!(!cache.has_pending_changes());
        assert!(cache.node(&a).is_err());
        assert!(cache.children(&root).unwrap().is_empty());
    }

    #[test]
    fn test_refresh_with_keep_preserves_edits() {
        let mut cache = cache();
        let root = cache.root_key();
        let a = add(&mut cache, &root, "a");
        cache.refresh(true);
        assert!(cache.is_new(&a));
        assert_eq!(cache.children(&root).unwrap().len(), 1);
    }

    #[test]
    fn test_removed_nodes_are_not_rediscovered() {
        let mut cache = cache();
        let root = cache.root_key();
        let a = add(&mut cache, &root, "a");
        let b = add(&mut cache, &a, "b");
        save(&mut cache);

        assert!(cache.editor(&root).unwrap().destroy_child(&a).unwrap());
        assert!(matches!(cache.node(&b), Err(RepositoryError::ItemNotFound(_))));
        assert!(matches!(
            cache.find_by_path(&Path::parse("/a/b").unwrap()),
            Err(RepositoryError::PathNotFound(_))
        ));
        save(&mut cache);
        let guard = lock_store(cache.store());
        assert!(guard.get_node("default", &b).unwrap().is_none());
    }

    #[test]
    fn test_pending_changes_below_node() {
        let mut cache = cache();
        let root = cache.root_key();
        let a = add(&mut cache, &root, "a");
        let b = add(&mut cache, &a, "b");
        let other = add(&mut cache, &root, "other");
        save(&mut cache);

        cache
            .editor(&b)
            .unwrap()
            .set_property(Name::from("x"), vec![Value::Long(1)], None, false)
            .unwrap();
        assert!(cache.has_pending_changes_at_or_below(&a).unwrap());
        assert!(!cache.has_pending_changes_at_or_below(&other).unwrap());
    }

    #[test]
    fn test_swap_parent_and_child_moves_in_depth_order() {
        let mut cache = cache();
        let root = cache.root_key();
        let x = add(&mut cache, &root, "x");
        let y = add(&mut cache, &x, "y");
        save(&mut cache);

        cache.editor(&root).unwrap().move_to_be_child(&y, None).unwrap();
        cache.editor(&y).unwrap().move_to_be_child(&x, None).unwrap();
        save(&mut cache);
        cache.refresh(false);
        assert_eq!(cache.path_of(&x).unwrap(), Path::parse("/y/x").unwrap());
    }

    #[test]
    fn test_auto_properties_stamp_created() {
        let mut cache = cache();
        let root = cache.root_key();
        let folder = cache
            .editor(&root)
            .unwrap()
            .create_child(Name::from("docs"), None, Some(Name::from("nt:folder")))
            .unwrap();
        cache.apply_auto_properties(42);
        let doc = cache.node(&folder).unwrap();
        assert_eq!(doc.property(JCR_CREATED).and_then(PropertyData::first), Some(&Value::Date(42)));
        assert_eq!(
            doc.property(JCR_CREATED_BY).and_then(PropertyData::first),
            Some(&Value::String("tester".to_string()))
        );
    }
}
