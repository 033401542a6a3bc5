//! Merging a subtree from another workspace.
//!
//! Nodes are paired by identifier, falling back to their correspondence
//! (nearest referenceable ancestor plus relative path). Versionable pairs
//! are compared by base version: a newer source updates the target, an
//! older or equal source leaves it alone, and anything else is a conflict
//! recorded in `jcr:mergeFailed` (or an error outside best-effort mode).

use arbor_core::lexicon::{
    JCR_BASE_VERSION, JCR_IS_CHECKED_OUT, JCR_LOCK_IS_DEEP, JCR_LOCK_OWNER, JCR_MERGE_FAILED,
    JCR_PRIMARY_TYPE, JCR_UUID, JCR_VERSION_HISTORY, MIX_VERSIONABLE,
};
use arbor_core::{NodeKey, PropertyData, PropertyType, Value};

use crate::error::{RepositoryError, Result};
use crate::repository::lock_store;
use crate::session::cache::SessionCache;
use crate::version::storage::load_history;

/// Properties of the target that survive an update from the source.
const TARGET_OWNED: &[&str] = &[JCR_UUID, JCR_MERGE_FAILED, JCR_LOCK_OWNER, JCR_LOCK_IS_DEEP];

fn reference(cache: &mut SessionCache, key: &NodeKey, name: &str) -> Result<Option<NodeKey>> {
    Ok(cache
        .node(key)?
        .property(name)
        .and_then(PropertyData::first)
        .and_then(Value::as_key))
}

fn own_checked_out(cache: &mut SessionCache, key: &NodeKey) -> Result<bool> {
    Ok(cache
        .node(key)?
        .property(JCR_IS_CHECKED_OUT)
        .and_then(PropertyData::first)
        .and_then(Value::as_bool)
        .unwrap_or(true))
}

pub(crate) struct Merger<'a> {
    target: &'a mut SessionCache,
    source: SessionCache,
    best_effort: bool,
    shallow: bool,
    failed: Vec<NodeKey>,
}

impl<'a> Merger<'a> {
    pub(crate) fn new(
        target: &'a mut SessionCache,
        source: SessionCache,
        best_effort: bool,
        shallow: bool,
    ) -> Self {
        Merger {
            target,
            source,
            best_effort,
            shallow,
            failed: Vec::new(),
        }
    }

    /// Merges the subtree at `key`. Returns the nodes whose merge failed.
    pub(crate) fn run(mut self, key: NodeKey) -> Result<Vec<NodeKey>> {
        self.merge(key)?;
        Ok(self.failed)
    }

    /// The source node corresponding to target node `key`.
    fn corresponding(&mut self, key: &NodeKey) -> Result<Option<NodeKey>> {
        if self.source.is_visible(key)? {
            return Ok(Some(*key));
        }
        let mut anchor = None;
        for candidate in self.target.lineage(key)? {
            if self.target.is_referenceable(&candidate)? {
                anchor = Some(candidate);
                break;
            }
        }
        let Some(anchor) = anchor else {
            return Ok(None);
        };
        // Workspace roots correspond to each other.
        let source_anchor = if anchor == self.target.root_key() {
            self.source.root_key()
        } else if self.source.is_visible(&anchor)? {
            anchor
        } else {
            return Ok(None);
        };
        let path = self.target.path_of(key)?;
        let anchor_path = self.target.path_of(&anchor)?;
        let Some(relative) = path.relative_to(&anchor_path) else {
            return Ok(None);
        };
        match self.source.resolve(&source_anchor, &relative) {
            Ok(found) => Ok(Some(found)),
            Err(RepositoryError::PathNotFound(_)) | Err(RepositoryError::ItemNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn merge(&mut self, key: NodeKey) -> Result<()> {
        let Some(source) = self.corresponding(&key)? else {
            return self.merge_children(key, false);
        };
        let target_versionable = self.target.is_node_type(&key, MIX_VERSIONABLE)?;
        let source_versionable = self.source.is_node_type(&source, MIX_VERSIONABLE)?;
        if !target_versionable {
            return self.update(key, source);
        }
        if !source_versionable {
            return self.merge_children(key, false);
        }

        let (Some(target_base), Some(source_base), Some(history)) = (
            reference(self.target, &key, JCR_BASE_VERSION)?,
            reference(&mut self.source, &source, JCR_BASE_VERSION)?,
            reference(self.target, &key, JCR_VERSION_HISTORY)?,
        ) else {
            return self.merge_children(key, false);
        };
        let history = {
            let guard = lock_store(self.target.store());
            load_history(&**guard, &history)?
        };
        if target_base == source_base || history.is_successor_of(&target_base, &source_base) {
            return self.merge_children(key, false);
        }
        if history.is_successor_of(&source_base, &target_base) && !own_checked_out(self.target, &key)? {
            return self.update(key, source);
        }

        if !self.best_effort {
            return Err(RepositoryError::Merge(format!(
                "{} has diverged from its counterpart in workspace {}",
                self.target.path_of(&key)?,
                self.source.workspace()
            )));
        }
        let mut failed = self
            .target
            .node(&key)?
            .property(JCR_MERGE_FAILED)
            .map(PropertyData::keys)
            .unwrap_or_default();
        if !failed.contains(&source_base) {
            failed.push(source_base);
        }
        self.target.internal_editor(&key)?.put_property(PropertyData::multi(
            JCR_MERGE_FAILED,
            PropertyType::Reference,
            failed.into_iter().map(Value::Reference).collect(),
        ))?;
        tracing::warn!(node = %key, "merge conflict recorded");
        self.failed.push(key);
        self.merge_children(key, true)
    }

    fn merge_children(&mut self, key: NodeKey, versionable_only: bool) -> Result<()> {
        if self.shallow {
            return Ok(());
        }
        for child in self.target.children(&key)? {
            if versionable_only && !self.target.is_node_type(&child.key, MIX_VERSIONABLE)? {
                continue;
            }
            self.merge(child.key)?;
        }
        Ok(())
    }

    /// Makes target node `key` a copy of source node `source`: properties
    /// are replaced, missing children copied, surplus children removed and
    /// common children merged in turn.
    fn update(&mut self, key: NodeKey, source: NodeKey) -> Result<()> {
        let source_doc = self.source.node(&source)?.clone();
        let target_doc = self.target.node(&key)?.clone();

        let mut properties: Vec<PropertyData> = source_doc
            .properties
            .values()
            .filter(|p| p.name.as_str() != JCR_PRIMARY_TYPE && !TARGET_OWNED.contains(&p.name.as_str()))
            .cloned()
            .collect();
        properties.extend(
            target_doc
                .properties
                .values()
                .filter(|p| TARGET_OWNED.contains(&p.name.as_str()))
                .cloned(),
        );
        let mut editor = self.target.internal_editor(&key)?;
        editor.replace_properties(properties)?;
        if let Some(primary) = source_doc.property(JCR_PRIMARY_TYPE) {
            editor.put_property(primary.clone())?;
        }

        for child in &target_doc.children {
            if !source_doc.children.iter().any(|c| c.key == child.key) {
                self.target.internal_editor(&key)?.destroy_child(&child.key)?;
            }
        }

        let mut order = Vec::with_capacity(source_doc.children.len());
        for child in &source_doc.children {
            let present = match self.target.node(&child.key) {
                Ok(doc) => Some(doc.parent),
                Err(RepositoryError::ItemNotFound(_)) => None,
                Err(e) => return Err(e),
            };
            match present {
                Some(parent) => {
                    if parent != Some(key) {
                        self.target
                            .internal_editor(&key)?
                            .move_to_be_child(&child.key, Some(child.name.clone()))?;
                    }
                    if !self.shallow {
                        self.merge(child.key)?;
                    }
                }
                None => self.copy(key, child.key)?,
            }
            order.push(child.key);
        }
        self.target.internal_editor(&key)?.set_child_order(&order)
    }

    /// Copies source node `source` and its subtree under target `parent`.
    fn copy(&mut self, parent: NodeKey, source: NodeKey) -> Result<()> {
        let doc = self.source.node(&source)?.clone();
        let primary = doc.primary_type().cloned();
        self.target
            .internal_editor(&parent)?
            .create_child(doc.name.clone(), Some(source), primary)?;
        let properties = doc
            .properties
            .values()
            .filter(|p| p.name.as_str() != JCR_PRIMARY_TYPE)
            .cloned()
            .collect();
        self.target
            .internal_editor(&source)?
            .replace_properties(properties)?;
        for child in &doc.children {
            self.copy(source, child.key)?;
        }
        Ok(())
    }
}
