//! Rebuilding live nodes from frozen snapshots.
//!
//! A [`Restorer`] works on a private overlay of the workspace. Properties are
//! replaced from the snapshot except those whose definition declares
//! `IGNORE` or `COMPUTE`; children are matched by identifier, recreated,
//! moved into place or destroyed according to their `OnParentVersion`
//! action. The caller saves the overlay in one batch.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use arbor_core::lexicon::{
    JCR_BASE_VERSION, JCR_IS_CHECKED_OUT, JCR_MIXIN_TYPES, JCR_PREDECESSORS, JCR_PRIMARY_TYPE,
    JCR_UUID, JCR_VERSION_HISTORY,
};
use arbor_core::nodetype::OnParentVersion;
use arbor_core::{Name, NodeKey, PropertyData, PropertyType, Value};

use crate::error::{RepositoryError, Result};
use crate::repository::lock_store;
use crate::session::cache::SessionCache;
use crate::version::frozen::{load_frozen, FrozenNode, VersionedItem};
use crate::version::history::{VersionHistory, VersionRecord};
use crate::version::storage::load_history;

pub(crate) struct Restorer<'a> {
    cache: &'a mut SessionCache,
    remove_existing: bool,
    /// Versions restored together, keyed by history.
    restoring: HashMap<NodeKey, VersionRecord>,
    /// Label preferred when choosing versions of versioned children.
    label: Option<String>,
    /// Roots of the subtrees restored so far.
    scope: HashSet<NodeKey>,
    /// Creation time of the version being restored at the top level.
    reference_time: i64,
}

impl<'a> Restorer<'a> {
    pub(crate) fn new(cache: &'a mut SessionCache, remove_existing: bool) -> Self {
        Restorer {
            cache,
            remove_existing,
            restoring: HashMap::new(),
            label: None,
            scope: HashSet::new(),
            reference_time: i64::MAX,
        }
    }

    pub(crate) fn with_versions(mut self, versions: &[VersionRecord]) -> Self {
        self.restoring = versions.iter().map(|v| (v.history, v.clone())).collect();
        self
    }

    pub(crate) fn with_label(mut self, label: Option<&str>) -> Self {
        self.label = label.map(str::to_string);
        self
    }

    /// Restores `version` onto the existing node `target`.
    pub(crate) fn restore_existing(&mut self, target: NodeKey, version: &VersionRecord) -> Result<()> {
        self.reference_time = version.created;
        self.restore_onto(target, version)
    }

    /// Restores `version` as child `name` of `parent`, creating the node
    /// under its frozen identifier. Returns that identifier.
    pub(crate) fn restore_missing(
        &mut self,
        parent: NodeKey,
        name: Name,
        version: &VersionRecord,
    ) -> Result<NodeKey> {
        self.reference_time = version.created;
        self.restore_as_child(parent, name, version)
    }

    fn frozen(&self, version: &VersionRecord) -> Result<FrozenNode> {
        let frozen = version.frozen.ok_or_else(|| {
            RepositoryError::Version(format!("version {} has no frozen node", version.name))
        })?;
        let guard = lock_store(self.cache.store());
        load_frozen(&**guard, &frozen)
    }

    fn history(&self, key: &NodeKey) -> Result<VersionHistory> {
        let guard = lock_store(self.cache.store());
        load_history(&**guard, key)
    }

    fn restore_onto(&mut self, target: NodeKey, version: &VersionRecord) -> Result<()> {
        let history = self
            .cache
            .node(&target)?
            .property(JCR_VERSION_HISTORY)
            .and_then(PropertyData::first)
            .and_then(Value::as_key);
        if history != Some(version.history) {
            return Err(RepositoryError::Version(format!(
                "node {} does not share the history of version {}",
                self.cache.path_of(&target)?,
                version.name
            )));
        }
        self.scope.insert(target);
        let frozen = self.frozen(version)?;
        self.apply(target, &frozen)?;
        self.mark_restored(target, version)
    }

    fn restore_as_child(&mut self, parent: NodeKey, name: Name, version: &VersionRecord) -> Result<NodeKey> {
        let frozen = self.frozen(version)?;
        let key = frozen.frozen_uuid;
        if self.cache.is_visible(&key)? {
            self.relocate(key, parent, name)?;
        } else {
            let mut editor = self.cache.internal_editor(&parent)?;
            editor.create_child(name, Some(key), Some(frozen.primary_type.clone()))?;
            self.cache.internal_editor(&key)?.put_property(PropertyData::single(
                JCR_VERSION_HISTORY,
                Value::Reference(version.history),
            ))?;
        }
        self.restore_onto(key, version)?;
        Ok(key)
    }

    /// Moves an existing node to `parent`. Nodes outside the restored
    /// subtrees move only when removing existing nodes is allowed.
    fn relocate(&mut self, key: NodeKey, parent: NodeKey, name: Name) -> Result<()> {
        let current_parent = self.cache.node(&key)?.parent;
        if current_parent == Some(parent) {
            return Ok(());
        }
        let inside = self
            .cache
            .lineage(&key)?
            .iter()
            .any(|k| self.scope.contains(k));
        if !inside && !self.remove_existing {
            return Err(RepositoryError::ItemExists(format!(
                "node {} already exists at {}",
                key,
                self.cache.path_of(&key)?
            )));
        }
        self.cache
            .internal_editor(&parent)?
            .move_to_be_child(&key, Some(name))
    }

    fn mark_restored(&mut self, key: NodeKey, version: &VersionRecord) -> Result<()> {
        let mut editor = self.cache.internal_editor(&key)?;
        editor.put_property(PropertyData::single(JCR_IS_CHECKED_OUT, Value::Boolean(false)))?;
        editor.put_property(PropertyData::single(
            JCR_BASE_VERSION,
            Value::Reference(version.key),
        ))?;
        editor.put_property(PropertyData::multi(
            JCR_PREDECESSORS,
            PropertyType::Reference,
            Vec::new(),
        ))?;
        editor.put_property(PropertyData::single(
            JCR_VERSION_HISTORY,
            Value::Reference(version.history),
        ))
    }

    fn opv_of_property(&mut self, key: &NodeKey, property: &PropertyData) -> Result<OnParentVersion> {
        Ok(self
            .cache
            .property_definition(key, property)?
            .map(|d| d.on_parent_version)
            .unwrap_or(OnParentVersion::Copy))
    }

    fn opv_of_node(&mut self, key: &NodeKey) -> Result<OnParentVersion> {
        Ok(self
            .cache
            .node_definition(key)?
            .map(|d| d.on_parent_version)
            .unwrap_or(OnParentVersion::Copy))
    }

    fn apply(&mut self, live: NodeKey, frozen: &FrozenNode) -> Result<()> {
        let current = self.cache.node(&live)?.clone();

        let mut properties: IndexMap<Name, PropertyData> = IndexMap::new();
        for property in current.properties.values() {
            match property.name.as_str() {
                JCR_PRIMARY_TYPE | JCR_MIXIN_TYPES => continue,
                JCR_UUID => {
                    properties.insert(property.name.clone(), property.clone());
                    continue;
                }
                _ => {}
            }
            if matches!(
                self.opv_of_property(&live, property)?,
                OnParentVersion::Ignore | OnParentVersion::Compute
            ) {
                properties.insert(property.name.clone(), property.clone());
            }
        }
        for property in &frozen.properties {
            properties.insert(property.name.clone(), property.clone());
        }
        if !frozen.mixin_types.is_empty() {
            properties.insert(
                Name::from(JCR_MIXIN_TYPES),
                PropertyData::multi(
                    JCR_MIXIN_TYPES,
                    PropertyType::Name,
                    frozen.mixin_types.iter().cloned().map(Value::Name).collect(),
                ),
            );
        }
        let mut editor = self.cache.internal_editor(&live)?;
        editor.replace_properties(properties.into_values().collect())?;
        editor.put_property(PropertyData::single(
            JCR_PRIMARY_TYPE,
            Value::Name(frozen.primary_type.clone()),
        ))?;
        if self.cache.is_referenceable(&live)? && self.cache.node(&live)?.property(JCR_UUID).is_none() {
            self.cache
                .internal_editor(&live)?
                .put_property(PropertyData::single(JCR_UUID, Value::String(live.to_string())))?;
        }

        let mut wanted: HashSet<NodeKey> = HashSet::new();
        let mut histories: HashMap<NodeKey, VersionHistory> = HashMap::new();
        for item in &frozen.children {
            match item {
                VersionedItem::Frozen(child) => {
                    wanted.insert(child.frozen_uuid);
                }
                VersionedItem::VersionedChild { history, .. } => {
                    let loaded = self.history(history)?;
                    wanted.insert(loaded.versionable);
                    histories.insert(*history, loaded);
                }
            }
        }

        // Children that exist only in the live tree.
        for child in &current.children {
            if wanted.contains(&child.key) {
                continue;
            }
            if matches!(
                self.opv_of_node(&child.key)?,
                OnParentVersion::Copy | OnParentVersion::Version
            ) {
                self.cache.internal_editor(&live)?.destroy_child(&child.key)?;
            }
        }

        let mut order = Vec::with_capacity(frozen.children.len());
        for item in &frozen.children {
            match item {
                VersionedItem::Frozen(child) => {
                    let key = child.frozen_uuid;
                    if self.cache.is_visible(&key)? {
                        self.relocate(key, live, child.name.clone())?;
                    } else {
                        self.cache.internal_editor(&live)?.create_child(
                            child.name.clone(),
                            Some(key),
                            Some(child.primary_type.clone()),
                        )?;
                    }
                    self.apply(key, child)?;
                    order.push(key);
                }
                VersionedItem::VersionedChild { name, history } => {
                    let Some(loaded) = histories.get(history) else {
                        continue;
                    };
                    let key = loaded.versionable;
                    if let Some(version) = self.restoring.get(history).cloned() {
                        if self.cache.node(&live)?.children.iter().any(|c| c.key == key) {
                            self.restore_onto(key, &version)?;
                        } else {
                            self.restore_as_child(live, name.clone(), &version)?;
                        }
                        order.push(key);
                    } else if self.cache.is_visible(&key)? {
                        self.relocate(key, live, name.clone())?;
                        order.push(key);
                    } else {
                        let chosen = self
                            .label
                            .as_deref()
                            .and_then(|label| loaded.version_by_label(label))
                            .or_else(|| loaded.closest_before(self.reference_time))
                            .filter(|v| v.key != loaded.root)
                            .cloned();
                        if let Some(version) = chosen {
                            self.restore_as_child(live, name.clone(), &version)?;
                            order.push(key);
                        }
                    }
                }
            }
        }
        self.cache.internal_editor(&live)?.set_child_order(&order)
    }
}
