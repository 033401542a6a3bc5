//! Reading and writing version storage.
//!
//! Version histories live in the system workspace below
//! `/jcr:system/jcr:versionStorage`. Writes are collected by a
//! [`HistoryWriter`] into one batch that the caller executes together with
//! the content-workspace batch it belongs to.

use std::collections::{BTreeMap, HashMap};

use arbor_core::lexicon::{
    ARBOR_HISTORY_FOLDER, JCR_CREATED, JCR_FROZEN_MIXIN_TYPES, JCR_FROZEN_NODE,
    JCR_FROZEN_PRIMARY_TYPE, JCR_FROZEN_UUID, JCR_PREDECESSORS, JCR_PRIMARY_TYPE,
    JCR_ROOT_VERSION, JCR_SUCCESSORS, JCR_UUID, JCR_VERSIONABLE_UUID, JCR_VERSION_LABELS,
    NT_FROZEN_NODE, NT_VERSION, NT_VERSION_HISTORY, NT_VERSION_LABELS,
};
use arbor_core::{Name, NodeKey, Path, PropertyData, PropertyType, Value};
use arbor_storage::{Batch, GraphStore, NodeDocument, WorkspaceBatch, SYSTEM_WORKSPACE};

use crate::error::{RepositoryError, Result};
use crate::version::history::{VersionHistory, VersionRecord};
use crate::version::path::{version_storage_path, HistoryLayout};

/// Lexically sortable name of a version created at `created` (milliseconds).
pub(crate) fn version_name(created: i64) -> Name {
    Name::from(format!("{:016x}", created.max(0)).as_str())
}

fn typed(primary: &str, key: NodeKey) -> Vec<PropertyData> {
    vec![
        PropertyData::single(JCR_PRIMARY_TYPE, Value::Name(Name::from(primary))),
        PropertyData::single(JCR_UUID, Value::String(key.to_string())),
    ]
}

fn references(name: &str, keys: &[NodeKey]) -> PropertyData {
    PropertyData::multi(
        name,
        PropertyType::Reference,
        keys.iter().copied().map(Value::Reference).collect(),
    )
}

/// Collects version-storage writes into a single system-workspace batch.
pub(crate) struct HistoryWriter {
    layout: HistoryLayout,
    batch: Batch,
    /// Folders created by this writer, so later histories reuse them.
    planned: HashMap<Path, NodeKey>,
}

impl HistoryWriter {
    pub(crate) fn new(layout: HistoryLayout) -> Self {
        HistoryWriter {
            layout,
            batch: Batch::new(),
            planned: HashMap::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub(crate) fn batch_mut(&mut self) -> &mut Batch {
        &mut self.batch
    }

    pub(crate) fn into_batch(self) -> WorkspaceBatch {
        WorkspaceBatch::new(SYSTEM_WORKSPACE, self.batch)
    }

    /// Plans a new version history for `versionable`. Returns the history
    /// and root version identifiers. An existing history at the derived path
    /// is reused.
    pub(crate) fn initialize(
        &mut self,
        store: &dyn GraphStore,
        versionable: NodeKey,
        primary: &Name,
        mixins: &[Name],
        created: i64,
    ) -> Result<(NodeKey, NodeKey)> {
        let path = self.layout.history_path(&versionable);
        if let Some(existing) = store.find_by_path(SYSTEM_WORKSPACE, &path)? {
            let root = existing
                .children
                .iter()
                .find(|c| c.name.as_str() == JCR_ROOT_VERSION)
                .map(|c| c.key)
                .ok_or_else(|| {
                    RepositoryError::Version(format!("history {} has no root version", path))
                })?;
            return Ok((existing.key, root));
        }

        let mut parent_path = version_storage_path();
        let mut parent = store
            .find_by_path(SYSTEM_WORKSPACE, &parent_path)?
            .map(|doc| doc.key)
            .ok_or_else(|| RepositoryError::Version("version storage is missing".to_string()))?;
        let segments = self.layout.segments(&versionable);
        let (leaf, folders) = segments
            .split_last()
            .ok_or_else(|| RepositoryError::Version("empty history path".to_string()))?;
        for folder in folders {
            parent_path = parent_path.child_named(folder.clone());
            parent = match self.planned.get(&parent_path) {
                Some(key) => *key,
                None => match store.find_by_path(SYSTEM_WORKSPACE, &parent_path)? {
                    Some(doc) => doc.key,
                    None => {
                        let key = NodeKey::new();
                        self.batch.create_node(
                            key,
                            parent,
                            folder.clone(),
                            vec![PropertyData::single(
                                JCR_PRIMARY_TYPE,
                                Value::Name(Name::from(ARBOR_HISTORY_FOLDER)),
                            )],
                        );
                        self.planned.insert(parent_path.clone(), key);
                        key
                    }
                },
            };
        }

        let history = NodeKey::new();
        let root = NodeKey::new();
        let mut history_props = typed(NT_VERSION_HISTORY, history);
        history_props.push(PropertyData::single(
            JCR_VERSIONABLE_UUID,
            Value::String(versionable.to_string()),
        ));
        self.batch.create_node(history, parent, leaf.clone(), history_props);

        let mut root_props = typed(NT_VERSION, root);
        root_props.push(PropertyData::single(JCR_CREATED, Value::Date(created)));
        root_props.push(references(JCR_PREDECESSORS, &[]));
        root_props.push(references(JCR_SUCCESSORS, &[]));
        self.batch
            .create_node(root, history, Name::from(JCR_ROOT_VERSION), root_props);

        let frozen = NodeKey::new();
        let mut frozen_props = typed(NT_FROZEN_NODE, frozen);
        frozen_props.push(PropertyData::single(
            JCR_FROZEN_UUID,
            Value::String(versionable.to_string()),
        ));
        frozen_props.push(PropertyData::single(
            JCR_FROZEN_PRIMARY_TYPE,
            Value::Name(primary.clone()),
        ));
        if !mixins.is_empty() {
            frozen_props.push(PropertyData::multi(
                JCR_FROZEN_MIXIN_TYPES,
                PropertyType::Name,
                mixins.iter().cloned().map(Value::Name).collect(),
            ));
        }
        self.batch
            .create_node(frozen, root, Name::from(JCR_FROZEN_NODE), frozen_props);

        self.batch.create_node(
            NodeKey::new(),
            history,
            Name::from(JCR_VERSION_LABELS),
            vec![PropertyData::single(
                JCR_PRIMARY_TYPE,
                Value::Name(Name::from(NT_VERSION_LABELS)),
            )],
        );
        Ok((history, root))
    }

    /// Plans a new version node under `history` and links it as a successor
    /// of each predecessor. The frozen subtree is written separately.
    pub(crate) fn add_version(
        &mut self,
        history: &VersionHistory,
        version: NodeKey,
        name: Name,
        created: i64,
        predecessors: &[NodeKey],
    ) -> Result<()> {
        let mut props = typed(NT_VERSION, version);
        props.push(PropertyData::single(JCR_CREATED, Value::Date(created)));
        props.push(references(JCR_PREDECESSORS, predecessors));
        props.push(references(JCR_SUCCESSORS, &[]));
        self.batch.create_node(version, history.key, name, props);

        for predecessor in predecessors {
            let record = history.record(predecessor).ok_or_else(|| {
                RepositoryError::Version(format!(
                    "predecessor {} is not part of history {}",
                    predecessor, history.key
                ))
            })?;
            if record.successors.contains(&version) {
                continue;
            }
            let mut successors = record.successors.clone();
            successors.push(version);
            self.batch
                .set_property(*predecessor, references(JCR_SUCCESSORS, &successors));
        }
        Ok(())
    }

    /// Points `label` at `version`, or removes it when `version` is `None`.
    pub(crate) fn set_label(&mut self, history: &VersionHistory, label: &str, version: Option<NodeKey>) -> Result<()> {
        let labels = history.labels_node.ok_or_else(|| {
            RepositoryError::Version(format!("history {} has no label node", history.key))
        })?;
        match version {
            Some(version) => {
                self.batch
                    .set_property(labels, PropertyData::single(label, Value::Reference(version)));
            }
            None => {
                self.batch.remove_properties(labels, vec![Name::from(label)]);
            }
        }
        Ok(())
    }
}

fn system_node(store: &dyn GraphStore, key: &NodeKey, what: &str) -> Result<NodeDocument> {
    store
        .get_node(SYSTEM_WORKSPACE, key)?
        .ok_or_else(|| RepositoryError::ItemNotFound(format!("{} {}", what, key)))
}

/// Loads the history with identifier `key`.
pub(crate) fn load_history(store: &dyn GraphStore, key: &NodeKey) -> Result<VersionHistory> {
    let doc = system_node(store, key, "version history")?;
    if doc.primary_type().map(|t| t.as_str()) != Some(NT_VERSION_HISTORY) {
        return Err(RepositoryError::Version(format!(
            "{} is not a version history",
            key
        )));
    }
    let versionable = doc
        .property(JCR_VERSIONABLE_UUID)
        .and_then(PropertyData::first)
        .and_then(Value::as_str)
        .map(NodeKey::parse)
        .transpose()?
        .ok_or_else(|| {
            RepositoryError::Version(format!("history {} has no jcr:versionableUuid", key))
        })?;
    let path = store.path_of(SYSTEM_WORKSPACE, key)?;

    let mut root = None;
    let mut labels_node = None;
    let mut labels = BTreeMap::new();
    let mut records = Vec::new();
    for child in &doc.children {
        match child.name.as_str() {
            JCR_VERSION_LABELS => {
                let labels_doc = system_node(store, &child.key, "label node")?;
                for property in labels_doc.properties.values() {
                    if property.name.as_str() == JCR_PRIMARY_TYPE {
                        continue;
                    }
                    if let Some(target) = property.first().and_then(Value::as_key) {
                        labels.insert(property.name.to_string(), target);
                    }
                }
                labels_node = Some(child.key);
            }
            name => {
                if name == JCR_ROOT_VERSION {
                    root = Some(child.key);
                }
                records.push(load_version(store, &child.key, *key)?);
            }
        }
    }
    let root = root.ok_or_else(|| {
        RepositoryError::Version(format!("history {} has no root version", key))
    })?;
    Ok(VersionHistory::new(
        *key,
        versionable,
        path,
        root,
        labels_node,
        records,
        labels,
    ))
}

/// Loads one version record.
pub(crate) fn load_version(
    store: &dyn GraphStore,
    key: &NodeKey,
    history: NodeKey,
) -> Result<VersionRecord> {
    let doc = system_node(store, key, "version")?;
    let keys = |name: &str| doc.property(name).map(PropertyData::keys).unwrap_or_default();
    Ok(VersionRecord {
        key: *key,
        history,
        name: doc.name.clone(),
        created: doc
            .property(JCR_CREATED)
            .and_then(PropertyData::first)
            .and_then(Value::as_long)
            .unwrap_or_default(),
        predecessors: keys(JCR_PREDECESSORS),
        successors: keys(JCR_SUCCESSORS),
        frozen: doc
            .children
            .iter()
            .find(|c| c.name.as_str() == JCR_FROZEN_NODE)
            .map(|c| c.key),
    })
}

/// The history a version belongs to.
pub(crate) fn history_of_version(store: &dyn GraphStore, version: &NodeKey) -> Result<NodeKey> {
    system_node(store, version, "version")?
        .parent
        .ok_or_else(|| RepositoryError::Version(format!("version {} has no history", version)))
}
