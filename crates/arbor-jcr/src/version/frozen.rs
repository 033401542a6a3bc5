//! Frozen snapshots of versioned subtrees.
//!
//! Checkin writes an `nt:frozenNode` tree under the new version; each item is
//! included according to the `OnParentVersion` action of its definition.
//! Reading a snapshot back yields a [`FrozenNode`] tree whose children are
//! either full copies or [`VersionedItem::VersionedChild`] pointers into the
//! child's own history.

use arbor_core::lexicon::{
    JCR_CHILD_VERSION_HISTORY, JCR_FROZEN_MIXIN_TYPES, JCR_FROZEN_PRIMARY_TYPE, JCR_FROZEN_UUID,
    JCR_MIXIN_TYPES, JCR_PRIMARY_TYPE, JCR_UUID, JCR_VERSION_HISTORY, MIX_VERSIONABLE,
    NT_FROZEN_NODE, NT_VERSIONED_CHILD,
};
use arbor_core::nodetype::OnParentVersion;
use arbor_core::{Name, NodeKey, PropertyData, PropertyType, Value};
use arbor_storage::{Batch, GraphStore, NodeDocument, SYSTEM_WORKSPACE};

use crate::error::{RepositoryError, Result};
use crate::session::cache::SessionCache;

/// A child entry of a frozen node.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionedItem {
    /// A full frozen copy of a child.
    Frozen(FrozenNode),
    /// A pointer to the history of an independently versioned child.
    VersionedChild { name: Name, history: NodeKey },
}

impl VersionedItem {
    pub fn name(&self) -> &Name {
        match self {
            VersionedItem::Frozen(node) => &node.name,
            VersionedItem::VersionedChild { name, .. } => name,
        }
    }
}

/// An immutable snapshot of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenNode {
    /// Identifier of the snapshot node in version storage.
    pub key: NodeKey,
    pub name: Name,
    /// Identifier of the node the snapshot was taken from.
    pub frozen_uuid: NodeKey,
    pub primary_type: Name,
    pub mixin_types: Vec<Name>,
    /// Snapshot properties, excluding the type and identity bookkeeping.
    pub properties: Vec<PropertyData>,
    pub children: Vec<VersionedItem>,
}

impl FrozenNode {
    pub fn property(&self, name: &str) -> Option<&PropertyData> {
        self.properties.iter().find(|p| p.name.as_str() == name)
    }
}

fn is_bookkeeping(name: &str) -> bool {
    matches!(
        name,
        JCR_PRIMARY_TYPE
            | JCR_MIXIN_TYPES
            | JCR_UUID
            | JCR_FROZEN_PRIMARY_TYPE
            | JCR_FROZEN_MIXIN_TYPES
            | JCR_FROZEN_UUID
    )
}

/// Reads the snapshot rooted at `key` from version storage.
pub(crate) fn load_frozen(store: &dyn GraphStore, key: &NodeKey) -> Result<FrozenNode> {
    let doc = store
        .get_node(SYSTEM_WORKSPACE, key)?
        .ok_or_else(|| RepositoryError::ItemNotFound(format!("frozen node {}", key)))?;
    read_frozen(store, doc)
}

fn read_frozen(store: &dyn GraphStore, doc: NodeDocument) -> Result<FrozenNode> {
    let text = |name: &str| {
        doc.property(name)
            .and_then(PropertyData::first)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let frozen_uuid = text(JCR_FROZEN_UUID)
        .ok_or_else(|| RepositoryError::Version(format!("frozen node {} has no jcr:frozenUuid", doc.key)))?;
    let frozen_uuid = NodeKey::parse(&frozen_uuid)?;
    let primary_type = doc
        .property(JCR_FROZEN_PRIMARY_TYPE)
        .and_then(PropertyData::first)
        .and_then(Value::as_name)
        .cloned()
        .ok_or_else(|| {
            RepositoryError::Version(format!("frozen node {} has no jcr:frozenPrimaryType", doc.key))
        })?;
    let mixin_types = doc
        .property(JCR_FROZEN_MIXIN_TYPES)
        .map(PropertyData::names)
        .unwrap_or_default();
    let properties = doc
        .properties
        .values()
        .filter(|p| !is_bookkeeping(p.name.as_str()))
        .cloned()
        .collect();

    let mut children = Vec::with_capacity(doc.children.len());
    for child in &doc.children {
        let child_doc = store
            .get_node(SYSTEM_WORKSPACE, &child.key)?
            .ok_or_else(|| RepositoryError::ItemNotFound(format!("frozen node {}", child.key)))?;
        let is_pointer = child_doc
            .primary_type()
            .map(|t| t.as_str() == NT_VERSIONED_CHILD)
            .unwrap_or(false);
        if is_pointer {
            let history = child_doc
                .property(JCR_CHILD_VERSION_HISTORY)
                .and_then(PropertyData::first)
                .and_then(Value::as_key)
                .ok_or_else(|| {
                    RepositoryError::Version(format!(
                        "versioned child {} has no jcr:childVersionHistory",
                        child.key
                    ))
                })?;
            children.push(VersionedItem::VersionedChild {
                name: child.name.clone(),
                history,
            });
        } else {
            children.push(VersionedItem::Frozen(read_frozen(store, child_doc)?));
        }
    }

    Ok(FrozenNode {
        key: doc.key,
        name: doc.name,
        frozen_uuid,
        primary_type,
        mixin_types,
        properties,
        children,
    })
}

/// Writes frozen copies of live nodes into a version-storage batch.
pub(crate) struct Freezer<'a> {
    cache: &'a mut SessionCache,
    batch: &'a mut Batch,
}

impl<'a> Freezer<'a> {
    pub(crate) fn new(cache: &'a mut SessionCache, batch: &'a mut Batch) -> Self {
        Freezer { cache, batch }
    }

    /// Freezes live node `live` as child `name` of `parent` (a node in version
    /// storage). Returns the key of the new frozen node.
    pub(crate) fn freeze(&mut self, live: &NodeKey, parent: NodeKey, name: Name) -> Result<NodeKey> {
        let doc = self.cache.node(live)?.clone();
        let (primary, mixins) = self.cache.types(live)?;
        let key = NodeKey::new();

        let mut properties = vec![
            PropertyData::single(JCR_PRIMARY_TYPE, Value::Name(Name::from(NT_FROZEN_NODE))),
            PropertyData::single(JCR_UUID, Value::String(key.to_string())),
            PropertyData::single(JCR_FROZEN_UUID, Value::String(live.to_string())),
            PropertyData::single(JCR_FROZEN_PRIMARY_TYPE, Value::Name(primary)),
        ];
        if !mixins.is_empty() {
            properties.push(PropertyData::multi(
                JCR_FROZEN_MIXIN_TYPES,
                PropertyType::Name,
                mixins.into_iter().map(Value::Name).collect(),
            ));
        }
        for property in doc.properties.values() {
            if is_bookkeeping(property.name.as_str()) {
                continue;
            }
            let definition = self.cache.property_definition(live, property)?;
            let action = definition
                .as_ref()
                .map(|d| d.on_parent_version)
                .unwrap_or(OnParentVersion::Copy);
            match action {
                OnParentVersion::Abort => {
                    return Err(RepositoryError::Version(format!(
                        "checkin aborted: property {} is declared ABORT",
                        property.name
                    )));
                }
                OnParentVersion::Copy | OnParentVersion::Version => properties.push(property.clone()),
                OnParentVersion::Initialize => {
                    if let Some(def) = definition.filter(|d| !d.default_values.is_empty()) {
                        properties.push(PropertyData {
                            name: property.name.clone(),
                            ty: property.ty,
                            multiple: property.multiple,
                            values: def.default_values,
                        });
                    }
                }
                OnParentVersion::Compute | OnParentVersion::Ignore => {}
            }
        }
        self.batch.create_node(key, parent, name, properties);

        for child in &doc.children {
            let action = self
                .cache
                .node_definition(&child.key)?
                .map(|d| d.on_parent_version)
                .unwrap_or(OnParentVersion::Copy);
            match action {
                OnParentVersion::Abort => {
                    return Err(RepositoryError::Version(format!(
                        "checkin aborted: child {} is declared ABORT",
                        child.name
                    )));
                }
                OnParentVersion::Version if self.cache.is_node_type(&child.key, MIX_VERSIONABLE)? => {
                    let history = self
                        .cache
                        .node(&child.key)?
                        .property(JCR_VERSION_HISTORY)
                        .and_then(PropertyData::first)
                        .and_then(Value::as_key)
                        .ok_or_else(|| {
                            RepositoryError::InvalidItemState(format!(
                                "versionable child {} has no version history yet",
                                child.name
                            ))
                        })?;
                    self.batch.create_node(
                        NodeKey::new(),
                        key,
                        child.name.clone(),
                        vec![
                            PropertyData::single(
                                JCR_PRIMARY_TYPE,
                                Value::Name(Name::from(NT_VERSIONED_CHILD)),
                            ),
                            PropertyData::single(JCR_CHILD_VERSION_HISTORY, Value::Reference(history)),
                        ],
                    );
                }
                OnParentVersion::Copy | OnParentVersion::Version => {
                    self.freeze(&child.key, key, child.name.clone())?;
                }
                OnParentVersion::Initialize | OnParentVersion::Compute | OnParentVersion::Ignore => {}
            }
        }
        Ok(key)
    }
}
