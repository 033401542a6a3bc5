//! Mutation handle for one node of a [`SessionCache`].
//!
//! Every write a session makes goes through an [`Editor`]. Enforcing editors
//! apply node-type definitions, protection and the checked-in rule; internal
//! editors (used by versioning and restore) skip protection and the
//! checked-in rule but keep the structural bookkeeping identical.

use arbor_core::lexicon::{JCR_MIXIN_TYPES, JCR_PRIMARY_TYPE, JCR_UUID, MIX_REFERENCEABLE};
use arbor_core::{Name, NodeKey, NodeTypeRegistry, PropertyData, PropertyType, Segment, Value};
use arbor_storage::{ChildRef, NodeDocument};

use crate::error::{RepositoryError, Result};
use crate::session::cache::SessionCache;

pub struct Editor<'c> {
    cache: &'c mut SessionCache,
    key: NodeKey,
    enforce: bool,
}

impl<'c> Editor<'c> {
    pub(crate) fn new(cache: &'c mut SessionCache, key: NodeKey, enforce: bool) -> Self {
        Editor {
            cache,
            key,
            enforce,
        }
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    fn ensure_checked_out(&mut self) -> Result<()> {
        if self.enforce && !self.cache.is_checked_out(&self.key)? {
            return Err(RepositoryError::Version(format!(
                "node {} is checked in",
                self.cache.path_of(&self.key)?
            )));
        }
        Ok(())
    }

    /// Sets (or replaces) property `name`.
    ///
    /// Values are cast to `ty` first when given, then to the required type of
    /// the matching definition.
    pub fn set_property(
        &mut self,
        name: Name,
        values: Vec<Value>,
        ty: Option<PropertyType>,
        multiple: bool,
    ) -> Result<PropertyData> {
        self.ensure_checked_out()?;
        if !multiple && values.len() != 1 {
            return Err(RepositoryError::ValueFormat(format!(
                "single-valued property {} needs exactly one value, got {}",
                name,
                values.len()
            )));
        }
        let values = match ty {
            Some(ty) => values
                .iter()
                .map(|v| v.convert(ty))
                .collect::<Result<Vec<_>, _>>()?,
            None => values,
        };
        let (primary, mixins) = self.cache.types(&self.key)?;
        if self.enforce {
            if let Some(existing) = self.cache.node(&self.key)?.property(name.as_str()) {
                if existing.multiple != multiple {
                    return Err(RepositoryError::ValueFormat(format!(
                        "property {} is {}-valued",
                        name,
                        if existing.multiple { "multi" } else { "single" }
                    )));
                }
            }
        }
        let registry = self.cache.registry().clone();
        let definition =
            registry.find_property_definition(&primary, &mixins, &name, &values, multiple, false);
        if self.enforce {
            match definition {
                Some(def) if def.protected => {
                    return Err(RepositoryError::ConstraintViolation(format!(
                        "property {} is protected",
                        name
                    )));
                }
                None => {
                    return Err(RepositoryError::ConstraintViolation(format!(
                        "no definition allows property {} on a node of type {}",
                        name, primary
                    )));
                }
                Some(_) => {}
            }
        }
        let (values, ty) = match definition {
            Some(def) if def.required_type != PropertyType::Undefined => {
                let cast = values
                    .iter()
                    .map(|v| v.convert(def.required_type))
                    .collect::<Result<Vec<_>, _>>()?;
                (cast, def.required_type)
            }
            _ => {
                let ty = ty
                    .or_else(|| values.first().map(Value::property_type))
                    .unwrap_or(PropertyType::String);
                (values, ty)
            }
        };
        if self.enforce {
            for value in &values {
                if let Value::Reference(target) = value {
                    if !self.cache.exists(target)? || !self.cache.is_node_type(target, MIX_REFERENCEABLE)? {
                        return Err(RepositoryError::ValueFormat(format!(
                            "reference target {} is not a referenceable node",
                            target
                        )));
                    }
                }
            }
        }
        let property = PropertyData {
            name: name.clone(),
            ty,
            multiple,
            values,
        };
        self.cache
            .touch(&self.key)?
            .doc
            .properties
            .insert(name, property.clone());
        Ok(property)
    }

    /// Removes property `name`; returns false if it did not exist.
    pub fn remove_property(&mut self, name: &Name) -> Result<bool> {
        self.ensure_checked_out()?;
        let Some(existing) = self.cache.node(&self.key)?.property(name.as_str()).cloned() else {
            return Ok(false);
        };
        if self.enforce {
            if let Some(def) = self.cache.property_definition(&self.key, &existing)? {
                if def.protected {
                    return Err(RepositoryError::ConstraintViolation(format!(
                        "property {} is protected",
                        name
                    )));
                }
                if def.mandatory {
                    return Err(RepositoryError::ConstraintViolation(format!(
                        "property {} is mandatory",
                        name
                    )));
                }
            }
        }
        self.cache
            .touch(&self.key)?
            .doc
            .properties
            .shift_remove(name);
        Ok(true)
    }

    /// Raw property write without definition lookup.
    pub(crate) fn put_property(&mut self, property: PropertyData) -> Result<()> {
        self.cache
            .touch(&self.key)?
            .doc
            .properties
            .insert(property.name.clone(), property);
        Ok(())
    }

    /// Replaces the whole property set except `jcr:primaryType`.
    pub(crate) fn replace_properties(&mut self, properties: Vec<PropertyData>) -> Result<()> {
        let entry = self.cache.touch(&self.key)?;
        entry
            .doc
            .properties
            .retain(|name, _| name.as_str() == JCR_PRIMARY_TYPE);
        for property in properties {
            entry.doc.properties.insert(property.name.clone(), property);
        }
        Ok(())
    }

    /// Creates a child named `name` and returns its identifier.
    ///
    /// Without `primary`, the governing definition's default primary type is
    /// used. `desired` requests a specific identifier.
    pub fn create_child(
        &mut self,
        name: Name,
        desired: Option<NodeKey>,
        primary: Option<Name>,
    ) -> Result<NodeKey> {
        self.ensure_checked_out()?;
        let (parent_primary, parent_mixins) = self.cache.types(&self.key)?;
        let registry = self.cache.registry().clone();
        let sns = self
            .cache
            .node(&self.key)?
            .children
            .iter()
            .filter(|c| c.name == name)
            .count()
            + 1;
        let definition = registry
            .find_child_node_definition(
                &parent_primary,
                &parent_mixins,
                &name,
                primary.as_ref(),
                sns,
                false,
            )
            .cloned();
        if self.enforce && definition.as_ref().map(|d| d.protected).unwrap_or(false) {
            return Err(RepositoryError::ConstraintViolation(format!(
                "child {} is protected",
                name
            )));
        }
        if definition.is_none() {
            let fits_without_sibling = sns > 1
                && registry
                    .find_child_node_definition(
                        &parent_primary,
                        &parent_mixins,
                        &name,
                        primary.as_ref(),
                        sns - 1,
                        false,
                    )
                    .is_some();
            if fits_without_sibling {
                return Err(RepositoryError::ItemExists(format!(
                    "{} already has a child named {}",
                    self.cache.path_of(&self.key)?,
                    name
                )));
            }
            if self.enforce {
                return Err(RepositoryError::ConstraintViolation(format!(
                    "no definition allows child {} on a node of type {}",
                    name, parent_primary
                )));
            }
        }
        let child_type = match primary {
            Some(primary) => {
                let ty = registry
                    .node_type(primary.as_str())
                    .ok_or_else(|| RepositoryError::NoSuchNodeType(primary.to_string()))?;
                if self.enforce && (ty.mixin || ty.is_abstract) {
                    return Err(RepositoryError::ConstraintViolation(format!(
                        "{} cannot be used as a primary type",
                        primary
                    )));
                }
                primary
            }
            None => definition
                .as_ref()
                .and_then(|d| d.default_primary_type.clone())
                .ok_or_else(|| {
                    RepositoryError::ConstraintViolation(format!(
                        "no default primary type for child {}",
                        name
                    ))
                })?,
        };
        let key = desired.unwrap_or_default();
        if self.cache.exists(&key)? {
            return Err(RepositoryError::ItemExists(format!(
                "a node with identifier {} already exists",
                key
            )));
        }

        let mut doc = NodeDocument::new(key, Some(self.key), name.clone());
        doc.properties.insert(
            Name::from(JCR_PRIMARY_TYPE),
            PropertyData::single(JCR_PRIMARY_TYPE, Value::Name(child_type.clone())),
        );
        populate_auto_created(&registry, &mut doc, &child_type, &[]);

        self.cache
            .touch(&self.key)?
            .doc
            .children
            .push(ChildRef {
                key,
                name: name.clone(),
            });
        self.cache.insert_new(doc);

        let auto_children: Vec<(Name, Name)> = registry
            .child_node_definitions(&child_type, &[])
            .into_iter()
            .filter(|d| d.auto_created && !d.is_residual())
            .filter_map(|d| d.default_primary_type.clone().map(|t| (d.name.clone(), t)))
            .collect();
        for (child_name, child_type) in auto_children {
            Editor::new(self.cache, key, false).create_child(child_name, None, Some(child_type))?;
        }
        Ok(key)
    }

    /// Removes `child` and its subtree; returns false if `child` is not a
    /// child of this node.
    pub fn destroy_child(&mut self, child: &NodeKey) -> Result<bool> {
        self.ensure_checked_out()?;
        if !self
            .cache
            .node(&self.key)?
            .children
            .iter()
            .any(|c| c.key == *child)
        {
            return Ok(false);
        }
        let path = self.cache.path_of(child)?;
        let ancestors = self.cache.lineage(&self.key)?;
        let subtree = self.cache.subtree_keys(child)?;
        self.cache
            .touch(&self.key)?
            .doc
            .children
            .retain(|c| c.key != *child);
        self.cache.forget_subtree(child, path, ancestors, &subtree);
        Ok(true)
    }

    /// Moves `child` (anywhere in the workspace) to be the last child of this
    /// node, optionally renaming it.
    pub fn move_to_be_child(&mut self, child: &NodeKey, new_name: Option<Name>) -> Result<()> {
        self.ensure_checked_out()?;
        if self.cache.lineage(&self.key)?.contains(child) {
            return Err(RepositoryError::ConstraintViolation(format!(
                "cannot move {} beneath itself",
                self.cache.path_of(child)?
            )));
        }
        let (old_parent, old_name) = {
            let doc = self.cache.node(child)?;
            (doc.parent, doc.name.clone())
        };
        let old_parent = old_parent.ok_or_else(|| {
            RepositoryError::ConstraintViolation("the root node cannot be moved".to_string())
        })?;
        let name = new_name.unwrap_or_else(|| old_name.clone());
        if old_parent == self.key && name == old_name {
            return Ok(());
        }
        if self.enforce {
            if !self.cache.is_checked_out(&old_parent)? {
                return Err(RepositoryError::Version(format!(
                    "source parent {} is checked in",
                    self.cache.path_of(&old_parent)?
                )));
            }
            let child_type = self.cache.primary_type(child)?;
            let (primary, mixins) = self.cache.types(&self.key)?;
            let sns = self
                .cache
                .node(&self.key)?
                .children
                .iter()
                .filter(|c| c.name == name && c.key != *child)
                .count()
                + 1;
            let registry = self.cache.registry().clone();
            let fits = |count| {
                registry
                    .find_child_node_definition(&primary, &mixins, &name, Some(&child_type), count, true)
                    .is_some()
            };
            if !fits(sns) {
                if sns > 1 && fits(sns - 1) {
                    return Err(RepositoryError::ItemExists(format!(
                        "{} already has a child named {}",
                        self.cache.path_of(&self.key)?,
                        name
                    )));
                }
                return Err(RepositoryError::ConstraintViolation(format!(
                    "no definition allows child {} on a node of type {}",
                    name, primary
                )));
            }
        }
        self.cache
            .touch(&old_parent)?
            .doc
            .children
            .retain(|c| c.key != *child);
        let destination = self.cache.touch(&self.key)?;
        destination.doc.children.push(ChildRef {
            key: *child,
            name: name.clone(),
        });
        destination.reordered = true;
        let moved = self.cache.touch(child)?;
        moved.doc.parent = Some(self.key);
        moved.doc.name = name;
        Ok(())
    }

    /// Places `child` immediately before `before`, or last when `before` is
    /// `None`.
    pub fn order_child_before(&mut self, child: &Segment, before: Option<&Segment>) -> Result<()> {
        if self.enforce {
            let (primary, mixins) = self.cache.types(&self.key)?;
            if !self.cache.registry().is_orderable(&primary, &mixins) {
                return Err(RepositoryError::UnsupportedOperation(format!(
                    "child nodes of {} are not orderable",
                    self.cache.path_of(&self.key)?
                )));
            }
        }
        self.ensure_checked_out()?;
        let (moving, anchor) = {
            let doc = self.cache.node(&self.key)?;
            let moving = doc
                .child_by_segment(child)
                .cloned()
                .ok_or_else(|| RepositoryError::ItemNotFound(child.to_string()))?;
            let anchor = match before {
                Some(segment) => Some(
                    doc.child_by_segment(segment)
                        .map(|c| c.key)
                        .ok_or_else(|| RepositoryError::ItemNotFound(segment.to_string()))?,
                ),
                None => None,
            };
            (moving, anchor)
        };
        if anchor == Some(moving.key) {
            return Ok(());
        }
        let entry = self.cache.touch(&self.key)?;
        entry.doc.children.retain(|c| c.key != moving.key);
        let position = anchor
            .and_then(|a| entry.doc.children.iter().position(|c| c.key == a))
            .unwrap_or(entry.doc.children.len());
        entry.doc.children.insert(position, moving);
        entry.reordered = true;
        Ok(())
    }

    /// Replaces the child order with `order`, which must be a permutation of
    /// the current children.
    pub(crate) fn set_child_order(&mut self, order: &[NodeKey]) -> Result<()> {
        let entry = self.cache.touch(&self.key)?;
        let mut reordered = Vec::with_capacity(order.len());
        for key in order {
            if let Some(child) = entry.doc.children.iter().find(|c| c.key == *key) {
                reordered.push(child.clone());
            }
        }
        for child in &entry.doc.children {
            if !order.contains(&child.key) {
                reordered.push(child.clone());
            }
        }
        if reordered != entry.doc.children {
            entry.doc.children = reordered;
            entry.reordered = true;
        }
        Ok(())
    }

    /// Adds `mixin`, populating its auto-created properties.
    pub fn add_mixin(&mut self, mixin: &Name) -> Result<()> {
        self.ensure_checked_out()?;
        if self.enforce {
            if let Some(reason) = self.mixin_conflict(mixin)? {
                return Err(RepositoryError::ConstraintViolation(reason));
            }
        }
        let mut mixins = self.cache.mixin_types(&self.key)?;
        if mixins.contains(mixin) {
            return Ok(());
        }
        mixins.push(mixin.clone());
        let registry = self.cache.registry().clone();
        let key = self.key;
        let entry = self.cache.touch(&key)?;
        entry.doc.properties.insert(
            Name::from(JCR_MIXIN_TYPES),
            PropertyData::multi(
                JCR_MIXIN_TYPES,
                PropertyType::Name,
                mixins.into_iter().map(Value::Name).collect(),
            ),
        );
        populate_auto_created(&registry, &mut entry.doc, mixin, &[]);
        Ok(())
    }

    /// Removes `mixin`. Fails if any property or child would be left
    /// without a definition in the remaining type set.
    pub(crate) fn remove_mixin(&mut self, mixin: &Name) -> Result<()> {
        self.ensure_checked_out()?;
        let mut mixins = self.cache.mixin_types(&self.key)?;
        if !mixins.contains(mixin) {
            return Err(RepositoryError::ConstraintViolation(format!(
                "node does not carry mixin {}",
                mixin
            )));
        }
        mixins.retain(|m| m != mixin);
        let primary = self.cache.primary_type(&self.key)?;
        let registry = self.cache.registry().clone();
        let doc = self.cache.node(&self.key)?.clone();
        for property in doc.properties.values() {
            if property.name.as_str() == JCR_MIXIN_TYPES {
                continue;
            }
            let still_defined = registry
                .find_property_definition(
                    &primary,
                    &mixins,
                    &property.name,
                    &property.values,
                    property.multiple,
                    false,
                )
                .is_some();
            if !still_defined {
                return Err(RepositoryError::ConstraintViolation(format!(
                    "property {} relies on mixin {}",
                    property.name, mixin
                )));
            }
        }
        for child in &doc.children {
            let child_type = self.cache.primary_type(&child.key)?;
            let siblings = doc.children.iter().filter(|c| c.name == child.name).count();
            let defined = registry
                .find_child_node_definition(
                    &primary,
                    &mixins,
                    &child.name,
                    Some(&child_type),
                    siblings,
                    false,
                )
                .is_some();
            if !defined {
                return Err(RepositoryError::ConstraintViolation(format!(
                    "child {} relies on mixin {}",
                    child.name, mixin
                )));
            }
        }
        let entry = self.cache.touch(&self.key)?;
        if mixins.is_empty() {
            entry.doc.properties.shift_remove(JCR_MIXIN_TYPES);
        } else {
            entry.doc.properties.insert(
                Name::from(JCR_MIXIN_TYPES),
                PropertyData::multi(
                    JCR_MIXIN_TYPES,
                    PropertyType::Name,
                    mixins.into_iter().map(Value::Name).collect(),
                ),
            );
        }
        Ok(())
    }

    /// Why `mixin` cannot be added to this node, if it cannot.
    pub(crate) fn mixin_conflict(&mut self, mixin: &Name) -> Result<Option<String>> {
        let registry = self.cache.registry().clone();
        let Some(candidate) = registry.node_type(mixin.as_str()) else {
            return Err(RepositoryError::NoSuchNodeType(mixin.to_string()));
        };
        if !candidate.mixin {
            return Ok(Some(format!("{} is not a mixin type", mixin)));
        }
        if let Some(def) = self.cache.node_definition(&self.key)? {
            if def.protected {
                return Ok(Some("the node's definition is protected".to_string()));
            }
        }
        let (primary, mixins) = self.cache.types(&self.key)?;
        if registry.is_any(&primary, &mixins, mixin.as_str()) {
            return Ok(None);
        }
        let existing_props = registry.property_definitions(&primary, &mixins);
        let existing_children = registry.child_node_definitions(&primary, &mixins);
        let closure = registry.supertype_closure(mixin.as_str());
        for ty in &closure {
            for def in ty.property_definitions.iter().filter(|d| !d.is_residual()) {
                let clash = existing_props
                    .iter()
                    .any(|e| e.name == def.name && e.declaring_type != def.declaring_type);
                if clash {
                    return Ok(Some(format!(
                        "{} redefines property {} of the node's types",
                        mixin, def.name
                    )));
                }
            }
            for def in ty.child_node_definitions.iter().filter(|d| !d.is_residual()) {
                let clash = existing_children
                    .iter()
                    .any(|e| e.name == def.name && e.declaring_type != def.declaring_type);
                if clash {
                    return Ok(Some(format!(
                        "{} redefines child node {} of the node's types",
                        mixin, def.name
                    )));
                }
            }
        }
        let doc = self.cache.node(&self.key)?.clone();
        for ty in &closure {
            for def in ty.property_definitions.iter().filter(|d| !d.is_residual()) {
                if let Some(existing) = doc.property(def.name.as_str()) {
                    if existing.multiple != def.multiple || !def.accepts(&existing.values) {
                        return Ok(Some(format!(
                            "existing property {} does not satisfy {}'s definition",
                            def.name, mixin
                        )));
                    }
                }
            }
            for def in ty.child_node_definitions.iter().filter(|d| !d.is_residual()) {
                for child in doc.children.iter().filter(|c| c.name == def.name) {
                    let child_type = self.cache.primary_type(&child.key)?;
                    let fits = def
                        .required_primary_types
                        .iter()
                        .all(|req| registry.is_node_type(child_type.as_str(), req.as_str()));
                    if !fits {
                        return Ok(Some(format!(
                            "existing child {} does not satisfy {}'s definition",
                            def.name, mixin
                        )));
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Fills in auto-created properties of `ty` (and its supertypes) that `doc`
/// does not have yet. Properties without defaults are left to save time.
pub(crate) fn populate_auto_created(
    registry: &NodeTypeRegistry,
    doc: &mut NodeDocument,
    ty: &Name,
    mixins: &[Name],
) {
    for def in registry.property_definitions(ty, mixins) {
        if !def.auto_created || def.is_residual() || doc.properties.contains_key(&def.name) {
            continue;
        }
        if def.name.as_str() == JCR_UUID {
            doc.properties.insert(
                def.name.clone(),
                PropertyData::single(JCR_UUID, Value::String(doc.key.to_string())),
            );
            continue;
        }
        if def.default_values.is_empty() {
            continue;
        }
        let ty = match def.required_type {
            PropertyType::Undefined => def.default_values[0].property_type(),
            other => other,
        };
        doc.properties.insert(
            def.name.clone(),
            PropertyData {
                name: def.name.clone(),
                ty,
                multiple: def.multiple,
                values: def.default_values.clone(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::repository::SharedStore;
    use arbor_core::lexicon::{ARBOR_ROOT, JCR_CREATED, JCR_IS_CHECKED_OUT, MIX_CREATED, MIX_VERSIONABLE};
    use arbor_storage::{GraphStore, InMemoryStore};

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
        SessionCache::new("default", "tester", shared, Arc::new(NodeTypeRegistry::with_builtins())).unwrap()
    }

    #[test]
    fn test_same_name_siblings_get_indexes() {
        let mut cache = cache();
        let root = cache.root_key();
        let first = cache.editor(&root).unwrap().create_child(Name::from("item"), None, None).unwrap();
        let second = cache.editor(&root).unwrap().create_child(Name::from("item"), None, None).unwrap();
        assert_eq!(cache.path_of(&first).unwrap().to_string(), "/item");
        assert_eq!(cache.path_of(&second).unwrap().to_string(), "/item[2]");
    }

    #[test]
    fn test_create_child_rejects_unknown_and_mixin_types() {
        let mut cache = cache();
        let root = cache.root_key();
        let err = cache
            .editor(&root)
            .unwrap()
            .create_child(Name::from("a"), None, Some(Name::from("x:nothing")))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NoSuchNodeType(_)));
        let err = cache
            .editor(&root)
            .unwrap()
            .create_child(Name::from("a"), None, Some(Name::from(MIX_CREATED)))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ConstraintViolation(_)));
    }

    #[test]
    fn test_protected_properties_need_internal_editor() {
        let mut cache = cache();
        let root = cache.root_key();
        let node = cache.editor(&root).unwrap().create_child(Name::from("a"), None, None).unwrap();
        let err = cache
            .editor(&node)
            .unwrap()
            .set_property(Name::from(JCR_PRIMARY_TYPE), vec![Value::Name(Name::from("nt:folder"))], None, false)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ConstraintViolation(_)));
    }

    #[test]
    fn test_checked_in_node_rejects_edits() {
        let mut cache = cache();
        let root = cache.root_key();
        let node = cache.editor(&root).unwrap().create_child(Name::from("a"), None, None).unwrap();
        cache
            .internal_editor(&node)
            .unwrap()
            .put_property(PropertyData::single(JCR_IS_CHECKED_OUT, Value::Boolean(false)))
            .unwrap();
        let err = cache
            .editor(&node)
            .unwrap()
            .set_property(Name::from("title"), vec![Value::from("x")], None, false)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Version(_)));
        assert!(cache
            .internal_editor(&node)
            .unwrap()
            .set_property(Name::from("title"), vec![Value::from("x")], None, false)
            .is_ok());
    }

    #[test]
    fn test_add_mixin_rejects_incompatible_existing_property() {
        let mut cache = cache();
        let root = cache.root_key();
        let node = cache.editor(&root).unwrap().create_child(Name::from("a"), None, None).unwrap();
        cache
            .editor(&node)
            .unwrap()
            .set_property(Name::from(JCR_CREATED), vec![Value::from("yesterday")], None, false)
            .unwrap();
        let before = cache.node(&node).unwrap().properties.clone();
        let err = cache.editor(&node).unwrap().add_mixin(&Name::from(MIX_CREATED)).unwrap_err();
        assert!(matches!(err, RepositoryError::ConstraintViolation(_)));
        assert_eq!(cache.node(&node).unwrap().properties, before);
    }

    #[test]
    fn test_add_versionable_mixin_populates_auto_created() {
        let mut cache = cache();
        let root = cache.root_key();
        let node = cache.editor(&root).unwrap().create_child(Name::from("a"), None, None).unwrap();
        cache.editor(&node).unwrap().add_mixin(&Name::from(MIX_VERSIONABLE)).unwrap();
        let doc = cache.node(&node).unwrap();
        assert_eq!(doc.property(JCR_UUID).and_then(PropertyData::first), Some(&Value::String(node.to_string())));
        assert_eq!(
            doc.property(JCR_IS_CHECKED_OUT).and_then(PropertyData::first),
            Some(&Value::Boolean(true))
        );
    }

    #[test]
    fn test_order_child_before() {
        let mut cache = cache();
        let root = cache.root_key();
        let a = cache.editor(&root).unwrap().create_child(Name::from("a"), None, None).unwrap();
        let b = cache.editor(&root).unwrap().create_child(Name::from("b"), None, None).unwrap();
        let c = cache.editor(&root).unwrap().create_child(Name::from("c"), None, None).unwrap();
        cache
            .editor(&root)
            .unwrap()
            .order_child_before(&Segment::named(Name::from("c")), Some(&Segment::named(Name::from("a"))))
            .unwrap();
        let order: Vec<NodeKey> = cache.children(&root).unwrap().iter().map(|c| c.key).collect();
        assert_eq!(order, vec![c, a, b]);
    }

    #[test]
    fn test_move_rejects_cycles() {
        let mut cache = cache();
        let root = cache.root_key();
        let a = cache.editor(&root).unwrap().create_child(Name::from("a"), None, None).unwrap();
        let b = cache.editor(&a).unwrap().create_child(Name::from("b"), None, None).unwrap();
        let err = cache.editor(&b).unwrap().move_to_be_child(&a, None).unwrap_err();
        assert!(matches!(err, RepositoryError::ConstraintViolation(_)));
    }
}
