//! Node type registry.
//!
//! [`NodeTypeRegistry`] resolves type names to [`NodeType`]s and answers the
//! definition lookups the session cache needs: which property definition
//! governs a value, which child node definition admits a new child, and the
//! transitive supertype relation.

use std::collections::VecDeque;

use indexmap::IndexMap;

use crate::builtin;
use crate::error::CoreError;
use crate::name::Name;
use crate::nodetype::{
    NodeDefinition, NodeDefinitionId, NodeType, PropertyDefinition, PropertyDefinitionId,
};
use crate::value::{PropertyType, Value};

/// Registry of node types, keyed by name in registration order.
#[derive(Debug, Clone, Default)]
pub struct NodeTypeRegistry {
    types: IndexMap<Name, NodeType>,
}

impl NodeTypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        NodeTypeRegistry {
            types: IndexMap::new(),
        }
    }

    /// Creates a registry pre-populated with the built-in JCR types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for ty in builtin::node_types() {
            registry.types.insert(ty.name.clone(), ty);
        }
        registry
    }

    /// Registers a new node type.
    ///
    /// Returns [`CoreError::DuplicateNodeType`] if the name is taken and
    /// [`CoreError::NoSuchNodeType`] if a supertype is unknown.
    pub fn register(&mut self, ty: NodeType) -> Result<(), CoreError> {
        if self.types.contains_key(&ty.name) {
            return Err(CoreError::DuplicateNodeType {
                name: ty.name.to_string(),
            });
        }
        if let Some(missing) = ty.supertypes.iter().find(|s| !self.types.contains_key(*s)) {
            return Err(CoreError::NoSuchNodeType {
                name: missing.to_string(),
            });
        }
        self.types.insert(ty.name.clone(), ty);
        Ok(())
    }

    pub fn node_type(&self, name: &str) -> Option<&NodeType> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.types.keys()
    }

    /// The type itself followed by all of its transitive supertypes.
    pub fn supertype_closure(&self, name: &str) -> Vec<&NodeType> {
        let mut out: Vec<&NodeType> = Vec::new();
        let mut queue: VecDeque<&str> = VecDeque::from([name]);
        while let Some(next) = queue.pop_front() {
            if out.iter().any(|t| t.name == next) {
                continue;
            }
            if let Some(ty) = self.types.get(next) {
                out.push(ty);
                queue.extend(ty.supertypes.iter().map(Name::as_str));
            }
        }
        out
    }

    /// True if `ty` is `candidate` or inherits from it.
    pub fn is_node_type(&self, ty: &str, candidate: &str) -> bool {
        self.supertype_closure(ty).iter().any(|t| t.name == candidate)
    }

    /// All types in effect for a node: the primary type's closure followed by
    /// each mixin's closure, without duplicates.
    pub fn effective_types(&self, primary: &Name, mixins: &[Name]) -> Vec<&NodeType> {
        let mut out: Vec<&NodeType> = Vec::new();
        for name in std::iter::once(primary).chain(mixins.iter()) {
            for ty in self.supertype_closure(name.as_str()) {
                if !out.iter().any(|t| t.name == ty.name) {
                    out.push(ty);
                }
            }
        }
        out
    }

    /// True if the primary type or any mixin is (or inherits from) `candidate`.
    pub fn is_any(&self, primary: &Name, mixins: &[Name], candidate: &str) -> bool {
        self.effective_types(primary, mixins)
            .iter()
            .any(|t| t.name == candidate)
    }

    pub fn is_orderable(&self, primary: &Name, mixins: &[Name]) -> bool {
        self.effective_types(primary, mixins).iter().any(|t| t.orderable)
    }

    pub fn property_definitions(&self, primary: &Name, mixins: &[Name]) -> Vec<&PropertyDefinition> {
        self.effective_types(primary, mixins)
            .into_iter()
            .flat_map(|t| t.property_definitions.iter())
            .collect()
    }

    pub fn child_node_definitions(&self, primary: &Name, mixins: &[Name]) -> Vec<&NodeDefinition> {
        self.effective_types(primary, mixins)
            .into_iter()
            .flat_map(|t| t.child_node_definitions.iter())
            .collect()
    }

    /// Finds the definition governing property `name` holding `values`.
    ///
    /// Named definitions win over residual ones. Within each group a
    /// definition whose required type equals the values' type is preferred,
    /// then an `undefined` one, then any definition the values can be cast to.
    pub fn find_property_definition(
        &self,
        primary: &Name,
        mixins: &[Name],
        name: &Name,
        values: &[Value],
        multiple: bool,
        skip_protected: bool,
    ) -> Option<&PropertyDefinition> {
        let defs = self.property_definitions(primary, mixins);
        let eligible = |def: &&PropertyDefinition| {
            def.multiple == multiple && (!skip_protected || !def.protected) && def.accepts(values)
        };
        let named: Vec<&PropertyDefinition> = defs
            .iter()
            .copied()
            .filter(|d| d.name == *name)
            .filter(eligible)
            .collect();
        if let Some(def) = pick_by_type(&named, values) {
            return Some(def);
        }
        let residual: Vec<&PropertyDefinition> = defs
            .iter()
            .copied()
            .filter(|d| d.is_residual())
            .filter(eligible)
            .collect();
        pick_by_type(&residual, values)
    }

    /// Finds the definition admitting a child `child` of type `child_primary`
    /// as the `sns_count`-th sibling of that name.
    ///
    /// With no explicit child type, only definitions that declare a default
    /// primary type qualify.
    pub fn find_child_node_definition(
        &self,
        primary: &Name,
        mixins: &[Name],
        child: &Name,
        child_primary: Option<&Name>,
        sns_count: usize,
        skip_protected: bool,
    ) -> Option<&NodeDefinition> {
        let defs = self.child_node_definitions(primary, mixins);
        let eligible = |def: &&NodeDefinition| {
            (!skip_protected || !def.protected)
                && (sns_count <= 1 || def.same_name_siblings)
                && match child_primary {
                    Some(pt) => def
                        .required_primary_types
                        .iter()
                        .all(|req| self.is_node_type(pt.as_str(), req.as_str())),
                    None => def.default_primary_type.is_some(),
                }
        };
        defs.iter()
            .copied()
            .filter(|d| d.name == *child)
            .find(&eligible)
            .or_else(|| defs.iter().copied().filter(|d| d.is_residual()).find(&eligible))
    }

    pub fn property_definition(&self, id: &PropertyDefinitionId) -> Option<&PropertyDefinition> {
        self.types.get(&id.declaring_type)?.property_definitions.iter().find(|d| {
            d.name == id.name && d.required_type == id.required_type && d.multiple == id.multiple
        })
    }

    pub fn node_definition(&self, id: &NodeDefinitionId) -> Option<&NodeDefinition> {
        self.types
            .get(&id.declaring_type)?
            .child_node_definitions
            .iter()
            .find(|d| d.name == id.name)
    }
}

fn pick_by_type<'a>(
    candidates: &[&'a PropertyDefinition],
    values: &[Value],
) -> Option<&'a PropertyDefinition> {
    let value_type = values.first().map(Value::property_type);
    candidates
        .iter()
        .find(|d| Some(d.required_type) == value_type)
        .or_else(|| {
            candidates
                .iter()
                .find(|d| d.required_type == PropertyType::Undefined)
        })
        .or_else(|| candidates.first())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::*;
    use crate::nodetype::OnParentVersion;

    fn n(s: &str) -> Name {
        Name::from(s)
    }

    #[test]
    fn test_builtins_are_registered() {
        let reg = NodeTypeRegistry::with_builtins();
        for name in [NT_BASE, NT_UNSTRUCTURED, MIX_VERSIONABLE, MIX_LOCKABLE, ARBOR_ROOT] {
            assert!(reg.contains(name), "missing {name}");
        }
    }

    #[test]
    fn test_supertypes_are_transitive() {
        let reg = NodeTypeRegistry::with_builtins();
        assert!(reg.is_node_type(MIX_VERSIONABLE, MIX_REFERENCEABLE));
        assert!(reg.is_node_type(MIX_VERSIONABLE, MIX_SIMPLE_VERSIONABLE));
        assert!(reg.is_node_type(NT_FOLDER, NT_BASE));
        assert!(!reg.is_node_type(NT_UNSTRUCTURED, MIX_REFERENCEABLE));
        assert!(reg.is_any(&n(NT_UNSTRUCTURED), &[n(MIX_VERSIONABLE)], MIX_REFERENCEABLE));
    }

    #[test]
    fn test_register_rejects_duplicates_and_unknown_supertypes() {
        let mut reg = NodeTypeRegistry::with_builtins();
        let err = reg.register(NodeType::primary(NT_BASE)).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateNodeType { .. }));
        let err = reg
            .register(NodeType::primary("test:orphan").supertypes(&["test:missing"]))
            .unwrap_err();
        assert!(matches!(err, CoreError::NoSuchNodeType { .. }));
    }

    #[test]
    fn test_named_property_definition_wins_over_residual() {
        let mut reg = NodeTypeRegistry::with_builtins();
        reg.register(
            NodeType::primary("test:doc")
                .supertypes(&[NT_UNSTRUCTURED])
                .property(PropertyDefinition::new("size", PropertyType::Long)),
        )
        .unwrap();
        let def = reg
            .find_property_definition(&n("test:doc"), &[], &n("size"), &[Value::from("3")], false, true)
            .unwrap();
        assert_eq!(def.declaring_type, "test:doc");
        assert_eq!(def.required_type, PropertyType::Long);

        // Uncastable values fall through to the residual definition.
        let def = reg
            .find_property_definition(&n("test:doc"), &[], &n("size"), &[Value::from("big")], false, true)
            .unwrap();
        assert!(def.is_residual());
    }

    #[test]
    fn test_protected_definitions_can_be_skipped() {
        let reg = NodeTypeRegistry::with_builtins();
        let values = [Value::Boolean(true)];
        let name = n(JCR_IS_CHECKED_OUT);
        let primary = n(NT_UNSTRUCTURED);
        let mixins = [n(MIX_VERSIONABLE)];
        let def = reg
            .find_property_definition(&primary, &mixins, &name, &values, false, false)
            .unwrap();
        assert!(def.protected);
        assert_eq!(def.on_parent_version, OnParentVersion::Ignore);
        // With protection enforced, the residual definition of nt:unstructured applies.
        let def = reg
            .find_property_definition(&primary, &mixins, &name, &values, false, true)
            .unwrap();
        assert!(def.is_residual());
    }

    #[test]
    fn test_child_definition_respects_sns_and_required_types() {
        let reg = NodeTypeRegistry::with_builtins();
        let folder = n(NT_FOLDER);
        let file = n(NT_FILE);
        let unstructured = n(NT_UNSTRUCTURED);

        assert!(reg
            .find_child_node_definition(&folder, &[], &n("doc"), Some(&file), 1, true)
            .is_some());
        // nt:folder children must be hierarchy nodes.
        assert!(reg
            .find_child_node_definition(&folder, &[], &n("doc"), Some(&unstructured), 1, true)
            .is_none());
        // nt:folder does not allow same-name siblings.
        assert!(reg
            .find_child_node_definition(&folder, &[], &n("doc"), Some(&file), 2, true)
            .is_none());
        // nt:unstructured does.
        assert!(reg
            .find_child_node_definition(&unstructured, &[], &n("x"), None, 3, true)
            .is_some());
    }

    #[test]
    fn test_definition_ids_round_trip_through_registry() {
        let reg = NodeTypeRegistry::with_builtins();
        let def = reg
            .find_child_node_definition(&n(NT_FILE), &[], &n(JCR_CONTENT), Some(&n(NT_RESOURCE)), 1, true)
            .unwrap();
        assert_eq!(reg.node_definition(&def.id()), Some(def));

        let pdef = reg
            .find_property_definition(&n(NT_RESOURCE), &[], &n(JCR_DATA), &[Value::Binary(vec![1])], false, true)
            .unwrap();
        assert_eq!(reg.property_definition(&pdef.id()), Some(pdef));
    }
}
