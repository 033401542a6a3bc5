//! The persisted shape of a node.
//!
//! Primary type and mixins are ordinary properties (`jcr:primaryType`,
//! `jcr:mixinTypes`); the document itself only knows its identifier, parent,
//! name, properties and ordered children.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use arbor_core::lexicon::{JCR_MIXIN_TYPES, JCR_PRIMARY_TYPE};
use arbor_core::{Name, NodeKey, PropertyData, Segment};

/// Reference from a parent to one of its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRef {
    pub key: NodeKey,
    pub name: Name,
}

/// A stored node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub key: NodeKey,
    /// `None` only for a workspace root.
    pub parent: Option<NodeKey>,
    /// Empty for a workspace root.
    pub name: Name,
    pub properties: IndexMap<Name, PropertyData>,
    pub children: Vec<ChildRef>,
}

impl NodeDocument {
    pub fn new(key: NodeKey, parent: Option<NodeKey>, name: Name) -> Self {
        NodeDocument {
            key,
            parent,
            name,
            properties: IndexMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: PropertyData) -> Self {
        self.properties.insert(property.name.clone(), property);
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyData> {
        self.properties.get(name)
    }

    pub fn primary_type(&self) -> Option<&Name> {
        self.property(JCR_PRIMARY_TYPE)?.first()?.as_name()
    }

    pub fn mixin_types(&self) -> Vec<Name> {
        self.property(JCR_MIXIN_TYPES)
            .map(PropertyData::names)
            .unwrap_or_default()
    }

    /// 1-based same-name-sibling index of `child` among this node's children.
    pub fn child_index(&self, child: &NodeKey) -> Option<u32> {
        let entry = self.children.iter().find(|c| c.key == *child)?;
        let position = self
            .children
            .iter()
            .filter(|c| c.name == entry.name)
            .position(|c| c.key == *child)?;
        Some(position as u32 + 1)
    }

    /// The child addressed by `segment` (name plus SNS index).
    pub fn child_by_segment(&self, segment: &Segment) -> Option<&ChildRef> {
        self.children
            .iter()
            .filter(|c| c.name == *segment.name())
            .nth(segment.index() as usize - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::Value;

    fn doc_with_children(names: &[&str]) -> (NodeDocument, Vec<NodeKey>) {
        let mut doc = NodeDocument::new(NodeKey::new(), None, Name::from(""));
        let mut keys = Vec::new();
        for name in names {
            let key = NodeKey::new();
            doc.children.push(ChildRef {
                key,
                name: Name::from(*name),
            });
            keys.push(key);
        }
        (doc, keys)
    }

    #[test]
    fn test_same_name_sibling_indexes() {
        let (doc, keys) = doc_with_children(&["a", "b", "a", "a"]);
        assert_eq!(doc.child_index(&keys[0]), Some(1));
        assert_eq!(doc.child_index(&keys[1]), Some(1));
        assert_eq!(doc.child_index(&keys[2]), Some(2));
        assert_eq!(doc.child_index(&keys[3]), Some(3));
        assert_eq!(doc.child_index(&NodeKey::new()), None);
    }

    #[test]
    fn test_lookup_by_segment() {
        let (doc, keys) = doc_with_children(&["a", "b", "a"]);
        let second_a = Segment::new(Name::from("a"), 2);
        assert_eq!(doc.child_by_segment(&second_a).map(|c| c.key), Some(keys[2]));
        let third_a = Segment::new(Name::from("a"), 3);
        assert!(doc.child_by_segment(&third_a).is_none());
    }

    #[test]
    fn test_type_accessors_read_properties() {
        let doc = NodeDocument::new(NodeKey::new(), None, Name::from("n"))
            .with_property(PropertyData::single(
                JCR_PRIMARY_TYPE,
                Value::Name(Name::from("nt:unstructured")),
            ))
            .with_property(PropertyData::multi(
                JCR_MIXIN_TYPES,
                arbor_core::PropertyType::Name,
                vec![Value::Name(Name::from("mix:referenceable"))],
            ));
        assert_eq!(doc.primary_type().map(Name::as_str), Some("nt:unstructured"));
        assert_eq!(doc.mixin_types(), vec![Name::from("mix:referenceable")]);
    }
}
