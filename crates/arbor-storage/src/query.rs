//! Query command builder.
//!
//! Queries are built with [`Query`], producing a [`QueryCommand`] that a
//! [`GraphStore`](crate::GraphStore) evaluates against one workspace and
//! answers with [`QueryRow`]s. Only the lookups the session layer needs are
//! supported: referrers of a set of identifiers, nodes of a type, and nodes
//! whose property holds a value.

use std::collections::BTreeSet;

use arbor_core::{Name, NodeKey, Value};

use crate::document::NodeDocument;

/// Entry point of the builder DSL.
pub struct Query;

impl Query {
    /// Nodes holding a reference to any of `targets`.
    pub fn referrers_of(targets: impl IntoIterator<Item = NodeKey>) -> ReferrersQuery {
        ReferrersQuery {
            targets: targets.into_iter().collect(),
            strong_only: false,
        }
    }

    /// Nodes whose primary type or mixins name `type_name` directly.
    pub fn nodes_of_type(type_name: &str) -> QueryCommand {
        QueryCommand::NodesOfType {
            type_name: Name::from(type_name),
        }
    }

    /// Nodes whose property `name` holds `value`.
    pub fn property_equals(name: &str, value: Value) -> QueryCommand {
        QueryCommand::PropertyEquals {
            name: Name::from(name),
            value,
        }
    }
}

/// Builder for [`QueryCommand::ReferrersOf`].
#[derive(Debug, Clone)]
pub struct ReferrersQuery {
    targets: BTreeSet<NodeKey>,
    strong_only: bool,
}

impl ReferrersQuery {
    /// Ignore weak references.
    pub fn strong_only(mut self) -> Self {
        self.strong_only = true;
        self
    }

    pub fn build(self) -> QueryCommand {
        QueryCommand::ReferrersOf {
            targets: self.targets,
            strong_only: self.strong_only,
        }
    }
}

impl From<ReferrersQuery> for QueryCommand {
    fn from(q: ReferrersQuery) -> Self {
        q.build()
    }
}

/// An executable query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryCommand {
    ReferrersOf {
        targets: BTreeSet<NodeKey>,
        strong_only: bool,
    },
    NodesOfType {
        type_name: Name,
    },
    PropertyEquals {
        name: Name,
        value: Value,
    },
}

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    pub node: NodeKey,
    /// The matching property, for property-based queries.
    pub property: Option<Name>,
    /// The referenced node, for reference queries.
    pub target: Option<NodeKey>,
}

impl QueryCommand {
    /// Rows contributed by a single document.
    pub fn evaluate(&self, doc: &NodeDocument) -> Vec<QueryRow> {
        match self {
            QueryCommand::ReferrersOf {
                targets,
                strong_only,
            } => {
                let mut rows = Vec::new();
                for property in doc.properties.values() {
                    for value in &property.values {
                        let target = match value {
                            Value::Reference(k) => *k,
                            Value::WeakReference(k) if !strong_only => *k,
                            _ => continue,
                        };
                        if targets.contains(&target) {
                            rows.push(QueryRow {
                                node: doc.key,
                                property: Some(property.name.clone()),
                                target: Some(target),
                            });
                        }
                    }
                }
                rows
            }
            QueryCommand::NodesOfType { type_name } => {
                let typed = doc.primary_type() == Some(type_name)
                    || doc.mixin_types().contains(type_name);
                if typed {
                    vec![QueryRow {
                        node: doc.key,
                        property: None,
                        target: None,
                    }]
                } else {
                    Vec::new()
                }
            }
            QueryCommand::PropertyEquals { name, value } => {
                let hit = doc
                    .property(name.as_str())
                    .map(|p| p.values.contains(value))
                    .unwrap_or(false);
                if hit {
                    vec![QueryRow {
                        node: doc.key,
                        property: Some(name.clone()),
                        target: None,
                    }]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::lexicon::JCR_MIXIN_TYPES;
    use arbor_core::{PropertyData, PropertyType};

    fn referrer(target: NodeKey, weak: bool) -> NodeDocument {
        let value = if weak {
            Value::WeakReference(target)
        } else {
            Value::Reference(target)
        };
        NodeDocument::new(NodeKey::new(), None, Name::from("r"))
            .with_property(PropertyData::single("ref", value))
    }

    #[test]
    fn test_referrers_honor_strong_only() {
        let target = NodeKey::new();
        let weak = referrer(target, true);
        let all: QueryCommand = Query::referrers_of([target]).into();
        let strong = Query::referrers_of([target]).strong_only().build();
        assert_eq!(all.evaluate(&weak).len(), 1);
        assert!(strong.evaluate(&weak).is_empty());
        let row = &strong.evaluate(&referrer(target, false))[0];
        assert_eq!(row.target, Some(target));
        assert_eq!(row.property.as_ref().map(Name::as_str), Some("ref"));
    }

    #[test]
    fn test_nodes_of_type_matches_mixins() {
        let doc = NodeDocument::new(NodeKey::new(), None, Name::from("n")).with_property(
            PropertyData::multi(
                JCR_MIXIN_TYPES,
                PropertyType::Name,
                vec![Value::Name(Name::from("mix:lockable"))],
            ),
        );
        assert_eq!(Query::nodes_of_type("mix:lockable").evaluate(&doc).len(), 1);
        assert!(Query::nodes_of_type("mix:versionable").evaluate(&doc).is_empty());
    }

    #[test]
    fn test_property_equals() {
        let doc = NodeDocument::new(NodeKey::new(), None, Name::from("n"))
            .with_property(PropertyData::single("color", Value::from("red")));
        assert_eq!(Query::property_equals("color", Value::from("red")).evaluate(&doc).len(), 1);
        assert!(Query::property_equals("color", Value::from("blue")).evaluate(&doc).is_empty());
    }
}
