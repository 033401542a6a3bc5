//! Built-in node types.
//!
//! Order matters: supertypes are listed before the types that extend them.

use crate::lexicon::*;
use crate::nodetype::{NodeDefinition, NodeType, OnParentVersion, PropertyDefinition};
use crate::value::{PropertyType, Value};

use OnParentVersion::{Abort, Compute, Ignore, Initialize, Version};

pub fn node_types() -> Vec<NodeType> {
    vec![
        NodeType::primary(NT_BASE)
            .abstract_type()
            .property(
                PropertyDefinition::new(JCR_PRIMARY_TYPE, PropertyType::Name)
                    .mandatory()
                    .auto_created(vec![])
                    .protected()
                    .opv(Compute),
            )
            .property(
                PropertyDefinition::new(JCR_MIXIN_TYPES, PropertyType::Name)
                    .multiple()
                    .protected()
                    .opv(Compute),
            ),
        NodeType::mixin(MIX_REFERENCEABLE).property(
            PropertyDefinition::new(JCR_UUID, PropertyType::String)
                .mandatory()
                .auto_created(vec![])
                .protected()
                .opv(Initialize),
        ),
        NodeType::mixin(MIX_CREATED)
            .property(
                PropertyDefinition::new(JCR_CREATED, PropertyType::Date)
                    .auto_created(vec![])
                    .protected(),
            )
            .property(
                PropertyDefinition::new(JCR_CREATED_BY, PropertyType::String)
                    .auto_created(vec![])
                    .protected(),
            ),
        NodeType::mixin(MIX_LAST_MODIFIED)
            .property(PropertyDefinition::new(JCR_LAST_MODIFIED, PropertyType::Date).auto_created(vec![]))
            .property(PropertyDefinition::new(JCR_LAST_MODIFIED_BY, PropertyType::String).auto_created(vec![])),
        NodeType::mixin(MIX_TITLE)
            .property(PropertyDefinition::new(JCR_TITLE, PropertyType::String))
            .property(PropertyDefinition::new(JCR_DESCRIPTION, PropertyType::String)),
        NodeType::mixin(MIX_LOCKABLE)
            .property(
                PropertyDefinition::new(JCR_LOCK_OWNER, PropertyType::String)
                    .protected()
                    .opv(Ignore),
            )
            .property(
                PropertyDefinition::new(JCR_LOCK_IS_DEEP, PropertyType::Boolean)
                    .protected()
                    .opv(Ignore),
            ),
        NodeType::mixin(MIX_SIMPLE_VERSIONABLE).property(
            PropertyDefinition::new(JCR_IS_CHECKED_OUT, PropertyType::Boolean)
                .mandatory()
                .auto_created(vec![Value::Boolean(true)])
                .protected()
                .opv(Ignore),
        ),
        NodeType::mixin(MIX_VERSIONABLE)
            .supertypes(&[MIX_SIMPLE_VERSIONABLE, MIX_REFERENCEABLE])
            .property(
                PropertyDefinition::new(JCR_VERSION_HISTORY, PropertyType::Reference)
                    .mandatory()
                    .protected()
                    .opv(Ignore),
            )
            .property(
                PropertyDefinition::new(JCR_BASE_VERSION, PropertyType::Reference)
                    .mandatory()
                    .protected()
                    .opv(Ignore),
            )
            .property(
                PropertyDefinition::new(JCR_PREDECESSORS, PropertyType::Reference)
                    .multiple()
                    .mandatory()
                    .protected()
                    .opv(Ignore),
            )
            .property(
                PropertyDefinition::new(JCR_MERGE_FAILED, PropertyType::Reference)
                    .multiple()
                    .protected()
                    .opv(Abort),
            ),
        NodeType::primary(NT_UNSTRUCTURED)
            .supertypes(&[NT_BASE])
            .orderable()
            .property(PropertyDefinition::new(RESIDUAL, PropertyType::Undefined))
            .property(PropertyDefinition::new(RESIDUAL, PropertyType::Undefined).multiple())
            .child(
                NodeDefinition::new(RESIDUAL, &[NT_BASE])
                    .default_type(NT_UNSTRUCTURED)
                    .sns()
                    .opv(Version),
            ),
        NodeType::primary(NT_HIERARCHY_NODE)
            .supertypes(&[NT_BASE, MIX_CREATED])
            .abstract_type(),
        NodeType::primary(NT_FOLDER)
            .supertypes(&[NT_HIERARCHY_NODE])
            .child(NodeDefinition::new(RESIDUAL, &[NT_HIERARCHY_NODE]).opv(Version)),
        NodeType::primary(NT_FILE)
            .supertypes(&[NT_HIERARCHY_NODE])
            .primary_item(JCR_CONTENT)
            .child(NodeDefinition::new(JCR_CONTENT, &[NT_BASE]).mandatory()),
        NodeType::primary(NT_RESOURCE)
            .supertypes(&[NT_BASE, MIX_LAST_MODIFIED])
            .primary_item(JCR_DATA)
            .property(PropertyDefinition::new(JCR_DATA, PropertyType::Binary).mandatory())
            .property(PropertyDefinition::new(JCR_MIMETYPE, PropertyType::String))
            .property(PropertyDefinition::new(JCR_ENCODING, PropertyType::String)),
        NodeType::primary(ARBOR_ROOT)
            .supertypes(&[NT_BASE, MIX_REFERENCEABLE])
            .orderable()
            .property(PropertyDefinition::new(RESIDUAL, PropertyType::Undefined))
            .property(PropertyDefinition::new(RESIDUAL, PropertyType::Undefined).multiple())
            .child(
                NodeDefinition::new(RESIDUAL, &[NT_BASE])
                    .default_type(NT_UNSTRUCTURED)
                    .sns()
                    .opv(Version),
            ),
        NodeType::primary(NT_VERSION_LABELS)
            .supertypes(&[NT_BASE])
            .property(
                PropertyDefinition::new(RESIDUAL, PropertyType::Reference)
                    .protected()
                    .opv(Abort),
            ),
        NodeType::primary(NT_FROZEN_NODE)
            .supertypes(&[NT_BASE, MIX_REFERENCEABLE])
            .orderable()
            .property(PropertyDefinition::new(JCR_FROZEN_PRIMARY_TYPE, PropertyType::Name).protected().opv(Abort))
            .property(
                PropertyDefinition::new(JCR_FROZEN_MIXIN_TYPES, PropertyType::Name)
                    .multiple()
                    .protected()
                    .opv(Abort),
            )
            .property(PropertyDefinition::new(JCR_FROZEN_UUID, PropertyType::String).protected().opv(Abort))
            .property(PropertyDefinition::new(RESIDUAL, PropertyType::Undefined).protected().opv(Abort))
            .property(
                PropertyDefinition::new(RESIDUAL, PropertyType::Undefined)
                    .multiple()
                    .protected()
                    .opv(Abort),
            )
            .child(NodeDefinition::new(RESIDUAL, &[NT_BASE]).sns().protected().opv(Abort)),
        NodeType::primary(NT_VERSIONED_CHILD)
            .supertypes(&[NT_BASE])
            .property(
                PropertyDefinition::new(JCR_CHILD_VERSION_HISTORY, PropertyType::Reference)
                    .mandatory()
                    .protected()
                    .opv(Abort),
            ),
        NodeType::primary(NT_VERSION)
            .supertypes(&[NT_BASE, MIX_REFERENCEABLE])
            .property(PropertyDefinition::new(JCR_CREATED, PropertyType::Date).protected().opv(Abort))
            .property(
                PropertyDefinition::new(JCR_PREDECESSORS, PropertyType::Reference)
                    .multiple()
                    .protected()
                    .opv(Abort),
            )
            .property(
                PropertyDefinition::new(JCR_SUCCESSORS, PropertyType::Reference)
                    .multiple()
                    .protected()
                    .opv(Abort),
            )
            .child(NodeDefinition::new(JCR_FROZEN_NODE, &[NT_FROZEN_NODE]).protected().opv(Abort)),
        NodeType::primary(NT_VERSION_HISTORY)
            .supertypes(&[NT_BASE, MIX_REFERENCEABLE])
            .property(PropertyDefinition::new(JCR_VERSIONABLE_UUID, PropertyType::String).protected().opv(Abort))
            .child(
                NodeDefinition::new(JCR_ROOT_VERSION, &[NT_VERSION])
                    .mandatory()
                    .protected()
                    .opv(Abort),
            )
            .child(
                NodeDefinition::new(JCR_VERSION_LABELS, &[NT_VERSION_LABELS])
                    .mandatory()
                    .protected()
                    .opv(Abort),
            )
            .child(NodeDefinition::new(RESIDUAL, &[NT_VERSION]).protected().opv(Abort)),
        NodeType::primary(ARBOR_HISTORY_FOLDER)
            .supertypes(&[NT_BASE])
            .child(NodeDefinition::new(RESIDUAL, &[NT_BASE]).protected().opv(Abort)),
        NodeType::primary(ARBOR_VERSION_STORAGE)
            .supertypes(&[NT_BASE])
            .child(NodeDefinition::new(RESIDUAL, &[NT_BASE]).protected().opv(Abort)),
        NodeType::primary(ARBOR_SYSTEM)
            .supertypes(&[NT_BASE])
            .child(
                NodeDefinition::new(JCR_VERSION_STORAGE, &[ARBOR_VERSION_STORAGE])
                    .protected()
                    .opv(Ignore),
            ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_supertypes_precede_subtypes() {
        let mut seen = HashSet::new();
        for ty in node_types() {
            for sup in &ty.supertypes {
                assert!(seen.contains(sup.as_str()), "{} listed before {}", ty.name, sup);
            }
            seen.insert(ty.name.to_string());
        }
    }
}
