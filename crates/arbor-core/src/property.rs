//! Property payloads shared by the storage layer and the session cache.

use serde::{Deserialize, Serialize};

use crate::id::NodeKey;
use crate::name::Name;
use crate::value::{PropertyType, Value};

/// A named property: type tag, cardinality and ordered values.
///
/// `multiple` is persisted explicitly so that a multi-valued property holding
/// zero or one value keeps its cardinality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyData {
    pub name: Name,
    pub ty: PropertyType,
    pub multiple: bool,
    pub values: Vec<Value>,
}

impl PropertyData {
    /// Single-valued property typed after its value.
    pub fn single(name: impl Into<Name>, value: Value) -> Self {
        PropertyData {
            name: name.into(),
            ty: value.property_type(),
            multiple: false,
            values: vec![value],
        }
    }

    /// Multi-valued property of the given type.
    pub fn multi(name: impl Into<Name>, ty: PropertyType, values: Vec<Value>) -> Self {
        PropertyData {
            name: name.into(),
            ty,
            multiple: true,
            values,
        }
    }

    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    /// Targets of strong `Reference` values.
    pub fn strong_references(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.values.iter().filter_map(|v| match v {
            Value::Reference(k) => Some(*k),
            _ => None,
        })
    }

    /// Names held by a `Name` property (e.g. `jcr:mixinTypes`).
    pub fn names(&self) -> Vec<Name> {
        self.values
            .iter()
            .filter_map(|v| v.as_name().cloned())
            .collect()
    }

    /// Keys held by a reference property.
    pub fn keys(&self) -> Vec<NodeKey> {
        self.values.iter().filter_map(Value::as_key).collect()
    }
}
