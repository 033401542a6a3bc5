//! Node type model: node types, property definitions and child node
//! definitions.
//!
//! Definitions are identified by [`PropertyDefinitionId`] and
//! [`NodeDefinitionId`], which the session cache stores next to items so the
//! constraints of an item (protection, `OnParentVersion` action) can be
//! re-derived through the registry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::name::Name;
use crate::value::{PropertyType, Value};

/// Policy governing how an item is treated when its parent is checked in
/// or restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnParentVersion {
    Copy,
    Version,
    Initialize,
    Compute,
    Ignore,
    Abort,
}

impl fmt::Display for OnParentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OnParentVersion::Copy => "COPY",
            OnParentVersion::Version => "VERSION",
            OnParentVersion::Initialize => "INITIALIZE",
            OnParentVersion::Compute => "COMPUTE",
            OnParentVersion::Ignore => "IGNORE",
            OnParentVersion::Abort => "ABORT",
        };
        f.write_str(s)
    }
}

impl FromStr for OnParentVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "COPY" => OnParentVersion::Copy,
            "VERSION" => OnParentVersion::Version,
            "INITIALIZE" => OnParentVersion::Initialize,
            "COMPUTE" => OnParentVersion::Compute,
            "IGNORE" => OnParentVersion::Ignore,
            "ABORT" => OnParentVersion::Abort,
            _ => {
                return Err(CoreError::InvalidName {
                    name: s.to_string(),
                    reason: "unknown on-parent-version action".to_string(),
                })
            }
        })
    }
}

/// Identity of a property definition within the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyDefinitionId {
    pub declaring_type: Name,
    pub name: Name,
    pub required_type: PropertyType,
    pub multiple: bool,
}

/// Identity of a child node definition within the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDefinitionId {
    pub declaring_type: Name,
    pub name: Name,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub declaring_type: Name,
    /// Item name, or `*` for a residual definition.
    pub name: Name,
    pub required_type: PropertyType,
    pub multiple: bool,
    pub protected: bool,
    pub mandatory: bool,
    pub auto_created: bool,
    pub default_values: Vec<Value>,
    /// Allowed literal values (string form); empty means unconstrained.
    pub value_constraints: Vec<String>,
    pub on_parent_version: OnParentVersion,
}

impl PropertyDefinition {
    pub fn new(name: &str, required_type: PropertyType) -> Self {
        PropertyDefinition {
            declaring_type: Name::from(""),
            name: Name::from(name),
            required_type,
            multiple: false,
            protected: false,
            mandatory: false,
            auto_created: false,
            default_values: Vec::new(),
            value_constraints: Vec::new(),
            on_parent_version: OnParentVersion::Copy,
        }
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn auto_created(mut self, defaults: Vec<Value>) -> Self {
        self.auto_created = true;
        self.default_values = defaults;
        self
    }

    pub fn defaults(mut self, defaults: Vec<Value>) -> Self {
        self.default_values = defaults;
        self
    }

    pub fn constraints(mut self, allowed: &[&str]) -> Self {
        self.value_constraints = allowed.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn opv(mut self, action: OnParentVersion) -> Self {
        self.on_parent_version = action;
        self
    }

    pub fn id(&self) -> PropertyDefinitionId {
        PropertyDefinitionId {
            declaring_type: self.declaring_type.clone(),
            name: self.name.clone(),
            required_type: self.required_type,
            multiple: self.multiple,
        }
    }

    pub fn is_residual(&self) -> bool {
        self.name.is_residual()
    }

    /// True if every value can be cast to the required type and passes the
    /// value constraints.
    pub fn accepts(&self, values: &[Value]) -> bool {
        values.iter().all(|v| match v.convert(self.required_type) {
            Ok(cast) => {
                self.value_constraints.is_empty()
                    || self.value_constraints.contains(&cast.to_string())
            }
            Err(_) => false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub declaring_type: Name,
    /// Child name, or `*` for a residual definition.
    pub name: Name,
    pub required_primary_types: Vec<Name>,
    pub default_primary_type: Option<Name>,
    pub same_name_siblings: bool,
    pub protected: bool,
    pub mandatory: bool,
    pub auto_created: bool,
    pub on_parent_version: OnParentVersion,
}

impl NodeDefinition {
    pub fn new(name: &str, required: &[&str]) -> Self {
        NodeDefinition {
            declaring_type: Name::from(""),
            name: Name::from(name),
            required_primary_types: required.iter().map(|s| Name::from(*s)).collect(),
            default_primary_type: None,
            same_name_siblings: false,
            protected: false,
            mandatory: false,
            auto_created: false,
            on_parent_version: OnParentVersion::Copy,
        }
    }

    pub fn default_type(mut self, ty: &str) -> Self {
        self.default_primary_type = Some(Name::from(ty));
        self
    }

    pub fn sns(mut self) -> Self {
        self.same_name_siblings = true;
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn auto_created(mut self) -> Self {
        self.auto_created = true;
        self
    }

    pub fn opv(mut self, action: OnParentVersion) -> Self {
        self.on_parent_version = action;
        self
    }

    pub fn id(&self) -> NodeDefinitionId {
        NodeDefinitionId {
            declaring_type: self.declaring_type.clone(),
            name: self.name.clone(),
        }
    }

    pub fn is_residual(&self) -> bool {
        self.name.is_residual()
    }
}

/// A primary or mixin node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeType {
    pub name: Name,
    pub supertypes: Vec<Name>,
    pub mixin: bool,
    pub is_abstract: bool,
    pub orderable: bool,
    pub primary_item: Option<Name>,
    pub property_definitions: Vec<PropertyDefinition>,
    pub child_node_definitions: Vec<NodeDefinition>,
}

impl NodeType {
    pub fn primary(name: &str) -> Self {
        NodeType {
            name: Name::from(name),
            supertypes: Vec::new(),
            mixin: false,
            is_abstract: false,
            orderable: false,
            primary_item: None,
            property_definitions: Vec::new(),
            child_node_definitions: Vec::new(),
        }
    }

    pub fn mixin(name: &str) -> Self {
        NodeType {
            mixin: true,
            ..NodeType::primary(name)
        }
    }

    pub fn supertypes(mut self, names: &[&str]) -> Self {
        self.supertypes = names.iter().map(|s| Name::from(*s)).collect();
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn orderable(mut self) -> Self {
        self.orderable = true;
        self
    }

    pub fn primary_item(mut self, name: &str) -> Self {
        self.primary_item = Some(Name::from(name));
        self
    }

    /// Adds a property definition declared by this type.
    pub fn property(mut self, mut def: PropertyDefinition) -> Self {
        def.declaring_type = self.name.clone();
        self.property_definitions.push(def);
        self
    }

    /// Adds a child node definition declared by this type.
    pub fn child(mut self, mut def: NodeDefinition) -> Self {
        def.declaring_type = self.name.clone();
        self.child_node_definitions.push(def);
        self
    }
}
