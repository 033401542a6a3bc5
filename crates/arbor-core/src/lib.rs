pub mod builtin;
pub mod error;
pub mod id;
pub mod lexicon;
pub mod name;
pub mod nodetype;
pub mod path;
pub mod property;
pub mod registry;
pub mod value;

// Re-export commonly used types
pub use error::CoreError;
pub use id::NodeKey;
pub use name::Name;
pub use nodetype::{
    NodeDefinition, NodeDefinitionId, NodeType, OnParentVersion, PropertyDefinition,
    PropertyDefinitionId,
};
pub use path::{Path, Segment};
pub use property::PropertyData;
pub use registry::NodeTypeRegistry;
pub use value::{PropertyType, Value};
