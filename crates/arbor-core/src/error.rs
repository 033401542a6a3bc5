//! Core error types for arbor-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! malformed names and paths, value conversion failures, and node-type
//! registration problems.

use thiserror::Error;

use crate::value::PropertyType;

/// Core errors produced by the arbor-core crate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A name contains illegal characters or is empty.
    #[error("invalid name: '{name}' ({reason})")]
    InvalidName { name: String, reason: String },

    /// A path string could not be parsed or resolved.
    #[error("invalid path: '{path}' ({reason})")]
    InvalidPath { path: String, reason: String },

    /// An identifier string is not a valid node key.
    #[error("invalid identifier: '{id}'")]
    InvalidIdentifier { id: String },

    /// A value cannot be converted to the requested property type.
    #[error("cannot convert {from} value '{value}' to {to}")]
    ValueFormat {
        from: PropertyType,
        to: PropertyType,
        value: String,
    },

    /// A node type name was not found in the registry.
    #[error("no such node type: '{name}'")]
    NoSuchNodeType { name: String },

    /// Attempting to register a node type name that already exists.
    #[error("duplicate node type: '{name}'")]
    DuplicateNodeType { name: String },
}
