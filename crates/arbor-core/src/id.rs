//! Stable node identifiers.
//!
//! Every node in every workspace is keyed by a [`NodeKey`], a UUID that stays
//! fixed for the lifetime of the node. Corresponding nodes in different
//! workspaces share the same key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Stable node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(pub Uuid);

impl NodeKey {
    /// Generates a fresh random key.
    pub fn new() -> Self {
        NodeKey(Uuid::new_v4())
    }

    /// Parses a hyphenated UUID string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Uuid::parse_str(s.trim())
            .map(NodeKey)
            .map_err(|_| CoreError::InvalidIdentifier { id: s.to_string() })
    }
}

impl Default for NodeKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKey::parse(s)
    }
}

impl From<Uuid> for NodeKey {
    fn from(uuid: Uuid) -> Self {
        NodeKey(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse_roundtrip() {
        let key = NodeKey::new();
        let parsed: NodeKey = key.to_string().parse().unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn test_fresh_keys_are_distinct() {
        assert_ne!(NodeKey::new(), NodeKey::new());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = NodeKey::parse("not-a-uuid").unwrap_err();
        assert!(matches!(err, CoreError::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_serde_is_a_plain_string() {
        let key = NodeKey::parse("8f0a3a4e-6f43-4c8e-9a51-0d8b8f3e2a10").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"8f0a3a4e-6f43-4c8e-9a51-0d8b8f3e2a10\"");
    }
}
