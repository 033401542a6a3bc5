//! Identifier digests using blake3.
//!
//! Version histories are located by a digest of the versionable node's
//! identifier, so the digest must be stable across processes and backends.

use arbor_core::NodeKey;

/// Lowercase hex blake3 digest of a node identifier's string form.
pub fn identifier_digest(key: &NodeKey) -> String {
    blake3::hash(key.to_string().as_bytes()).to_hex().to_string()
}
