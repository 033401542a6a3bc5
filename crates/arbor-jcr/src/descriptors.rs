//! Read-only repository descriptors.

use std::collections::BTreeMap;

use crate::config::RepositoryConfig;

pub const SPEC_VERSION_DESC: &str = "jcr.specification.version";
pub const SPEC_NAME_DESC: &str = "jcr.specification.name";
pub const REP_NAME_DESC: &str = "jcr.repository.name";
pub const REP_VENDOR_DESC: &str = "jcr.repository.vendor";
pub const REP_VERSION_DESC: &str = "jcr.repository.version";
pub const OPTION_VERSIONING_SUPPORTED: &str = "option.versioning.supported";
pub const OPTION_SIMPLE_VERSIONING_SUPPORTED: &str = "option.simple.versioning.supported";
pub const OPTION_LOCKING_SUPPORTED: &str = "option.locking.supported";
pub const OPTION_WORKSPACE_MANAGEMENT_SUPPORTED: &str = "option.workspace.management.supported";
pub const OPTION_QUERY_SQL_SUPPORTED: &str = "option.query.sql.supported";
pub const OPTION_OBSERVATION_SUPPORTED: &str = "option.observation.supported";
pub const OPTION_XML_IMPORT_SUPPORTED: &str = "option.xml.import.supported";
pub const OPTION_XML_EXPORT_SUPPORTED: &str = "option.xml.export.supported";
pub const OPTION_TRANSACTIONS_SUPPORTED: &str = "option.transactions.supported";
pub const IDENTIFIER_STABILITY: &str = "identifier.stability";
pub const NODE_TYPE_MANAGEMENT_SAME_NAME_SIBLINGS_SUPPORTED: &str =
    "node.type.management.same.name.siblings.supported";
pub const NODE_TYPE_MANAGEMENT_ORDERABLE_CHILD_NODES_SUPPORTED: &str =
    "node.type.management.orderable.child.nodes.supported";
pub const ARBOR_REFERENTIAL_INTEGRITY: &str = "arbor.referential.integrity";
pub const ARBOR_HISTORY_LAYOUT: &str = "arbor.version.history.layout";

/// Capability flags and identity strings of a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptors {
    values: BTreeMap<String, String>,
}

impl Descriptors {
    pub fn new(config: &RepositoryConfig) -> Self {
        let flag = |b: bool| if b { "true" } else { "false" };
        let entries = [
            (SPEC_VERSION_DESC, "2.0"),
            (SPEC_NAME_DESC, "Content Repository for Java Technology API"),
            (REP_NAME_DESC, config.name.as_str()),
            (REP_VENDOR_DESC, "arbor"),
            (REP_VERSION_DESC, env!("CARGO_PKG_VERSION")),
            (OPTION_VERSIONING_SUPPORTED, "true"),
            (OPTION_SIMPLE_VERSIONING_SUPPORTED, "false"),
            (OPTION_LOCKING_SUPPORTED, "true"),
            (OPTION_WORKSPACE_MANAGEMENT_SUPPORTED, "true"),
            (OPTION_QUERY_SQL_SUPPORTED, "false"),
            (OPTION_OBSERVATION_SUPPORTED, "false"),
            (OPTION_XML_IMPORT_SUPPORTED, "false"),
            (OPTION_XML_EXPORT_SUPPORTED, "false"),
            (OPTION_TRANSACTIONS_SUPPORTED, "false"),
            (IDENTIFIER_STABILITY, "identifier.stability.indefinite.duration"),
            (NODE_TYPE_MANAGEMENT_SAME_NAME_SIBLINGS_SUPPORTED, "true"),
            (NODE_TYPE_MANAGEMENT_ORDERABLE_CHILD_NODES_SUPPORTED, "true"),
            (ARBOR_REFERENTIAL_INTEGRITY, flag(config.referential_integrity)),
        ];
        let mut values: BTreeMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        values.insert(ARBOR_HISTORY_LAYOUT.to_string(), config.history_layout.to_string());
        Descriptors { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// True if the descriptor exists and reads `true`.
    pub fn is_true(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflects_configuration() {
        let config = RepositoryConfig {
            name: "docs".to_string(),
            referential_integrity: false,
            ..RepositoryConfig::default()
        };
        let descriptors = Descriptors::new(&config);
        assert_eq!(descriptors.get(REP_NAME_DESC), Some("docs"));
        assert_eq!(descriptors.get(SPEC_VERSION_DESC), Some("2.0"));
        assert!(descriptors.is_true(OPTION_VERSIONING_SUPPORTED));
        assert!(descriptors.is_true(OPTION_LOCKING_SUPPORTED));
        assert!(!descriptors.is_true(ARBOR_REFERENTIAL_INTEGRITY));
        assert_eq!(descriptors.get(ARBOR_HISTORY_LAYOUT), Some("hierarchical"));
        assert!(descriptors.get("no.such.key").is_none());
        assert!(descriptors.keys().any(|k| k == IDENTIFIER_STABILITY));
    }
}
