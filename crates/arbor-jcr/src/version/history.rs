//! In-memory view of a version history.
//!
//! Version records form a DAG through their predecessor/successor lists.
//! [`VersionHistory`] keeps the records in an arena keyed by identifier and
//! answers ancestry questions by building a `petgraph` graph over the
//! predecessor edges.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;

use arbor_core::{Name, NodeKey, Path};

/// One version in a history.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRecord {
    pub key: NodeKey,
    /// The history this version belongs to.
    pub history: NodeKey,
    pub name: Name,
    /// Creation time in milliseconds since the Unix epoch.
    pub created: i64,
    pub predecessors: Vec<NodeKey>,
    pub successors: Vec<NodeKey>,
    /// Frozen snapshot node under this version.
    pub frozen: Option<NodeKey>,
}

/// All versions of one versionable node.
#[derive(Debug, Clone)]
pub struct VersionHistory {
    pub key: NodeKey,
    /// Identifier of the versionable node.
    pub versionable: NodeKey,
    pub path: Path,
    pub root: NodeKey,
    pub(crate) labels_node: Option<NodeKey>,
    records: IndexMap<NodeKey, VersionRecord>,
    labels: BTreeMap<String, NodeKey>,
}

impl VersionHistory {
    pub(crate) fn new(
        key: NodeKey,
        versionable: NodeKey,
        path: Path,
        root: NodeKey,
        labels_node: Option<NodeKey>,
        mut records: Vec<VersionRecord>,
        labels: BTreeMap<String, NodeKey>,
    ) -> Self {
        records.sort_by(|a, b| {
            (a.key != root)
                .cmp(&(b.key != root))
                .then(a.created.cmp(&b.created))
                .then(a.name.cmp(&b.name))
        });
        VersionHistory {
            key,
            versionable,
            path,
            root,
            labels_node,
            records: records.into_iter().map(|r| (r.key, r)).collect(),
            labels,
        }
    }

    /// Versions in creation order, root version first.
    pub fn all_versions(&self) -> impl Iterator<Item = &VersionRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn root_version(&self) -> Option<&VersionRecord> {
        self.records.get(&self.root)
    }

    pub fn version(&self, name: &str) -> Option<&VersionRecord> {
        self.records.values().find(|r| r.name.as_str() == name)
    }

    pub fn record(&self, key: &NodeKey) -> Option<&VersionRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.records.contains_key(key)
    }

    /// The most recently created version.
    pub fn latest(&self) -> Option<&VersionRecord> {
        self.records.values().max_by_key(|r| r.created)
    }

    /// True if `later` is reachable from `earlier` through successor edges.
    /// A version is not its own successor.
    pub fn is_successor_of(&self, later: &NodeKey, earlier: &NodeKey) -> bool {
        if later == earlier || !self.contains(later) || !self.contains(earlier) {
            return false;
        }
        let mut graph: DiGraphMap<NodeKey, ()> = DiGraphMap::new();
        for record in self.records.values() {
            graph.add_node(record.key);
            for pred in &record.predecessors {
                graph.add_edge(*pred, record.key, ());
            }
            for succ in &record.successors {
                graph.add_edge(record.key, *succ, ());
            }
        }
        has_path_connecting(&graph, *earlier, *later, None)
    }

    /// Latest non-root version created at or before `time`, falling back to
    /// the root version.
    pub fn closest_before(&self, time: i64) -> Option<&VersionRecord> {
        self.records
            .values()
            .filter(|r| r.key != self.root && r.created <= time)
            .max_by_key(|r| r.created)
            .or_else(|| self.root_version())
    }

    /// `from` followed by its first predecessors back to the root version.
    pub fn linear_chain(&self, from: &NodeKey) -> Vec<NodeKey> {
        let mut chain = Vec::new();
        let mut current = Some(*from);
        while let Some(key) = current {
            if chain.contains(&key) {
                break;
            }
            let Some(record) = self.records.get(&key) else {
                break;
            };
            chain.push(key);
            current = record.predecessors.first().copied();
        }
        chain
    }

    pub fn labels(&self) -> &BTreeMap<String, NodeKey> {
        &self.labels
    }

    pub fn labels_of(&self, version: &NodeKey) -> Vec<&str> {
        self.labels
            .iter()
            .filter(|(_, target)| *target == version)
            .map(|(label, _)| label.as_str())
            .collect()
    }

    pub fn version_by_label(&self, label: &str) -> Option<&VersionRecord> {
        self.labels.get(label).and_then(|key| self.records.get(key))
    }
}
