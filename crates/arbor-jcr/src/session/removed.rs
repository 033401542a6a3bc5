//! Persisted nodes removed in a session but not yet saved.

use indexmap::IndexMap;

use arbor_core::{NodeKey, Path};

#[derive(Debug, Clone)]
struct Removal {
    path: Path,
    ancestors: Vec<NodeKey>,
    subtree: Vec<NodeKey>,
}

/// Tops of removed subtrees, keyed by identifier in removal order.
///
/// Each entry remembers the ancestor chain the node had when it was removed
/// and every key that went with it. Recording a node folds in each entry that
/// had it as an ancestor, so the set only ever holds subtree tops. Two
/// entries may share a path when same-name siblings are removed in turn.
#[derive(Debug, Clone, Default)]
pub struct RemovedNodes {
    entries: IndexMap<NodeKey, Removal>,
}

impl RemovedNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key`, removed from `path` while sitting below `ancestors`
    /// (nearest parent first) together with the keys in `subtree`.
    pub fn record(
        &mut self,
        key: NodeKey,
        path: Path,
        ancestors: Vec<NodeKey>,
        mut subtree: Vec<NodeKey>,
    ) {
        if ancestors.iter().any(|a| self.entries.contains_key(a)) {
            return;
        }
        let subsumed: Vec<NodeKey> = self
            .entries
            .iter()
            .filter(|(_, removal)| removal.ancestors.contains(&key))
            .map(|(k, _)| *k)
            .collect();
        for k in subsumed {
            if let Some(removal) = self.entries.shift_remove(&k) {
                subtree.extend(removal.subtree);
            }
        }
        self.entries.insert(
            key,
            Removal {
                path,
                ancestors,
                subtree,
            },
        );
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.entries.contains_key(key)
    }

    /// True if some recorded node was removed from beneath `path`.
    pub fn any_below(&self, path: &Path) -> bool {
        self.entries.values().any(|r| r.path.is_descendant_of(path))
    }

    /// Recorded keys in removal order.
    pub fn keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeKey, &Path)> {
        self.entries.iter().map(|(k, r)| (k, &r.path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keys removed along with `key`, if it is recorded.
    pub fn subtree(&self, key: &NodeKey) -> Option<&[NodeKey]> {
        self.entries.get(key).map(|r| r.subtree.as_slice())
    }

    /// Un-records `key`, returning every key that was removed with it.
    pub(crate) fn take(&mut self, key: &NodeKey) -> Option<Vec<NodeKey>> {
        self.entries.shift_remove(key).map(|r| r.subtree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn test_ancestor_subsumes_descendants() {
        let mut removed = RemovedNodes::new();
        let (root, a, b) = (NodeKey::new(), NodeKey::new(), NodeKey::new());
        let (c, x, z) = (NodeKey::new(), NodeKey::new(), NodeKey::new());
        removed.record(c, p("/a/b/c"), vec![b, a, root], vec![c]);
        removed.record(x, p("/a/x"), vec![a, root], vec![x]);
        removed.record(z, p("/z"), vec![root], vec![z]);
        removed.record(a, p("/a"), vec![root], vec![a, b]);

        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&a));
        assert!(removed.contains(&z));
        assert!(!removed.contains(&c));
        let mut folded = removed.subtree(&a).unwrap().to_vec();
        folded.sort();
        let mut expected = vec![a, b, c, x];
        expected.sort();
        assert_eq!(folded, expected);
        assert!(removed.any_below(&Path::root()));
        assert!(!removed.any_below(&p("/a")));
    }

    #[test]
    fn test_descendant_of_recorded_key_is_ignored() {
        let mut removed = RemovedNodes::new();
        let (root, a) = (NodeKey::new(), NodeKey::new());
        removed.record(a, p("/a"), vec![root], vec![a]);
        removed.record(NodeKey::new(), p("/a/b"), vec![a, root], vec![]);
        assert_eq!(removed.len(), 1);
    }

    #[test]
    fn test_same_name_siblings_are_both_recorded() {
        let mut removed = RemovedNodes::new();
        let root = NodeKey::new();
        let (first, second) = (NodeKey::new(), NodeKey::new());
        removed.record(first, p("/item"), vec![root], vec![first]);
        removed.record(second, p("/item"), vec![root], vec![second]);
        assert_eq!(removed.keys().collect::<Vec<_>>(), vec![first, second]);

        assert_eq!(removed.take(&first), Some(vec![first]));
        assert_eq!(removed.len(), 1);
        removed.clear();
        assert!(removed.is_empty());
    }
}
