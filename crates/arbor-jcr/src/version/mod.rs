//! Versioning: check-in/check-out, histories, labels, restore and merge.
//!
//! # Architecture
//!
//! Version storage is an ordinary tree in the system workspace (see
//! [`path`]). Each versionable node has one `nt:versionHistory` holding an
//! `nt:version` per check-in, each with a frozen snapshot of the node.
//!
//! Writes to version storage never go through a session overlay. They are
//! collected by a `HistoryWriter` and executed together with the live-node
//! property updates in a single multi-workspace batch, so a check-in either
//! lands completely or not at all.
//!
//! Restore and merge run on a private overlay spawned from the session. The
//! overlay is written in one batch and the session then re-reads storage.

pub(crate) mod frozen;
pub(crate) mod history;
pub(crate) mod merge;
pub mod path;
pub(crate) mod restore;
pub(crate) mod storage;

use std::sync::Arc;

use arbor_core::lexicon::{
    JCR_BASE_VERSION, JCR_FROZEN_NODE, JCR_IS_CHECKED_OUT, JCR_MERGE_FAILED, JCR_PREDECESSORS,
    JCR_ROOT_VERSION, JCR_VERSION_HISTORY, MIX_SIMPLE_VERSIONABLE, MIX_VERSIONABLE,
};
use arbor_core::value::now_millis;
use arbor_core::{Name, NodeKey, PropertyData, PropertyType, Value};
use arbor_storage::{Batch, NodeDocument, WorkspaceBatch};

use crate::error::{RepositoryError, Result};
use crate::repository::lock_store;
use crate::session::cache::SessionCache;
use crate::session::{parse_absolute, Session};

pub use frozen::{FrozenNode, VersionedItem};
pub use history::{VersionHistory, VersionRecord};
pub use path::{version_storage_path, HistoryLayout};

use frozen::{load_frozen, Freezer};
use merge::Merger;
use restore::Restorer;
use storage::{load_history, load_version, version_name, HistoryWriter};

fn reference(doc: &NodeDocument, name: &str) -> Option<NodeKey> {
    doc.property(name)
        .and_then(PropertyData::first)
        .and_then(Value::as_key)
}

fn references(name: &str, keys: &[NodeKey]) -> PropertyData {
    PropertyData::multi(
        name,
        PropertyType::Reference,
        keys.iter().copied().map(Value::Reference).collect(),
    )
}

/// Versioning operations of one session.
pub struct VersionManager<'s> {
    session: &'s Session,
}

impl<'s> VersionManager<'s> {
    pub(crate) fn new(session: &'s Session) -> Self {
        VersionManager { session }
    }

    fn node_key(&self, path: &str) -> Result<NodeKey> {
        self.session.ensure_live()?;
        let path = parse_absolute(path)?;
        self.session.cache().find_by_path(&path)
    }

    fn load_history(&self, key: &NodeKey) -> Result<VersionHistory> {
        let guard = lock_store(self.session.repository().store());
        load_history(&**guard, key)
    }

    /// The history of the versionable node `key`.
    fn history_of(&self, cache: &mut SessionCache, key: &NodeKey) -> Result<VersionHistory> {
        require_versionable(cache, key)?;
        let history = reference(cache.node(key)?, JCR_VERSION_HISTORY).ok_or_else(|| {
            RepositoryError::InvalidItemState(format!(
                "{} has no version history until it is saved",
                cache.path_of(key)
                    .map(|p| p.to_string())
                    .unwrap_or_else(|_| key.to_string())
            ))
        })?;
        self.load_history(&history)
    }

    /// Writes properties of a saved node straight to storage and mirrors them
    /// into the session overlay.
    fn write_live(&self, cache: &mut SessionCache, key: &NodeKey, set: Vec<PropertyData>, removed: &[&str]) -> Result<()> {
        let mut batch = Batch::new();
        batch.set_properties(*key, set.clone());
        if !removed.is_empty() {
            batch.remove_properties(*key, removed.iter().map(|n| Name::from(*n)).collect());
        }
        lock_store(self.session.repository().store()).execute(self.session.workspace_name(), batch)?;
        cache.absorb(key, &set, removed);
        Ok(())
    }

    fn ensure_no_pending_changes(&self) -> Result<()> {
        if self.session.has_pending_changes() {
            return Err(RepositoryError::InvalidItemState(
                "the session has unsaved changes".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves a private overlay in one batch and makes the session re-read
    /// storage. Returns the number of operations written.
    fn commit(&self, mut work: SessionCache) -> Result<usize> {
        let batch = work.build_batch()?;
        let operations = batch.len();
        if !batch.is_empty() {
            lock_store(self.session.repository().store())
                .execute_all(vec![WorkspaceBatch::new(self.session.workspace_name(), batch)])?;
        }
        self.session.cache().refresh(true);
        Ok(operations)
    }

    // -------------------------------------------------------------------
    // Check-in and check-out
    // -------------------------------------------------------------------

    /// Creates a new version of the node at `path` and checks it in. A node
    /// that is already checked in returns its base version.
    pub fn checkin(&self, path: &str) -> Result<VersionRecord> {
        let key = self.node_key(path)?;
        let mut cache = self.session.cache();
        require_versionable(&mut cache, &key)?;
        self.session.check_lock_with(&mut cache, &key)?;
        if cache.has_pending_changes_at_or_below(&key)? {
            return Err(RepositoryError::InvalidItemState(format!(
                "{} has unsaved changes",
                path
            )));
        }
        let doc = cache.node(&key)?.clone();
        let merge_failed = doc
            .property(JCR_MERGE_FAILED)
            .map(|p| !p.values.is_empty())
            .unwrap_or(false);
        if merge_failed {
            return Err(RepositoryError::Version(format!(
                "{} has unresolved merge failures",
                path
            )));
        }
        let history = self.history_of(&mut cache, &key)?;
        if !own_checked_out(&doc) {
            let base = reference(&doc, JCR_BASE_VERSION)
                .and_then(|base| history.record(&base).cloned())
                .ok_or_else(|| {
                    RepositoryError::Version(format!("{} has no base version", path))
                })?;
            return Ok(base);
        }

        let predecessors = doc
            .property(JCR_PREDECESSORS)
            .map(PropertyData::keys)
            .unwrap_or_default();
        let created = history
            .latest()
            .map(|latest| now_millis().max(latest.created + 1))
            .unwrap_or_else(now_millis);
        let version = NodeKey::new();
        let mut writer = HistoryWriter::new(self.session.repository().config().history_layout);
        writer.add_version(&history, version, version_name(created), created, &predecessors)?;
        Freezer::new(&mut cache, writer.batch_mut()).freeze(
            &key,
            version,
            Name::from(JCR_FROZEN_NODE),
        )?;

        let live = vec![
            references(JCR_PREDECESSORS, &[]),
            PropertyData::single(JCR_BASE_VERSION, Value::Reference(version)),
            PropertyData::single(JCR_IS_CHECKED_OUT, Value::Boolean(false)),
        ];
        let mut content = Batch::new();
        content.set_properties(key, live.clone());
        lock_store(self.session.repository().store()).execute_all(vec![
            WorkspaceBatch::new(self.session.workspace_name(), content),
            writer.into_batch(),
        ])?;
        cache.absorb(&key, &live, &[]);
        drop(cache);

        let record = {
            let guard = lock_store(self.session.repository().store());
            load_version(&**guard, &version, history.key)?
        };
        tracing::info!(node = %key, version = %record.name, "checked in");
        Ok(record)
    }

    /// Makes the node at `path` writable again.
    pub fn checkout(&self, path: &str) -> Result<()> {
        let key = self.node_key(path)?;
        let mut cache = self.session.cache();
        require_versionable(&mut cache, &key)?;
        self.session.check_lock_with(&mut cache, &key)?;
        let doc = cache.node(&key)?.clone();
        if own_checked_out(&doc) {
            return Ok(());
        }
        let Some(base) = reference(&doc, JCR_BASE_VERSION) else {
            return Ok(());
        };
        let mut predecessors = vec![base];
        for existing in doc
            .property(JCR_PREDECESSORS)
            .map(PropertyData::keys)
            .unwrap_or_default()
        {
            if !predecessors.contains(&existing) {
                predecessors.push(existing);
            }
        }
        self.write_live(
            &mut cache,
            &key,
            vec![
                references(JCR_PREDECESSORS, &predecessors),
                PropertyData::single(JCR_IS_CHECKED_OUT, Value::Boolean(true)),
            ],
            &[],
        )?;
        tracing::debug!(node = %key, "checked out");
        Ok(())
    }

    /// Checks the node in and immediately out again.
    pub fn checkpoint(&self, path: &str) -> Result<VersionRecord> {
        let version = self.checkin(path)?;
        self.checkout(path)?;
        Ok(version)
    }

    pub fn is_checked_out(&self, path: &str) -> Result<bool> {
        let key = self.node_key(path)?;
        self.session.cache().is_checked_out(&key)
    }

    // -------------------------------------------------------------------
    // Histories
    // -------------------------------------------------------------------

    pub fn version_history(&self, path: &str) -> Result<VersionHistory> {
        let key = self.node_key(path)?;
        let mut cache = self.session.cache();
        self.history_of(&mut cache, &key)
    }

    pub fn base_version(&self, path: &str) -> Result<VersionRecord> {
        let key = self.node_key(path)?;
        let mut cache = self.session.cache();
        let history = self.history_of(&mut cache, &key)?;
        let base = reference(cache.node(&key)?, JCR_BASE_VERSION)
            .ok_or_else(|| RepositoryError::Version(format!("{} has no base version", path)))?;
        history
            .record(&base)
            .cloned()
            .ok_or_else(|| RepositoryError::Version(format!("base version {} is missing", base)))
    }

    /// The frozen snapshot stored with `version`.
    pub fn frozen_node(&self, version: &VersionRecord) -> Result<FrozenNode> {
        self.session.ensure_live()?;
        let frozen = version.frozen.ok_or_else(|| {
            RepositoryError::Version(format!("version {} has no frozen node", version.name))
        })?;
        let guard = lock_store(self.session.repository().store());
        load_frozen(&**guard, &frozen)
    }

    // -------------------------------------------------------------------
    // Restore
    // -------------------------------------------------------------------

    /// Restores the node at `path` to its version named `version_name`.
    pub fn restore(&self, path: &str, version_name: &str, remove_existing: bool) -> Result<()> {
        self.ensure_no_pending_changes()?;
        if version_name == JCR_ROOT_VERSION {
            return Err(RepositoryError::Version(
                "the root version cannot be restored".to_string(),
            ));
        }
        let key = self.node_key(path)?;
        let history = {
            let mut cache = self.session.cache();
            self.history_of(&mut cache, &key)?
        };
        let version = history.version(version_name).cloned().ok_or_else(|| {
            RepositoryError::Version(format!("{} has no version named {}", path, version_name))
        })?;
        self.restore_version(path, &version, remove_existing)
    }

    /// Restores `version` at `path`. If nothing exists at `path` the node is
    /// recreated there under its original identifier.
    pub fn restore_version(&self, path: &str, version: &VersionRecord, remove_existing: bool) -> Result<()> {
        self.restore_with_label(path, version, remove_existing, None)
    }

    fn restore_with_label(
        &self,
        path: &str,
        version: &VersionRecord,
        remove_existing: bool,
        label: Option<&str>,
    ) -> Result<()> {
        self.ensure_no_pending_changes()?;
        self.session.ensure_live()?;
        let history = self.load_history(&version.history)?;
        if version.key == history.root {
            return Err(RepositoryError::Version(
                "the root version cannot be restored".to_string(),
            ));
        }
        let target = parse_absolute(path)?;
        let mut work = self.session.cache().spawn();
        let existing = match work.find_by_path(&target) {
            Ok(key) => Some(key),
            Err(RepositoryError::PathNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let restored = match existing {
            Some(key) => {
                self.session.check_lock_with(&mut work, &key)?;
                Restorer::new(&mut work, remove_existing)
                    .with_label(label)
                    .restore_existing(key, version)?;
                key
            }
            None => {
                let parent_path = target.parent().ok_or_else(|| {
                    RepositoryError::InvalidPath(format!("{} has no parent", path))
                })?;
                let name = target.name().cloned().ok_or_else(|| {
                    RepositoryError::InvalidPath(format!("{} has no name", path))
                })?;
                let parent = work.find_by_path(&parent_path)?;
                self.session.check_lock_with(&mut work, &parent)?;
                Restorer::new(&mut work, remove_existing)
                    .with_label(label)
                    .restore_missing(parent, name, version)?
            }
        };
        let operations = self.commit(work)?;
        tracing::info!(node = %restored, version = %version.name, operations, "restored");
        Ok(())
    }

    /// Restores several versions together. At least one must belong to a
    /// node that exists in the workspace; the others are placed by the
    /// snapshots of their restored ancestors.
    pub fn restore_all(&self, versions: &[VersionRecord], remove_existing: bool) -> Result<()> {
        self.ensure_no_pending_changes()?;
        self.session.ensure_live()?;
        let mut work = self.session.cache().spawn();
        let mut targets = Vec::with_capacity(versions.len());
        for version in versions {
            let history = self.load_history(&version.history)?;
            if version.key == history.root {
                return Err(RepositoryError::Version(
                    "the root version cannot be restored".to_string(),
                ));
            }
            targets.push((history.versionable, version));
        }
        let mut rooted = Vec::new();
        for (key, version) in &targets {
            if work.is_visible(key)? {
                rooted.push((*key, *version));
            }
        }
        if rooted.is_empty() {
            return Err(RepositoryError::Version(
                "none of the versions belongs to a node in this workspace".to_string(),
            ));
        }
        for (key, _) in &rooted {
            self.session.check_lock_with(&mut work, key)?;
        }
        {
            let mut restorer = Restorer::new(&mut work, remove_existing).with_versions(versions);
            for (key, version) in &rooted {
                restorer.restore_existing(*key, version)?;
            }
        }
        for (key, version) in &targets {
            if !work.is_visible(key)? {
                return Err(RepositoryError::Version(format!(
                    "version {} has no place in the restored tree",
                    version.name
                )));
            }
        }
        let operations = self.commit(work)?;
        tracing::info!(versions = versions.len(), operations, "restored version set");
        Ok(())
    }

    /// Restores the version carrying `label` in the history of the node at
    /// `path`. Versioned children prefer versions with the same label.
    pub fn restore_by_label(&self, path: &str, label: &str, remove_existing: bool) -> Result<()> {
        let key = self.node_key(path)?;
        let history = {
            let mut cache = self.session.cache();
            self.history_of(&mut cache, &key)?
        };
        let version = history.version_by_label(label).cloned().ok_or_else(|| {
            RepositoryError::Version(format!("no version of {} is labelled {}", path, label))
        })?;
        self.restore_with_label(path, &version, remove_existing, Some(label))
    }

    // -------------------------------------------------------------------
    // Labels
    // -------------------------------------------------------------------

    /// Attaches `label` to version `version_name` of the node at `path`. A
    /// label already on another version moves only when `move_label` is set.
    pub fn add_version_label(
        &self,
        path: &str,
        version_name: &str,
        label: &str,
        move_label: bool,
    ) -> Result<()> {
        Name::parse(label)?;
        let key = self.node_key(path)?;
        let history = {
            let mut cache = self.session.cache();
            self.history_of(&mut cache, &key)?
        };
        let version = history.version(version_name).ok_or_else(|| {
            RepositoryError::Version(format!("{} has no version named {}", path, version_name))
        })?;
        match history.labels().get(label) {
            Some(current) if *current == version.key => return Ok(()),
            Some(_) if !move_label => {
                return Err(RepositoryError::Version(format!(
                    "label {} is already in use in the history of {}",
                    label, path
                )));
            }
            _ => {}
        }
        let mut writer = HistoryWriter::new(self.session.repository().config().history_layout);
        writer.set_label(&history, label, Some(version.key))?;
        lock_store(self.session.repository().store()).execute_all(vec![writer.into_batch()])?;
        tracing::debug!(label, version = %version.name, "label set");
        Ok(())
    }

    pub fn remove_version_label(&self, path: &str, label: &str) -> Result<()> {
        let key = self.node_key(path)?;
        let history = {
            let mut cache = self.session.cache();
            self.history_of(&mut cache, &key)?
        };
        if !history.labels().contains_key(label) {
            return Err(RepositoryError::Version(format!(
                "no version of {} is labelled {}",
                path, label
            )));
        }
        let mut writer = HistoryWriter::new(self.session.repository().config().history_layout);
        writer.set_label(&history, label, None)?;
        lock_store(self.session.repository().store()).execute_all(vec![writer.into_batch()])?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Merge
    // -------------------------------------------------------------------

    /// Merges the subtree at `path` from workspace `source_workspace`.
    /// Returns the nodes whose merge failed (only in best-effort mode; a
    /// conflict is an error otherwise).
    pub fn merge(
        &self,
        path: &str,
        source_workspace: &str,
        best_effort: bool,
        shallow: bool,
    ) -> Result<Vec<NodeKey>> {
        self.ensure_no_pending_changes()?;
        let repository = self.session.repository();
        if !repository.has_workspace(source_workspace)? {
            return Err(RepositoryError::NoSuchWorkspace(source_workspace.to_string()));
        }
        let key = self.node_key(path)?;
        let mut target = self.session.cache().spawn();
        self.session.check_lock_with(&mut target, &key)?;
        let source = SessionCache::new(
            source_workspace,
            self.session.user_id(),
            Arc::clone(repository.store()),
            Arc::clone(repository.registry()),
        )?;
        let failed = Merger::new(&mut target, source, best_effort, shallow).run(key)?;
        let operations = self.commit(target)?;
        tracing::info!(
            node = %key,
            source = source_workspace,
            failed = failed.len(),
            operations,
            "merged"
        );
        Ok(failed)
    }

    /// Accepts `version` as a merge result: it leaves `jcr:mergeFailed` and
    /// becomes an additional predecessor.
    pub fn done_merge(&self, path: &str, version: &VersionRecord) -> Result<()> {
        self.resolve_merge(path, version, true)
    }

    /// Drops `version` from `jcr:mergeFailed` without recording it.
    pub fn cancel_merge(&self, path: &str, version: &VersionRecord) -> Result<()> {
        self.resolve_merge(path, version, false)
    }

    fn resolve_merge(&self, path: &str, version: &VersionRecord, accept: bool) -> Result<()> {
        let key = self.node_key(path)?;
        let mut cache = self.session.cache();
        require_versionable(&mut cache, &key)?;
        self.session.check_lock_with(&mut cache, &key)?;
        let doc = cache.node(&key)?.clone();
        if !own_checked_out(&doc) {
            return Err(RepositoryError::Version(format!("{} is checked in", path)));
        }
        let mut failed = doc
            .property(JCR_MERGE_FAILED)
            .map(PropertyData::keys)
            .unwrap_or_default();
        if !failed.contains(&version.key) {
            return Err(RepositoryError::Version(format!(
                "version {} is not a failed merge of {}",
                version.name, path
            )));
        }
        failed.retain(|k| *k != version.key);

        let mut set = Vec::new();
        let mut removed = Vec::new();
        if failed.is_empty() {
            removed.push(JCR_MERGE_FAILED);
        } else {
            set.push(references(JCR_MERGE_FAILED, &failed));
        }
        if accept {
            let mut predecessors = doc
                .property(JCR_PREDECESSORS)
                .map(PropertyData::keys)
                .unwrap_or_default();
            if !predecessors.contains(&version.key) {
                predecessors.push(version.key);
            }
            set.push(references(JCR_PREDECESSORS, &predecessors));
        }
        self.write_live(&mut cache, &key, set, &removed)?;
        tracing::info!(node = %key, version = %version.name, accept, "merge resolved");
        Ok(())
    }
}

fn require_versionable(cache: &mut SessionCache, key: &NodeKey) -> Result<()> {
    if cache.is_node_type(key, MIX_VERSIONABLE)? || cache.is_node_type(key, MIX_SIMPLE_VERSIONABLE)? {
        return Ok(());
    }
    Err(RepositoryError::UnsupportedOperation(format!(
        "{} is not versionable",
        cache.path_of(key)?
    )))
}

fn own_checked_out(doc: &NodeDocument) -> bool {
    doc.property(JCR_IS_CHECKED_OUT)
        .and_then(PropertyData::first)
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::repository::Repository;
    use arbor_storage::InMemoryStore;

    fn versioned() -> (Arc<Repository>, Session) {
        let repo = Repository::open(RepositoryConfig::default(), InMemoryStore::new()).unwrap();
        let session = repo.login("alice", None).unwrap();
        let doc = session.root_node().unwrap().add_node("doc").unwrap();
        doc.add_mixin("mix:versionable").unwrap();
        doc.set_property("title", "draft").unwrap();
        session.save().unwrap();
        (repo, session)
    }

    #[test]
    fn test_save_creates_history_with_root_version() {
        let (_repo, session) = versioned();
        let vm = session.version_manager();
        let history = vm.version_history("/doc").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(vm.base_version("/doc").unwrap().key, history.root);
        assert!(vm.is_checked_out("/doc").unwrap());
    }

    #[test]
    fn test_checkin_freezes_and_blocks_writes() {
        let (_repo, session) = versioned();
        let vm = session.version_manager();
        let v1 = vm.checkin("/doc").unwrap();
        assert!(!vm.is_checked_out("/doc").unwrap());
        let history = vm.version_history("/doc").unwrap();
        assert_eq!(v1.predecessors, vec![history.root]);
        assert!(history.is_successor_of(&v1.key, &history.root));

        let frozen = vm.frozen_node(&v1).unwrap();
        assert_eq!(frozen.frozen_uuid, session.node("/doc").unwrap().key());
        assert_eq!(
            frozen.property("title").and_then(PropertyData::first),
            Some(&Value::from("draft"))
        );

        let doc = session.node("/doc").unwrap();
        assert!(matches!(doc.set_property("title", "x"), Err(RepositoryError::Version(_))));
        assert_eq!(vm.checkin("/doc").unwrap().key, v1.key);
    }

    #[test]
    fn test_checkin_with_pending_changes_fails() {
        let (_repo, session) = versioned();
        session.node("/doc").unwrap().set_property("title", "edited").unwrap();
        assert!(matches!(
            session.version_manager().checkin("/doc"),
            Err(RepositoryError::InvalidItemState(_))
        ));
    }

    #[test]
    fn test_checkout_prepends_base_version() {
        let (_repo, session) = versioned();
        let vm = session.version_manager();
        let v1 = vm.checkin("/doc").unwrap();
        vm.checkout("/doc").unwrap();
        let preds = session
            .node("/doc")
            .unwrap()
            .property("jcr:predecessors")
            .unwrap()
            .values()
            .unwrap();
        assert_eq!(preds, vec![Value::Reference(v1.key)]);
        vm.checkout("/doc").unwrap();
    }

    #[test]
    fn test_root_version_cannot_be_restored() {
        let (_repo, session) = versioned();
        assert!(matches!(
            session.version_manager().restore("/doc", "jcr:rootVersion", false),
            Err(RepositoryError::Version(_))
        ));
    }

    #[test]
    fn test_labels() {
        let (_repo, session) = versioned();
        let vm = session.version_manager();
        let v1 = vm.checkpoint("/doc").unwrap();
        let v2 = vm.checkpoint("/doc").unwrap();
        vm.add_version_label("/doc", v1.name.as_str(), "stable", false).unwrap();
        assert!(matches!(
            vm.add_version_label("/doc", v2.name.as_str(), "stable", false),
            Err(RepositoryError::Version(_))
        ));
        vm.add_version_label("/doc", v2.name.as_str(), "stable", true).unwrap();
        let history = vm.version_history("/doc").unwrap();
        assert_eq!(history.version_by_label("stable").map(|v| v.key), Some(v2.key));
        vm.remove_version_label("/doc", "stable").unwrap();
        assert!(matches!(
            vm.remove_version_label("/doc", "stable"),
            Err(RepositoryError::Version(_))
        ));
    }

    #[test]
    fn test_non_versionable_node() {
        let repo = Repository::open(RepositoryConfig::default(), InMemoryStore::new()).unwrap();
        let session = repo.login("alice", None).unwrap();
        session.root_node().unwrap().add_node("plain").unwrap();
        session.save().unwrap();
        assert!(matches!(
            session.version_manager().checkin("/plain"),
            Err(RepositoryError::UnsupportedOperation(_))
        ));
    }
}
