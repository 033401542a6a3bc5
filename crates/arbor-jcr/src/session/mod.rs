//! Sessions: one user's transient view of one workspace.
//!
//! A [`Session`] owns a [`SessionCache`] overlay. Reads go through the
//! overlay; writes are recorded there until [`Session::save`] flushes them
//! (together with any new version histories) in one atomic write. The
//! [`Node`] and [`Property`] façades borrow the session and delegate to it.
//!
//! A session is single-threaded: its state sits in `RefCell`s and it is not
//! `Sync`. The [`Repository`] it came from is shared and thread-safe.

pub mod cache;
pub mod editor;
pub mod locking;
pub mod node;
pub mod pattern;
pub mod property;
pub mod removed;

use std::cell::{RefCell, RefMut};
use std::collections::BTreeSet;
use std::sync::Arc;

use arbor_core::value::now_millis;
use arbor_core::{Name, NodeKey, Path, Segment};
use arbor_storage::{Query, WorkspaceBatch};

use crate::concurrency::{LockError, SessionId};
use crate::error::{RepositoryError, Result};
use crate::repository::{lock_store, Repository};
use crate::version::storage::HistoryWriter;
use crate::version::VersionManager;

pub use cache::{NodeStatus, SessionCache};
pub use editor::Editor;
pub use locking::LockInfo;
pub use node::{CorrespondenceId, Node};
pub use pattern::NamePattern;
pub use property::Property;
pub use removed::RemovedNodes;

pub struct Session {
    id: SessionId,
    user: String,
    workspace: String,
    repository: Arc<Repository>,
    cache: RefCell<SessionCache>,
    lock_tokens: RefCell<BTreeSet<String>>,
    /// Dropped on logout; the session registry holds a weak handle.
    liveness: RefCell<Option<Arc<()>>>,
}

impl Session {
    pub(crate) fn new(repository: Arc<Repository>, user: &str, workspace: &str) -> Result<Self> {
        let cache = SessionCache::new(
            workspace,
            user,
            Arc::clone(repository.store()),
            Arc::clone(repository.registry()),
        )?;
        let liveness = Arc::new(());
        let id = repository.sessions().register(user, workspace, &liveness);
        Ok(Session {
            id,
            user: user.to_string(),
            workspace: workspace.to_string(),
            repository,
            cache: RefCell::new(cache),
            lock_tokens: RefCell::new(BTreeSet::new()),
            liveness: RefCell::new(Some(liveness)),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user
    }

    pub fn workspace_name(&self) -> &str {
        &self.workspace
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// False after [`logout`](Self::logout) or once the repository closes.
    pub fn is_live(&self) -> bool {
        self.liveness.borrow().is_some() && self.repository.is_open()
    }

    // -------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------

    pub fn root_node(&self) -> Result<Node<'_>> {
        self.ensure_live()?;
        let root = self.cache().root_key();
        Ok(Node::new(self, root))
    }

    /// The node at absolute path `path`.
    pub fn node(&self, path: &str) -> Result<Node<'_>> {
        self.ensure_live()?;
        let path = parse_absolute(path)?;
        let key = self.cache().find_by_path(&path)?;
        Ok(Node::new(self, key))
    }

    pub fn node_by_identifier(&self, identifier: &str) -> Result<Node<'_>> {
        self.ensure_live()?;
        let key = NodeKey::parse(identifier)
            .map_err(|_| RepositoryError::ItemNotFound(identifier.to_string()))?;
        self.cache().node(&key)?;
        Ok(Node::new(self, key))
    }

    /// The property at absolute path `path`.
    pub fn property(&self, path: &str) -> Result<Property<'_>> {
        self.ensure_live()?;
        let path = parse_absolute(path)?;
        let (parent, name) = split_item_path(&path)?;
        let key = self.cache().find_by_path(&parent)?;
        Node::new(self, key).property(name.as_str())
    }

    /// True if a node or property exists at absolute path `path`.
    pub fn item_exists(&self, path: &str) -> Result<bool> {
        self.ensure_live()?;
        let path = parse_absolute(path)?;
        match self.cache().find_by_path(&path) {
            Ok(_) => return Ok(true),
            Err(RepositoryError::PathNotFound(_)) | Err(RepositoryError::ItemNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let Ok((parent, name)) = split_item_path(&path) else {
            return Ok(false);
        };
        let mut cache = self.cache();
        match cache.find_by_path(&parent) {
            Ok(key) => Ok(cache.node(&key)?.property(name.as_str()).is_some()),
            Err(RepositoryError::PathNotFound(_)) | Err(RepositoryError::ItemNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Saved nodes whose primary type or one of whose mixins is exactly
    /// `node_type`.
    pub fn nodes_of_type(&self, node_type: &str) -> Result<Vec<Node<'_>>> {
        self.ensure_live()?;
        let rows = lock_store(self.repository.store())
            .query(&self.workspace, &Query::nodes_of_type(node_type))?;
        let mut cache = self.cache();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if cache.is_visible(&row.node)? {
                out.push(Node::new(self, row.node));
            }
        }
        Ok(out)
    }

    // -------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------

    /// Moves the node at `source` to `destination`. The destination's last
    /// segment may not carry an index.
    pub fn move_node(&self, source: &str, destination: &str) -> Result<()> {
        self.ensure_live()?;
        if destination.trim_end().ends_with(']') {
            return Err(RepositoryError::InvalidPath(format!(
                "destination {} may not end with an index",
                destination
            )));
        }
        let source = parse_absolute(source)?;
        let destination = parse_absolute(destination)?;
        let (parent_path, name) = split_item_path(&destination)?;
        let mut cache = self.cache();
        let key = cache.find_by_path(&source)?;
        let old_parent = cache.node(&key)?.parent.ok_or_else(|| {
            RepositoryError::ConstraintViolation("the root node cannot be moved".to_string())
        })?;
        let parent = cache.find_by_path(&parent_path)?;
        self.check_lock_with(&mut cache, &old_parent)?;
        self.check_lock_with(&mut cache, &parent)?;
        self.check_lock_with(&mut cache, &key)?;
        if let Some(def) = cache.node_definition(&key)? {
            if def.protected {
                return Err(RepositoryError::ConstraintViolation(format!(
                    "node {} is protected",
                    source
                )));
            }
        }
        cache.editor(&parent)?.move_to_be_child(&key, Some(name))
    }

    /// Removes the node or property at `path`.
    pub fn remove_item(&self, path: &str) -> Result<()> {
        self.ensure_live()?;
        let parsed = parse_absolute(path)?;
        let found = self.cache().find_by_path(&parsed);
        match found {
            Ok(key) => Node::new(self, key).remove(),
            Err(RepositoryError::PathNotFound(_)) => self.property(path)?.remove(),
            Err(e) => Err(e),
        }
    }

    // -------------------------------------------------------------------
    // Save and refresh
    // -------------------------------------------------------------------

    /// Writes every pending change in one atomic batch. On failure the
    /// pending changes are kept as they were.
    pub fn save(&self) -> Result<()> {
        self.ensure_live()?;
        let mut cache = self.cache();
        if !cache.has_pending_changes() {
            return Ok(());
        }
        let checkpoint = cache.checkpoint();
        let result = self.write_pending(&mut cache);
        if result.is_err() {
            cache.rollback(checkpoint);
        }
        result
    }

    fn write_pending(&self, cache: &mut SessionCache) -> Result<()> {
        let now = now_millis();
        cache.apply_auto_properties(now);

        let mut writer = HistoryWriter::new(self.repository.config().history_layout);
        let mut planned = Vec::new();
        for key in cache.versionables_without_history() {
            let (primary, mixins) = cache.types(&key)?;
            planned.push((key, primary, mixins));
        }
        if !planned.is_empty() {
            let assigned = {
                let guard = lock_store(self.repository.store());
                planned
                    .iter()
                    .map(|(key, primary, mixins)| {
                        writer
                            .initialize(&**guard, *key, primary, mixins, now)
                            .map(|ids| (*key, ids))
                    })
                    .collect::<Result<Vec<_>>>()?
            };
            for (key, (history, root)) in assigned {
                cache.assign_history(&key, history, root)?;
            }
        }

        cache.validate_mandatory()?;
        if self.repository.config().referential_integrity {
            cache.check_referential_integrity()?;
        }
        let batch = cache.build_batch()?;
        let operations = batch.len();
        let mut batches = vec![WorkspaceBatch::new(self.workspace.as_str(), batch)];
        if !writer.is_empty() {
            batches.push(writer.into_batch());
        }
        let outcomes = lock_store(self.repository.store()).execute_all(batches)?;
        cache.finish_save(outcomes.first());
        tracing::debug!(
            session = %self.id,
            workspace = %self.workspace,
            operations,
            histories = planned.len(),
            "session saved"
        );
        Ok(())
    }

    /// Discards cached state; with `keep_changes` pending edits survive.
    pub fn refresh(&self, keep_changes: bool) -> Result<()> {
        self.ensure_live()?;
        self.cache().refresh(keep_changes);
        Ok(())
    }

    pub fn has_pending_changes(&self) -> bool {
        self.cache().has_pending_changes()
    }

    pub fn workspace_names(&self) -> Result<Vec<String>> {
        self.ensure_live()?;
        self.repository.workspace_names()
    }

    // -------------------------------------------------------------------
    // Lock tokens
    // -------------------------------------------------------------------

    /// Takes over the open-scoped lock identified by `token`.
    pub fn add_lock_token(&self, token: &str) -> Result<()> {
        self.ensure_live()?;
        self.repository.locks().claim_token(token, &self.id)?;
        self.lock_tokens.borrow_mut().insert(token.to_string());
        Ok(())
    }

    /// Gives up this session's hold on `token`; the lock stays in place.
    pub fn remove_lock_token(&self, token: &str) -> Result<()> {
        self.ensure_live()?;
        self.repository.locks().release_token(token, &self.id)?;
        self.lock_tokens.borrow_mut().remove(token);
        Ok(())
    }

    /// Tokens of the open-scoped locks this session holds.
    pub fn lock_tokens(&self) -> Vec<String> {
        self.lock_tokens.borrow().iter().cloned().collect()
    }

    pub(crate) fn remember_token(&self, token: &str) {
        self.lock_tokens.borrow_mut().insert(token.to_string());
    }

    pub(crate) fn forget_token(&self, token: &str) {
        self.lock_tokens.borrow_mut().remove(token);
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    /// Releases session-scoped locks, drops pending changes and ends the
    /// session. Later calls fail with `SessionClosed`.
    pub fn logout(&self) {
        if self.liveness.borrow_mut().take().is_none() {
            return;
        }
        self.release();
        self.cache().refresh(false);
        tracing::info!(session = %self.id, user = %self.user, "logout");
    }

    fn release(&self) {
        for record in self.repository.locks().release_session(&self.id) {
            self.repository.clear_lock_properties(&record);
        }
        self.lock_tokens.borrow_mut().clear();
        self.repository.sessions().deregister(&self.id);
    }

    pub fn version_manager(&self) -> VersionManager<'_> {
        VersionManager::new(self)
    }

    // -------------------------------------------------------------------
    // Crate-internal helpers
    // -------------------------------------------------------------------

    /// The overlay. Borrows are never held across calls into other
    /// session methods.
    pub(crate) fn cache(&self) -> RefMut<'_, SessionCache> {
        self.cache.borrow_mut()
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.liveness.borrow().is_none() {
            return Err(RepositoryError::SessionClosed);
        }
        self.repository.ensure_open()?;
        self.repository.sessions().touch(&self.id);
        Ok(())
    }

    /// Fails if `key` is locked by a lock this session does not hold.
    pub(crate) fn check_lock_with(&self, cache: &mut SessionCache, key: &NodeKey) -> Result<()> {
        let lineage = cache.lineage(key)?;
        match self.repository.locks().lock_for(&self.workspace, &lineage) {
            Some(record) if !record.is_held_by(&self.id) => {
                Err(LockError::LockedByOther { node: *key }.into())
            }
            _ => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.liveness.get_mut().take().is_some() {
            self.release();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("workspace", &self.workspace)
            .finish()
    }
}

pub(crate) fn parse_absolute(path: &str) -> Result<Path> {
    let parsed = Path::parse(path)?;
    if !parsed.is_absolute() {
        return Err(RepositoryError::InvalidPath(format!(
            "expected an absolute path, got {}",
            path
        )));
    }
    Ok(parsed)
}

/// Splits an item path into its parent path and final name.
fn split_item_path(path: &Path) -> Result<(Path, Name)> {
    let segment: &Segment = path
        .last_segment()
        .ok_or_else(|| RepositoryError::InvalidPath(format!("{} has no final segment", path)))?;
    let parent = path
        .parent()
        .ok_or_else(|| RepositoryError::InvalidPath(format!("{} has no parent", path)))?;
    Ok((parent, segment.name().clone()))
}
