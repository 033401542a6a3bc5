//! Node-level locking.
//!
//! The lock table lives in the repository's [`LockManager`]; a lock is also
//! mirrored into the node's `jcr:lockOwner`/`jcr:lockIsDeep` properties,
//! written straight to storage so that they do not depend on a session save.
//!
//! [`LockManager`]: crate::concurrency::LockManager

use std::time::Duration;

use arbor_core::lexicon::{JCR_LOCK_IS_DEEP, JCR_LOCK_OWNER, MIX_LOCKABLE};
use arbor_core::{NodeKey, Path, PropertyData, Value};
use arbor_storage::Batch;

use crate::concurrency::{LockError, LockRecord, LockRequest};
use crate::error::{RepositoryError, Result};
use crate::repository::lock_store;
use crate::session::node::Node;

/// A lock as reported to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct LockInfo {
    /// The node carrying the lock.
    pub node: NodeKey,
    pub path: Path,
    pub owner: String,
    /// Present only for the session holding the lock.
    pub token: Option<String>,
    pub deep: bool,
    pub session_scoped: bool,
    pub seconds_remaining: u64,
}

impl<'s> Node<'s> {
    /// Locks this node, owned by the session's user.
    pub fn lock(&self, deep: bool, session_scoped: bool) -> Result<LockInfo> {
        self.lock_with(deep, session_scoped, None, None)
    }

    /// Locks this node with an explicit timeout and owner.
    pub fn lock_with(
        &self,
        deep: bool,
        session_scoped: bool,
        timeout: Option<Duration>,
        owner: Option<&str>,
    ) -> Result<LockInfo> {
        let session = self.session();
        session.ensure_live()?;
        let key = self.key();
        let repository = session.repository();
        let lineage = {
            let mut cache = session.cache();
            if !cache.is_node_type(&key, MIX_LOCKABLE)? {
                return Err(LockError::NotLockable { node: key }.into());
            }
            if cache.is_new(&key) || cache.has_pending_changes_at_or_below(&key)? {
                return Err(RepositoryError::InvalidItemState(format!(
                    "{} has unsaved changes",
                    cache.path_of(&key)?
                )));
            }
            cache.lineage(&key)?
        };
        let request = LockRequest {
            workspace: session.workspace_name().to_string(),
            lineage,
            owner: owner.unwrap_or(session.user_id()).to_string(),
            session: session.id(),
            deep,
            session_scoped,
            timeout,
        };
        let record = {
            let mut cache = session.cache();
            repository
                .locks()
                .lock::<RepositoryError, _>(request, |other| match cache.lineage(other) {
                    Ok(lineage) => Ok(Some(lineage)),
                    Err(RepositoryError::ItemNotFound(_)) => Ok(None),
                    Err(e) => Err(e),
                })?
        };

        let properties = vec![
            PropertyData::single(JCR_LOCK_OWNER, Value::String(record.owner.clone())),
            PropertyData::single(JCR_LOCK_IS_DEEP, Value::Boolean(deep)),
        ];
        let mut batch = Batch::new();
        batch.set_properties(key, properties.clone());
        let written = lock_store(repository.store()).execute(session.workspace_name(), batch);
        if let Err(err) = written {
            let _ = repository.locks().unlock(session.workspace_name(), &key, &session.id());
            return Err(err.into());
        }
        session.cache().absorb(&key, &properties, &[]);
        if !session_scoped {
            session.remember_token(&record.token);
        }
        tracing::info!(node = %key, deep, session_scoped, owner = %record.owner, "lock acquired");
        self.describe(record)
    }

    /// Removes the lock on this node, which this session must hold.
    pub fn unlock(&self) -> Result<()> {
        let session = self.session();
        session.ensure_live()?;
        let key = self.key();
        {
            let mut cache = session.cache();
            if cache.has_pending_changes_at_or_below(&key)? {
                return Err(RepositoryError::InvalidItemState(format!(
                    "{} has unsaved changes",
                    cache.path_of(&key)?
                )));
            }
        }
        let record = session
            .repository()
            .locks()
            .unlock(session.workspace_name(), &key, &session.id())?;
        session.repository().clear_lock_properties(&record);
        session
            .cache()
            .absorb(&key, &[], &[JCR_LOCK_OWNER, JCR_LOCK_IS_DEEP]);
        session.forget_token(&record.token);
        tracing::info!(node = %key, "lock released");
        Ok(())
    }

    /// True if this node is locked, directly or by a deep lock above it.
    pub fn is_locked(&self) -> Result<bool> {
        Ok(self.effective_lock()?.is_some())
    }

    /// True if a lock is installed on exactly this node.
    pub fn holds_lock(&self) -> Result<bool> {
        let session = self.session();
        session.ensure_live()?;
        Ok(session
            .repository()
            .locks()
            .record_on(session.workspace_name(), &self.key())
            .is_some())
    }

    /// The lock in effect on this node.
    pub fn lock_info(&self) -> Result<LockInfo> {
        let record = self
            .effective_lock()?
            .ok_or(LockError::NotLocked { node: self.key() })?;
        self.describe(record)
    }

    /// Pushes the expiry of this node's lock out again.
    pub fn refresh_lock(&self) -> Result<LockInfo> {
        let session = self.session();
        session.ensure_live()?;
        let record = session
            .repository()
            .locks()
            .refresh(session.workspace_name(), &self.key(), &session.id())?;
        self.describe(record)
    }

    fn effective_lock(&self) -> Result<Option<LockRecord>> {
        let session = self.session();
        session.ensure_live()?;
        let lineage = session.cache().lineage(&self.key())?;
        Ok(session
            .repository()
            .locks()
            .lock_for(session.workspace_name(), &lineage))
    }

    fn describe(&self, record: LockRecord) -> Result<LockInfo> {
        let session = self.session();
        let path = session.cache().path_of(&record.node)?;
        let token = record.is_held_by(&session.id()).then(|| record.token.clone());
        Ok(LockInfo {
            node: record.node,
            path,
            seconds_remaining: record.seconds_remaining(),
            owner: record.owner,
            token,
            deep: record.deep,
            session_scoped: record.session_scoped,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RepositoryConfig;
    use crate::error::RepositoryError;
    use crate::concurrency::LockError;
    use crate::repository::Repository;
    use arbor_storage::InMemoryStore;

    #[test]
    fn test_lock_requires_lockable() {
        let repo = Repository::open(RepositoryConfig::default(), InMemoryStore::new()).unwrap();
        let session = repo.login("alice", None).unwrap();
        let node = session.root_node().unwrap().add_node("a").unwrap();
        session.save().unwrap();
        assert!(matches!(
            node.lock(true, false),
            Err(RepositoryError::Lock(LockError::NotLockable { .. }))
        ));
    }

    #[test]
    fn test_lock_rejects_unsaved_node() {
        let repo = Repository::open(RepositoryConfig::default(), InMemoryStore::new()).unwrap();
        let session = repo.login("alice", None).unwrap();
        let node = session.root_node().unwrap().add_node("a").unwrap();
        node.add_mixin("mix:lockable").unwrap();
        assert!(matches!(
            node.lock(false, true),
            Err(RepositoryError::InvalidItemState(_))
        ));
    }

    #[test]
    fn test_lock_properties_and_token() {
        let repo = Repository::open(RepositoryConfig::default(), InMemoryStore::new()).unwrap();
        let session = repo.login("alice", None).unwrap();
        let node = session.root_node().unwrap().add_node("a").unwrap();
        node.add_mixin("mix:lockable").unwrap();
        session.save().unwrap();

        let info = node.lock(false, false).unwrap();
        assert_eq!(info.owner, "alice");
        let token = info.token.clone().unwrap();
        assert_eq!(session.lock_tokens(), vec![token]);
        assert_eq!(node.property("jcr:lockOwner").unwrap().string().unwrap(), "alice");
        assert!(!node.property("jcr:lockIsDeep").unwrap().boolean().unwrap());
        assert!(node.holds_lock().unwrap());

        node.unlock().unwrap();
        assert!(!node.is_locked().unwrap());
        assert!(!node.has_property("jcr:lockOwner").unwrap());
        assert!(session.lock_tokens().is_empty());
    }
}
