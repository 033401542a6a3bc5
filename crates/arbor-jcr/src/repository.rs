//! The shared repository object.
//!
//! A [`Repository`] owns the graph store, the node-type registry, the
//! active-session registry and the lock manager. It is shared as
//! `Arc<Repository>`; every [`login`](Repository::login) hands out an
//! independent [`Session`] with its own overlay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arbor_core::lexicon::{
    ARBOR_ROOT, ARBOR_SYSTEM, ARBOR_VERSION_STORAGE, JCR_LOCK_IS_DEEP, JCR_LOCK_OWNER,
    JCR_PRIMARY_TYPE, JCR_SYSTEM, JCR_UUID, JCR_VERSION_STORAGE,
};
use arbor_core::{Name, NodeKey, NodeTypeRegistry, PropertyData, Value};
use arbor_storage::{Batch, GraphStore, StorageError, SYSTEM_WORKSPACE};

use crate::concurrency::{LockManager, LockRecord, SessionEntry, SessionRegistry};
use crate::config::RepositoryConfig;
use crate::descriptors::Descriptors;
use crate::error::{RepositoryError, Result};
use crate::session::Session;

/// The graph store shared by all sessions of a repository.
pub(crate) type SharedStore = Arc<Mutex<Box<dyn GraphStore>>>;

/// Locks the shared store, recovering the guard if a previous holder
/// panicked.
pub(crate) fn lock_store(store: &SharedStore) -> MutexGuard<'_, Box<dyn GraphStore>> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Repository {
    config: RepositoryConfig,
    store: SharedStore,
    registry: Arc<NodeTypeRegistry>,
    sessions: SessionRegistry,
    locks: LockManager,
    descriptors: Descriptors,
    open: AtomicBool,
}

impl Repository {
    /// Opens a repository over `store` with the built-in node types.
    pub fn open(config: RepositoryConfig, store: impl GraphStore + 'static) -> Result<Arc<Self>> {
        Self::open_with_registry(config, store, NodeTypeRegistry::with_builtins())
    }

    /// Opens a repository with a caller-supplied node-type registry.
    ///
    /// Creates the system workspace with its version storage and every
    /// configured workspace that does not exist yet.
    pub fn open_with_registry(
        config: RepositoryConfig,
        store: impl GraphStore + 'static,
        registry: NodeTypeRegistry,
    ) -> Result<Arc<Self>> {
        let mut store: Box<dyn GraphStore> = Box::new(store);
        if !store.has_workspace(SYSTEM_WORKSPACE)? {
            create_system_workspace(store.as_mut())?;
        }
        for workspace in config.all_workspaces() {
            if workspace == SYSTEM_WORKSPACE {
                return Err(RepositoryError::Configuration(format!(
                    "'{}' is reserved for version storage",
                    SYSTEM_WORKSPACE
                )));
            }
            if !store.has_workspace(&workspace)? {
                create_root(store.as_mut(), &workspace)?;
            }
        }
        let repository = Repository {
            locks: LockManager::new(config.lock_timeout(), config.lock_extension()),
            descriptors: Descriptors::new(&config),
            config,
            store: Arc::new(Mutex::new(store)),
            registry: Arc::new(registry),
            sessions: SessionRegistry::new(),
            open: AtomicBool::new(true),
        };
        tracing::info!(
            name = %repository.config.name,
            default_workspace = %repository.config.default_workspace,
            "repository opened"
        );
        Ok(Arc::new(repository))
    }

    /// Starts a session on `workspace` (the default workspace if `None`).
    pub fn login(self: &Arc<Self>, user: &str, workspace: Option<&str>) -> Result<Session> {
        self.ensure_open()?;
        let workspace = workspace.unwrap_or(self.config.default_workspace.as_str());
        if workspace == SYSTEM_WORKSPACE || !lock_store(&self.store).has_workspace(workspace)? {
            return Err(RepositoryError::NoSuchWorkspace(workspace.to_string()));
        }
        let session = Session::new(Arc::clone(self), user, workspace)?;
        tracing::info!(user, workspace, session = %session.id(), "login");
        Ok(session)
    }

    pub fn create_workspace(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        if name == SYSTEM_WORKSPACE {
            return Err(RepositoryError::Configuration(format!(
                "'{}' is reserved for version storage",
                SYSTEM_WORKSPACE
            )));
        }
        let mut store = lock_store(&self.store);
        if store.has_workspace(name)? {
            return Err(StorageError::WorkspaceExists(name.to_string()).into());
        }
        create_root(store.as_mut(), name)?;
        tracing::info!(workspace = name, "workspace created");
        Ok(())
    }

    /// Content workspaces, sorted; the system workspace is not listed.
    pub fn workspace_names(&self) -> Result<Vec<String>> {
        Ok(lock_store(&self.store)
            .workspaces()?
            .into_iter()
            .filter(|w| w != SYSTEM_WORKSPACE)
            .collect())
    }

    pub fn has_workspace(&self, name: &str) -> Result<bool> {
        Ok(name != SYSTEM_WORKSPACE && lock_store(&self.store).has_workspace(name)?)
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn descriptors(&self) -> &Descriptors {
        &self.descriptors
    }

    pub fn node_types(&self) -> &NodeTypeRegistry {
        &self.registry
    }

    pub fn active_sessions(&self) -> Vec<SessionEntry> {
        self.sessions.list()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Marks the repository closed and releases every lock. Later logins and
    /// operations of existing sessions fail with `RepositoryClosed`.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        for record in self.locks.drain() {
            self.clear_lock_properties(&record);
        }
        tracing::info!(name = %self.config.name, "repository closed");
    }

    /// Extends the session-scoped locks of live sessions and releases
    /// expired locks. Returns the released records.
    pub fn sweep_locks(&self) -> Vec<LockRecord> {
        let active = self.sessions.active_ids();
        let released = self.locks.sweep(&active);
        for record in &released {
            tracing::warn!(
                workspace = %record.workspace,
                node = %record.node,
                owner = %record.owner,
                "lock expired and was released"
            );
            self.clear_lock_properties(record);
        }
        released
    }

    /// Spawns a task on the current tokio runtime that calls
    /// [`sweep_locks`](Self::sweep_locks) every `interval` until the
    /// repository is closed or dropped.
    pub fn start_lock_sweep(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let repository = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                let Some(repository) = repository.upgrade() else {
                    break;
                };
                if !repository.is_open() {
                    break;
                }
                let released = repository.sweep_locks();
                if !released.is_empty() {
                    tracing::info!("swept {} expired lock(s)", released.len());
                }
            }
        })
    }

    // -------------------------------------------------------------------
    // Crate-internal accessors
    // -------------------------------------------------------------------

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(RepositoryError::RepositoryClosed)
        }
    }

    pub(crate) fn store(&self) -> &SharedStore {
        &self.store
    }

    pub(crate) fn registry(&self) -> &Arc<NodeTypeRegistry> {
        &self.registry
    }

    pub(crate) fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub(crate) fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Removes `jcr:lockOwner`/`jcr:lockIsDeep` from a node whose lock is
    /// gone. A node that no longer exists is skipped.
    pub(crate) fn clear_lock_properties(&self, record: &LockRecord) {
        let mut batch = Batch::new();
        batch.remove_properties(
            record.node,
            vec![Name::from(JCR_LOCK_OWNER), Name::from(JCR_LOCK_IS_DEEP)],
        );
        if let Err(err) = lock_store(&self.store).execute(&record.workspace, batch) {
            tracing::debug!(node = %record.node, %err, "lock properties not cleared");
        }
    }
}

fn root_properties(key: NodeKey, primary: &str) -> Vec<PropertyData> {
    vec![
        PropertyData::single(JCR_PRIMARY_TYPE, Value::Name(Name::from(primary))),
        PropertyData::single(JCR_UUID, Value::String(key.to_string())),
    ]
}

fn create_root(store: &mut dyn GraphStore, workspace: &str) -> Result<NodeKey> {
    let root = NodeKey::new();
    store.create_workspace(workspace, root, root_properties(root, ARBOR_ROOT))?;
    Ok(root)
}

fn create_system_workspace(store: &mut dyn GraphStore) -> Result<()> {
    let root = create_root(store, SYSTEM_WORKSPACE)?;
    let system = NodeKey::new();
    let storage = NodeKey::new();
    let mut batch = Batch::new();
    batch
        .create_node(
            system,
            root,
            Name::from(JCR_SYSTEM),
            vec![PropertyData::single(
                JCR_PRIMARY_TYPE,
                Value::Name(Name::from(ARBOR_SYSTEM)),
            )],
        )
        .create_node(
            storage,
            system,
            Name::from(JCR_VERSION_STORAGE),
            vec![PropertyData::single(
                JCR_PRIMARY_TYPE,
                Value::Name(Name::from(ARBOR_VERSION_STORAGE)),
            )],
        );
    store.execute(SYSTEM_WORKSPACE, batch)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::version_storage_path;
    use arbor_storage::InMemoryStore;

    fn repository() -> Arc<Repository> {
        let config = RepositoryConfig {
            workspaces: vec!["staging".to_string()],
            ..RepositoryConfig::default()
        };
        Repository::open(config, InMemoryStore::new()).unwrap()
    }

    #[test]
    fn test_open_creates_workspaces_and_version_storage() {
        let repo = repository();
        assert_eq!(repo.workspace_names().unwrap(), vec!["default", "staging"]);
        let store = lock_store(repo.store());
        let storage = store
            .find_by_path(SYSTEM_WORKSPACE, &version_storage_path())
            .unwrap();
        assert!(storage.is_some());
    }

    #[test]
    fn test_login_rejects_unknown_and_system_workspaces() {
        let repo = repository();
        assert!(matches!(
            repo.login("alice", Some("nowhere")),
            Err(RepositoryError::NoSuchWorkspace(_))
        ));
        assert!(matches!(
            repo.login("alice", Some(SYSTEM_WORKSPACE)),
            Err(RepositoryError::NoSuchWorkspace(_))
        ));
        let session = repo.login("alice", None).unwrap();
        assert_eq!(session.workspace_name(), "default");
        assert_eq!(repo.active_sessions().len(), 1);
    }

    #[test]
    fn test_create_workspace_twice_fails() {
        let repo = repository();
        repo.create_workspace("archive").unwrap();
        assert!(repo.create_workspace("archive").is_err());
        assert!(repo.create_workspace(SYSTEM_WORKSPACE).is_err());
        assert!(repo.has_workspace("archive").unwrap());
    }

    #[test]
    fn test_closed_repository_rejects_logins() {
        let repo = repository();
        repo.close();
        assert!(matches!(
            repo.login("alice", None),
            Err(RepositoryError::RepositoryClosed)
        ));
    }

    #[test]
    fn test_dropped_sessions_leave_the_registry() {
        let repo = repository();
        let session = repo.login("alice", None).unwrap();
        drop(session);
        assert!(repo.active_sessions().is_empty());
    }
}
