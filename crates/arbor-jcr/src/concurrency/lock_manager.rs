//! Workspace lock manager with deep/shallow and session/open-scoped locks.
//!
//! [`LockManager`] keeps one [`LockRecord`] per locked node, keyed by
//! workspace and node identifier. A deep lock covers the whole subtree; a
//! shallow lock covers only its node. Locks carry a token that identifies the
//! holder; open-scoped tokens can be handed from one session to another,
//! session-scoped ones cannot.
//!
//! Installing a lock runs inside a single-writer transaction: the
//! ancestor/descendant checks and the insert happen under one guard, so two
//! sessions racing to deep-lock overlapping subtrees cannot both succeed.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use arbor_core::NodeKey;

use super::sessions::SessionId;

/// An installed lock.
#[derive(Debug, Clone, PartialEq)]
pub struct LockRecord {
    pub workspace: String,
    pub node: NodeKey,
    pub token: String,
    pub owner: String,
    /// Session currently holding the token, if any.
    pub holder: Option<SessionId>,
    pub deep: bool,
    pub session_scoped: bool,
    pub acquired_at: Instant,
    pub expires_at: Instant,
}

impl LockRecord {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Open-scoped locks lapse at their expiry. Session-scoped ones stay in
    /// force until a sweep finds their session gone.
    pub fn is_in_force(&self, now: Instant) -> bool {
        self.session_scoped || !self.is_expired(now)
    }

    /// Whole seconds left before the lock expires.
    pub fn seconds_remaining(&self) -> u64 {
        self.expires_at
            .saturating_duration_since(Instant::now())
            .as_secs()
    }

    pub fn is_held_by(&self, session: &SessionId) -> bool {
        self.holder.as_ref() == Some(session)
    }
}

/// Parameters of a lock request.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub workspace: String,
    /// The node followed by its ancestors up to the root.
    pub lineage: Vec<NodeKey>,
    pub owner: String,
    pub session: SessionId,
    pub deep: bool,
    pub session_scoped: bool,
    /// Overrides the default timeout of open-scoped locks.
    pub timeout: Option<Duration>,
}

/// Errors from lock operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LockError {
    #[error("node {node} is not lockable")]
    NotLockable { node: NodeKey },

    /// The node, or a deep-locked ancestor, is already locked.
    #[error("node {node} is already locked (lock held on {lock_node})")]
    AlreadyLocked { node: NodeKey, lock_node: NodeKey },

    #[error("cannot deep-lock {node}: descendant {descendant} is locked")]
    DescendantLocked { node: NodeKey, descendant: NodeKey },

    #[error("node {node} is not locked")]
    NotLocked { node: NodeKey },

    #[error("lock token for node {node} is not held by this session")]
    TokenNotHeld { node: NodeKey },

    /// The node is locked and this session does not hold the token.
    #[error("node {node} is locked by another session")]
    LockedByOther { node: NodeKey },

    #[error("unknown lock token {token}")]
    UnknownToken { token: String },

    #[error("lock token {token} is held by another session")]
    TokenInUse { token: String },

    #[error("lock token {token} belongs to a session-scoped lock")]
    SessionScopedToken { token: String },
}

/// Lock table for all workspaces of a repository.
pub struct LockManager {
    locks: DashMap<(String, NodeKey), LockRecord>,
    transaction: Mutex<()>,
    default_timeout: Duration,
    session_extension: Duration,
}

impl LockManager {
    /// Creates a lock manager. `default_timeout` bounds open-scoped locks;
    /// `session_extension` is how far each sweep pushes the expiry of locks
    /// whose session is still active.
    pub fn new(default_timeout: Duration, session_extension: Duration) -> Self {
        LockManager {
            locks: DashMap::new(),
            transaction: Mutex::new(()),
            default_timeout,
            session_extension,
        }
    }

    /// Lock manager with a 30-minute open-lock timeout and a 2-minute
    /// session-lock extension.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(30 * 60), Duration::from_secs(120))
    }

    // -------------------------------------------------------------------
    // Acquisition
    // -------------------------------------------------------------------

    /// Installs a lock.
    ///
    /// `lineage_of` resolves the node-to-root lineage of another locked node
    /// in the same workspace (returning `None` if it no longer exists); it is
    /// consulted for deep requests to reject locks over locked descendants.
    pub fn lock<E, F>(&self, request: LockRequest, mut lineage_of: F) -> Result<LockRecord, E>
    where
        E: From<LockError>,
        F: FnMut(&NodeKey) -> Result<Option<Vec<NodeKey>>, E>,
    {
        let node = *request.lineage.first().ok_or(LockError::NotLockable {
            node: NodeKey::default(),
        })?;
        let _guard = self
            .transaction
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(existing) = self.covering(&request.workspace, &request.lineage) {
            return Err(LockError::AlreadyLocked {
                node,
                lock_node: existing.node,
            }
            .into());
        }

        if request.deep {
            let now = Instant::now();
            let others: Vec<NodeKey> = self
                .locks
                .iter()
                .filter(|e| e.key().0 == request.workspace && e.value().is_in_force(now))
                .map(|e| e.key().1)
                .collect();
            for other in others {
                if let Some(lineage) = lineage_of(&other)? {
                    if lineage.iter().skip(1).any(|k| *k == node) {
                        return Err(LockError::DescendantLocked {
                            node,
                            descendant: other,
                        }
                        .into());
                    }
                }
            }
        }

        let now = Instant::now();
        let ttl = if request.session_scoped {
            self.session_extension
        } else {
            request.timeout.unwrap_or(self.default_timeout)
        };
        let record = LockRecord {
            workspace: request.workspace.clone(),
            node,
            token: Uuid::new_v4().to_string(),
            owner: request.owner,
            holder: Some(request.session),
            deep: request.deep,
            session_scoped: request.session_scoped,
            acquired_at: now,
            expires_at: now + ttl,
        };
        self.locks
            .insert((request.workspace, node), record.clone());
        Ok(record)
    }

    /// Removes the lock on `node`, which `session` must hold.
    pub fn unlock(
        &self,
        workspace: &str,
        node: &NodeKey,
        session: &SessionId,
    ) -> Result<LockRecord, LockError> {
        let key = (workspace.to_string(), *node);
        let record = self
            .locks
            .get(&key)
            .map(|e| e.clone())
            .ok_or(LockError::NotLocked { node: *node })?;
        if !record.is_held_by(session) {
            return Err(LockError::TokenNotHeld { node: *node });
        }
        self.locks.remove(&key);
        Ok(record)
    }

    /// Pushes the expiry of the lock on `node` out by the default timeout.
    pub fn refresh(
        &self,
        workspace: &str,
        node: &NodeKey,
        session: &SessionId,
    ) -> Result<LockRecord, LockError> {
        let mut entry = self
            .locks
            .get_mut(&(workspace.to_string(), *node))
            .ok_or(LockError::NotLocked { node: *node })?;
        if !entry.is_held_by(session) {
            return Err(LockError::TokenNotHeld { node: *node });
        }
        let ttl = if entry.session_scoped {
            self.session_extension
        } else {
            self.default_timeout
        };
        entry.expires_at = Instant::now() + ttl;
        Ok(entry.clone())
    }

    // -------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------

    /// The lock in effect for the first node of `lineage`: a lock on the node
    /// itself or a deep lock on one of its ancestors.
    pub fn lock_for(&self, workspace: &str, lineage: &[NodeKey]) -> Option<LockRecord> {
        self.covering(workspace, lineage)
    }

    /// The lock installed on exactly `node`.
    pub fn record_on(&self, workspace: &str, node: &NodeKey) -> Option<LockRecord> {
        let now = Instant::now();
        self.locks
            .get(&(workspace.to_string(), *node))
            .filter(|e| e.is_in_force(now))
            .map(|e| e.clone())
    }

    pub fn locks_in(&self, workspace: &str) -> Vec<LockRecord> {
        self.locks
            .iter()
            .filter(|e| e.key().0 == workspace)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn covering(&self, workspace: &str, lineage: &[NodeKey]) -> Option<LockRecord> {
        let now = Instant::now();
        lineage.iter().enumerate().find_map(|(depth, key)| {
            self.locks
                .get(&(workspace.to_string(), *key))
                .filter(|record| (depth == 0 || record.deep) && record.is_in_force(now))
                .map(|record| record.clone())
        })
    }

    // -------------------------------------------------------------------
    // Tokens
    // -------------------------------------------------------------------

    /// Makes `session` the holder of an open-scoped lock token.
    pub fn claim_token(&self, token: &str, session: &SessionId) -> Result<LockRecord, LockError> {
        let mut entry = self
            .locks
            .iter_mut()
            .find(|e| e.token == token)
            .ok_or_else(|| LockError::UnknownToken {
                token: token.to_string(),
            })?;
        if entry.session_scoped {
            return Err(LockError::SessionScopedToken {
                token: token.to_string(),
            });
        }
        match entry.holder {
            Some(holder) if holder != *session => Err(LockError::TokenInUse {
                token: token.to_string(),
            }),
            _ => {
                entry.holder = Some(*session);
                Ok(entry.clone())
            }
        }
    }

    /// Gives up `session`'s hold on an open-scoped lock token.
    pub fn release_token(&self, token: &str, session: &SessionId) -> Result<LockRecord, LockError> {
        let mut entry = self
            .locks
            .iter_mut()
            .find(|e| e.token == token)
            .ok_or_else(|| LockError::UnknownToken {
                token: token.to_string(),
            })?;
        if entry.session_scoped {
            return Err(LockError::SessionScopedToken {
                token: token.to_string(),
            });
        }
        if !entry.is_held_by(session) {
            return Err(LockError::TokenNotHeld { node: entry.node });
        }
        entry.holder = None;
        Ok(entry.clone())
    }

    // -------------------------------------------------------------------
    // Expiry
    // -------------------------------------------------------------------

    /// Releases the session-scoped locks of `session` and drops its hold on
    /// open-scoped ones. Returns the released records.
    pub fn release_session(&self, session: &SessionId) -> Vec<LockRecord> {
        let mut released = Vec::new();
        self.locks.retain(|_, record| {
            if !record.is_held_by(session) {
                return true;
            }
            if record.session_scoped {
                released.push(record.clone());
                false
            } else {
                record.holder = None;
                true
            }
        });
        released
    }

    /// Removes every lock. Returns the removed records.
    pub fn drain(&self) -> Vec<LockRecord> {
        let mut drained = Vec::new();
        self.locks.retain(|_, record| {
            drained.push(record.clone());
            false
        });
        drained
    }

    /// Extends session-scoped locks of `active` sessions and releases every
    /// lock past its expiry. Returns the released records.
    pub fn sweep(&self, active: &HashSet<SessionId>) -> Vec<LockRecord> {
        let now = Instant::now();
        let extension = self.session_extension;
        let mut released = Vec::new();
        self.locks.retain(|_, record| {
            let renewable = record.session_scoped
                && record.holder.map(|h| active.contains(&h)).unwrap_or(false);
            if renewable {
                record.expires_at = now + extension;
                return true;
            }
            if record.is_expired(now) {
                released.push(record.clone());
                return false;
            }
            true
        });
        released
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::with_default_ttl()
    }
}
