//! Active-session registry.
//!
//! [`SessionRegistry`] tracks logged-in sessions by [`SessionId`]. Each entry
//! holds only a weak liveness handle owned by the session, so a dropped
//! session disappears from the active set without explicit logout. Dead
//! entries are pruned lazily whenever the active set is read.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique session identifier (UUID v4 newtype).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of a registered session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub id: SessionId,
    pub user: String,
    pub workspace: String,
    pub logged_in_at: Instant,
    pub last_active: Instant,
    liveness: Weak<()>,
}

impl SessionEntry {
    /// True while the owning session object still exists.
    pub fn is_live(&self) -> bool {
        self.liveness.strong_count() > 0
    }
}

/// Registry of active sessions.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: DashMap::new(),
        }
    }

    /// Registers a session whose lifetime is tied to `liveness`.
    pub fn register(&self, user: &str, workspace: &str, liveness: &Arc<()>) -> SessionId {
        let id = SessionId::new();
        let now = Instant::now();
        self.sessions.insert(
            id,
            SessionEntry {
                id,
                user: user.to_string(),
                workspace: workspace.to_string(),
                logged_in_at: now,
                last_active: now,
                liveness: Arc::downgrade(liveness),
            },
        );
        id
    }

    /// Removes a session. Returns `true` if it was registered.
    pub fn deregister(&self, id: &SessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionEntry> {
        self.sessions
            .get(id)
            .map(|entry| entry.clone())
            .filter(SessionEntry::is_live)
    }

    pub fn touch(&self, id: &SessionId) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.last_active = Instant::now();
        }
    }

    /// Live sessions, after pruning dead entries.
    pub fn list(&self) -> Vec<SessionEntry> {
        self.prune();
        let mut out: Vec<SessionEntry> = self.sessions.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|e| e.logged_in_at);
        out
    }

    /// Identifiers of live sessions, after pruning dead entries.
    pub fn active_ids(&self) -> HashSet<SessionId> {
        self.prune();
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.prune();
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes live sessions idle for longer than `timeout`.
    ///
    /// Returns the number of sessions removed.
    pub fn sweep_inactive(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| entry.is_live() && now.duration_since(entry.last_active) < timeout);
        before - self.sessions.len()
    }

    /// Drops entries whose session no longer exists.
    fn prune(&self) {
        self.sessions.retain(|_, entry| entry.is_live());
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
