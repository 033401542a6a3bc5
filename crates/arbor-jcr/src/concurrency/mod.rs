//! Shared, thread-safe repository state.
//!
//! - [`sessions::SessionRegistry`] for the set of active sessions
//! - [`lock_manager::LockManager`] for workspace locks and their expiry

pub mod lock_manager;
pub mod sessions;

pub use lock_manager::{LockError, LockManager, LockRecord, LockRequest};
pub use sessions::{SessionEntry, SessionId, SessionRegistry};
