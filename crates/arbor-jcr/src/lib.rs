//! Content repository core: sessions, versioning and locking over an arbor
//! graph store.
//!
//! # Architecture
//!
//! A [`Repository`] owns the [`GraphStore`](arbor_storage::GraphStore), the
//! node type registry, the lock table and the registry of active sessions.
//! It is shared behind an `Arc` and safe to use from many threads.
//!
//! Each [`Session`] is a single-threaded overlay over one workspace. Reads
//! pass through the overlay to the store; writes stay in the overlay until
//! [`Session::save`] turns them into one atomic batch. [`Node`] and
//! [`Property`] are thin handles that borrow the session.
//!
//! Version histories live in the `system` workspace. Check-in writes the new
//! version and the live node's version properties in a single
//! multi-workspace batch; restore and merge build their changes on a private
//! overlay and write it in one batch as well.
//!
//! # Modules
//!
//! - [`repository`]: Repository lifecycle, workspaces, login
//! - [`session`]: Session, its overlay, and the Node/Property façades
//! - [`version`]: VersionManager, histories, frozen nodes, restore, merge
//! - [`concurrency`]: lock manager and session registry
//! - [`config`]: RepositoryConfig from environment or JSON
//! - [`descriptors`]: repository capability descriptors
//! - [`error`]: RepositoryError and the crate Result alias

pub mod concurrency;
pub mod config;
pub mod descriptors;
pub mod error;
pub mod repository;
pub mod session;
pub mod version;

pub use concurrency::{LockError, SessionId};
pub use config::RepositoryConfig;
pub use descriptors::Descriptors;
pub use error::{RepositoryError, Result};
pub use repository::Repository;
pub use session::{CorrespondenceId, LockInfo, NamePattern, Node, NodeStatus, Property, Session};
pub use version::{FrozenNode, HistoryLayout, VersionHistory, VersionManager, VersionRecord, VersionedItem};
