//! Graph access layer for arbor workspaces.
//!
//! Provides the [`GraphStore`] trait defining the storage contract that all
//! backends implement, plus [`InMemoryStore`] and [`SqliteStore`] as
//! first-class backends.
//!
//! # Architecture
//!
//! A store holds named workspaces, each a tree of [`NodeDocument`]s keyed by
//! [`NodeKey`](arbor_core::NodeKey). Reads address nodes by identifier or
//! path; writes are expressed as a [`Batch`] of [`Operation`]s and applied
//! all-or-nothing. [`GraphStore::execute_all`] extends that guarantee across
//! several workspaces at once.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`document`]: NodeDocument and ChildRef, the persisted node shape
//! - [`batch`]: Operation, Batch and BatchOutcome
//! - [`query`]: query command builder and rows
//! - [`traits`]: GraphStore trait definition
//! - [`table`]: operation semantics shared by both backends
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: SQL schema and migration setup
//! - [`sqlite`]: SqliteStore implementation
//! - [`hash`]: identifier digests

pub mod batch;
pub mod document;
pub mod error;
pub mod hash;
pub mod memory;
pub mod query;
pub mod schema;
pub mod sqlite;
pub mod table;
pub mod traits;

// Re-export key types for ergonomic use.
pub use batch::{Batch, BatchOutcome, Operation, WorkspaceBatch};
pub use document::{ChildRef, NodeDocument};
pub use error::StorageError;
pub use hash::identifier_digest;
pub use memory::InMemoryStore;
pub use query::{Query, QueryCommand, QueryRow};
pub use sqlite::SqliteStore;
pub use traits::GraphStore;

/// Name of the workspace holding shared system content such as version
/// storage.
pub const SYSTEM_WORKSPACE: &str = "system";
