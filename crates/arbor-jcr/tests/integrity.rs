//! Integration tests for referential integrity on save.

use std::sync::Arc;

use arbor_core::Value;
use arbor_jcr::{Repository, RepositoryConfig, RepositoryError, Session};
use arbor_storage::InMemoryStore;

fn repository(referential_integrity: bool) -> Arc<Repository> {
    let config = RepositoryConfig {
        referential_integrity,
        ..RepositoryConfig::default()
    };
    Repository::open(config, InMemoryStore::new()).expect("repository should open")
}

/// Saves `/target` (referenceable) and `/holder` with a reference to it.
fn referenced(session: &Session) {
    let root = session.root_node().unwrap();
    let target = root.add_node("target").unwrap();
    target.add_mixin("mix:referenceable").unwrap();
    let holder = root.add_node("holder").unwrap();
    holder.set_property("link", Value::from(target.key())).unwrap();
    session.save().unwrap();
}

#[test]
fn test_removing_referenced_node_fails_on_save() {
    let repo = repository(true);
    let session = repo.login("alice", None).unwrap();
    referenced(&session);
    let target = session.node("/target").unwrap().key();

    session.node("/holder").unwrap().set_property("note", "draft").unwrap();
    session.remove_item("/target").unwrap();
    let err = session.save().unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::ReferentialIntegrity { target: t, .. } if t == target
    ));
    // The failed save leaves the removal pending.
    assert!(session.has_pending_changes());
    assert!(!session.item_exists("/target").unwrap());

    // Nothing reached the workspace.
    let other = repo.login("bob", None).unwrap();
    assert_eq!(other.node("/target").unwrap().key(), target);
    assert_eq!(
        other.property("/holder/link").unwrap().node().unwrap().key(),
        target
    );
    assert!(!other.item_exists("/holder/note").unwrap());
}

#[test]
fn test_removing_referrer_together_with_target() {
    let repo = repository(true);
    let session = repo.login("alice", None).unwrap();
    referenced(&session);
    session.remove_item("/target").unwrap();
    session.remove_item("/holder").unwrap();
    session.save().unwrap();
}

#[test]
fn test_dropping_the_reference_allows_removal() {
    let repo = repository(true);
    let session = repo.login("alice", None).unwrap();
    referenced(&session);
    session.property("/holder/link").unwrap().remove().unwrap();
    session.remove_item("/target").unwrap();
    session.save().unwrap();
}

#[test]
fn test_pending_reference_to_removed_node() {
    let repo = repository(true);
    let session = repo.login("alice", None).unwrap();
    let root = session.root_node().unwrap();
    let target = root.add_node("target").unwrap();
    target.add_mixin("mix:referenceable").unwrap();
    session.save().unwrap();

    let key = target.key();
    root.add_node("holder")
        .unwrap()
        .set_property("link", Value::from(key))
        .unwrap();
    session.remove_item("/target").unwrap();
    assert!(matches!(
        session.save(),
        Err(RepositoryError::ReferentialIntegrity { .. })
    ));
}

#[test]
fn test_weak_references_do_not_block_removal() {
    let repo = repository(true);
    let session = repo.login("alice", None).unwrap();
    let root = session.root_node().unwrap();
    let target = root.add_node("target").unwrap();
    target.add_mixin("mix:referenceable").unwrap();
    root.add_node("holder")
        .unwrap()
        .set_property("link", Value::WeakReference(target.key()))
        .unwrap();
    session.save().unwrap();

    session.remove_item("/target").unwrap();
    session.save().unwrap();
}

#[test]
fn test_check_can_be_disabled() {
    let repo = repository(false);
    let session = repo.login("alice", None).unwrap();
    referenced(&session);
    session.remove_item("/target").unwrap();
    session.save().unwrap();
    assert!(!session.item_exists("/target").unwrap());
}

#[test]
fn test_references_lists_referrers() {
    let repo = repository(true);
    let session = repo.login("alice", None).unwrap();
    referenced(&session);
    let refs = session.node("/target").unwrap().references().unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].path().unwrap().to_string(), "/holder/link");
}
