//! Integration tests for locks shared between sessions.

use std::sync::Arc;
use std::time::Duration;

use arbor_jcr::{LockError, Repository, RepositoryConfig, RepositoryError, Session};
use arbor_storage::InMemoryStore;

fn repository() -> Arc<Repository> {
    Repository::open(RepositoryConfig::default(), InMemoryStore::new()).expect("repository should open")
}

/// Saves `/a/b/c`, each node lockable.
fn lockable_tree(session: &Session) {
    let mut node = session.root_node().unwrap();
    for name in ["a", "b", "c"] {
        node = node.add_node(name).unwrap();
        node.add_mixin("mix:lockable").unwrap();
    }
    session.save().unwrap();
}

#[test]
fn test_deep_lock_blocks_lock_below() {
    let repo = repository();
    let first = repo.login("alice", None).unwrap();
    let second = repo.login("bob", None).unwrap();
    lockable_tree(&first);

    first.node("/a").unwrap().lock(true, true).unwrap();
    let result = second.node("/a/b").unwrap().lock(true, true);
    assert!(matches!(
        result,
        Err(RepositoryError::Lock(LockError::AlreadyLocked { .. }))
    ));
    assert!(second.node("/a/b/c").unwrap().is_locked().unwrap());
}

#[test]
fn test_deep_lock_blocked_by_locked_descendant() {
    let repo = repository();
    let first = repo.login("alice", None).unwrap();
    let second = repo.login("bob", None).unwrap();
    lockable_tree(&first);

    first.node("/a/b/c").unwrap().lock(false, true).unwrap();
    assert!(matches!(
        second.node("/a").unwrap().lock(true, true),
        Err(RepositoryError::Lock(LockError::DescendantLocked { .. }))
    ));
    // A shallow lock above is fine.
    second.node("/a").unwrap().lock(false, true).unwrap();
}

#[test]
fn test_locked_node_rejects_other_writers() {
    let repo = repository();
    let owner = repo.login("alice", None).unwrap();
    let other = repo.login("bob", None).unwrap();
    lockable_tree(&owner);
    owner.node("/a").unwrap().lock(true, true).unwrap();

    assert!(matches!(
        other.node("/a/b").unwrap().set_property("title", "x"),
        Err(RepositoryError::Lock(LockError::LockedByOther { .. }))
    ));
    assert!(matches!(
        other.node("/a/b").unwrap().add_node("d"),
        Err(RepositoryError::Lock(LockError::LockedByOther { .. }))
    ));

    owner.node("/a/b").unwrap().set_property("title", "mine").unwrap();
    owner.save().unwrap();
}

#[test]
fn test_lock_info_hides_token_from_other_sessions() {
    let repo = repository();
    let owner = repo.login("alice", None).unwrap();
    let other = repo.login("bob", None).unwrap();
    lockable_tree(&owner);
    let info = owner.node("/a").unwrap().lock(true, false).unwrap();
    assert!(info.token.is_some());

    let seen = other.node("/a/b").unwrap().lock_info().unwrap();
    assert_eq!(seen.path.to_string(), "/a");
    assert_eq!(seen.owner, "alice");
    assert!(seen.deep);
    assert!(seen.token.is_none());
    assert!(!other.node("/a/b").unwrap().holds_lock().unwrap());
    assert!(matches!(
        other.node("/a").unwrap().unlock(),
        Err(RepositoryError::Lock(_))
    ));
}

#[test]
fn test_open_scoped_token_transfer() {
    let repo = repository();
    let first = repo.login("alice", None).unwrap();
    let second = repo.login("bob", None).unwrap();
    lockable_tree(&first);
    let token = first.node("/a").unwrap().lock(false, false).unwrap().token.unwrap();

    assert!(matches!(
        second.add_lock_token(&token),
        Err(RepositoryError::Lock(LockError::TokenInUse { .. }))
    ));
    first.remove_lock_token(&token).unwrap();
    assert!(first.lock_tokens().is_empty());
    // Nobody holds the token now, so the node is read-only for everyone.
    assert!(first.node("/a").unwrap().set_property("x", 1i64).is_err());

    second.add_lock_token(&token).unwrap();
    assert_eq!(second.lock_tokens(), vec![token.clone()]);
    second.node("/a").unwrap().set_property("x", 1i64).unwrap();
    second.save().unwrap();
    second.node("/a").unwrap().unlock().unwrap();
    assert!(!first.node("/a").unwrap().is_locked().unwrap());
}

#[test]
fn test_session_scoped_token_cannot_be_transferred() {
    let repo = repository();
    let first = repo.login("alice", None).unwrap();
    let second = repo.login("bob", None).unwrap();
    lockable_tree(&first);
    let info = first.node("/a").unwrap().lock(false, true).unwrap();
    let token = info.token.unwrap();
    assert!(first.lock_tokens().is_empty());
    assert!(matches!(
        second.add_lock_token(&token),
        Err(RepositoryError::Lock(LockError::SessionScopedToken { .. }))
    ));
}

#[test]
fn test_logout_releases_session_scoped_locks() {
    let repo = repository();
    let first = repo.login("alice", None).unwrap();
    let second = repo.login("bob", None).unwrap();
    lockable_tree(&first);
    first.node("/a").unwrap().lock(true, true).unwrap();

    first.logout();
    second.refresh(false).unwrap();
    let a = second.node("/a").unwrap();
    assert!(!a.is_locked().unwrap());
    assert!(!a.has_property("jcr:lockOwner").unwrap());
    a.lock(true, true).unwrap();
}

#[test]
fn test_logout_keeps_open_scoped_locks() {
    let repo = repository();
    let first = repo.login("alice", None).unwrap();
    lockable_tree(&first);
    let token = first.node("/a").unwrap().lock(false, false).unwrap().token.unwrap();
    drop(first);

    let second = repo.login("bob", None).unwrap();
    assert!(second.node("/a").unwrap().is_locked().unwrap());
    second.add_lock_token(&token).unwrap();
    second.node("/a").unwrap().unlock().unwrap();
}

#[test]
fn test_sweep_releases_expired_locks() {
    let repo = repository();
    let session = repo.login("alice", None).unwrap();
    lockable_tree(&session);
    let a = session.node("/a").unwrap();
    a.lock_with(false, false, Some(Duration::from_millis(20)), Some("batch job"))
        .unwrap();
    assert_eq!(a.lock_info().unwrap().owner, "batch job");

    std::thread::sleep(Duration::from_millis(40));
    let released = repo.sweep_locks();
    assert_eq!(released.len(), 1);
    session.refresh(false).unwrap();
    assert!(!a.is_locked().unwrap());
    assert!(!a.has_property("jcr:lockOwner").unwrap());
}

#[test]
fn test_sweep_extends_session_scoped_locks_of_live_sessions() {
    let repo = repository();
    let session = repo.login("alice", None).unwrap();
    lockable_tree(&session);
    let a = session.node("/a").unwrap();
    a.lock_with(false, true, Some(Duration::from_millis(1)), None)
        .unwrap();
    std::thread::sleep(Duration::from_millis(10));
    assert!(repo.sweep_locks().is_empty());
    assert!(a.is_locked().unwrap());
}

#[tokio::test]
async fn test_background_sweep_task() {
    let repo = repository();
    let session = repo.login("alice", None).unwrap();
    lockable_tree(&session);
    session
        .node("/a")
        .unwrap()
        .lock_with(false, false, Some(Duration::from_millis(10)), None)
        .unwrap();

    let sweeper = repo.start_lock_sweep(Duration::from_millis(5));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!session.node("/a").unwrap().is_locked().unwrap());

    repo.close();
    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweep task should stop after close")
        .unwrap();
}

#[test]
fn test_refresh_lock_pushes_expiry_out() {
    let repo = repository();
    let owner = repo.login("alice", None).unwrap();
    let other = repo.login("bob", None).unwrap();
    lockable_tree(&owner);
    let a = owner.node("/a").unwrap();
    let short = a
        .lock_with(false, false, Some(Duration::from_secs(5)), None)
        .unwrap();
    assert!(short.seconds_remaining <= 5);

    let refreshed = a.refresh_lock().unwrap();
    assert!(refreshed.seconds_remaining > 5);
    assert!(matches!(
        other.node("/a").unwrap().refresh_lock(),
        Err(RepositoryError::Lock(LockError::TokenNotHeld { .. }))
    ));
}
