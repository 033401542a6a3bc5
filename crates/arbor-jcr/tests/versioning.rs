//! Integration tests for check-in, restore, labels and merge.

use std::sync::Arc;

use arbor_core::Value;
use arbor_jcr::{HistoryLayout, Repository, RepositoryConfig, RepositoryError, Session};
use arbor_storage::InMemoryStore;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn repository(layout: HistoryLayout) -> Arc<Repository> {
    let config = RepositoryConfig {
        workspaces: vec!["staging".to_string()],
        history_layout: layout,
        ..RepositoryConfig::default()
    };
    Repository::open(config, InMemoryStore::new()).expect("repository should open")
}

/// Creates a saved versionable `/doc` with a title and one child section.
fn versionable_doc(session: &Session) {
    let doc = session.root_node().unwrap().add_node("doc").unwrap();
    doc.add_mixin("mix:versionable").unwrap();
    doc.set_property("title", "one").unwrap();
    doc.add_node("section").unwrap().set_property("body", "text").unwrap();
    session.save().unwrap();
}

fn title(session: &Session, path: &str) -> String {
    session
        .node(path)
        .unwrap()
        .property("title")
        .unwrap()
        .string()
        .unwrap()
}

fn edit_title(session: &Session, path: &str, value: &str) {
    let vm = session.version_manager();
    vm.checkout(path).unwrap();
    session.node(path).unwrap().set_property("title", value).unwrap();
    session.save().unwrap();
}

// ---------------------------------------------------------------------------
// Check-in / check-out
// ---------------------------------------------------------------------------

#[test]
fn test_checkin_checkout_round_trip() {
    for layout in [HistoryLayout::Flat, HistoryLayout::Hierarchical] {
        let repo = repository(layout);
        let session = repo.login("alice", None).unwrap();
        versionable_doc(&session);
        let vm = session.version_manager();

        let v1 = vm.checkin("/doc").unwrap();
        assert!(!vm.is_checked_out("/doc").unwrap());
        assert!(!session.node("/doc/section").unwrap().is_checked_out().unwrap());
        assert_eq!(vm.base_version("/doc").unwrap().key, v1.key);

        vm.checkout("/doc").unwrap();
        assert!(vm.is_checked_out("/doc").unwrap());
        session.node("/doc").unwrap().set_property("title", "two").unwrap();
        session.save().unwrap();

        let v2 = vm.checkin("/doc").unwrap();
        assert_eq!(v2.predecessors, vec![v1.key]);
        let history = vm.version_history("/doc").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.linear_chain(&v2.key),
            vec![v2.key, v1.key, history.root]
        );
        assert!(v1.name < v2.name);
    }
}

#[test]
fn test_history_path_follows_layout() {
    let repo = repository(HistoryLayout::Flat);
    let session = repo.login("alice", None).unwrap();
    versionable_doc(&session);
    let key = session.node("/doc").unwrap().key();
    let history = session.version_manager().version_history("/doc").unwrap();
    assert_eq!(history.path, HistoryLayout::Flat.history_path(&key));
    assert_eq!(history.versionable, key);
}

#[test]
fn test_frozen_node_captures_subtree() {
    let repo = repository(HistoryLayout::default());
    let session = repo.login("alice", None).unwrap();
    versionable_doc(&session);
    let vm = session.version_manager();
    let v1 = vm.checkin("/doc").unwrap();

    let frozen = vm.frozen_node(&v1).unwrap();
    assert_eq!(frozen.primary_type.as_str(), "nt:unstructured");
    assert!(frozen
        .mixin_types
        .iter()
        .any(|m| m.as_str() == "mix:versionable"));
    assert!(frozen.property("jcr:baseVersion").is_none());
    assert_eq!(frozen.children.len(), 1);
    assert_eq!(frozen.children[0].name().as_str(), "section");
}

// ---------------------------------------------------------------------------
// Restore
// ---------------------------------------------------------------------------

#[test]
fn test_restore_earlier_version() {
    let repo = repository(HistoryLayout::default());
    let session = repo.login("alice", None).unwrap();
    versionable_doc(&session);
    let vm = session.version_manager();
    let v1 = vm.checkin("/doc").unwrap();

    vm.checkout("/doc").unwrap();
    let doc = session.node("/doc").unwrap();
    doc.set_property("title", "two").unwrap();
    doc.node("section").unwrap().remove().unwrap();
    doc.add_node("appendix").unwrap();
    session.save().unwrap();
    vm.checkin("/doc").unwrap();

    vm.restore("/doc", v1.name.as_str(), false).unwrap();
    assert_eq!(title(&session, "/doc"), "one");
    assert!(session.item_exists("/doc/section/body").unwrap());
    assert!(!session.item_exists("/doc/appendix").unwrap());
    assert!(!vm.is_checked_out("/doc").unwrap());
    assert_eq!(vm.base_version("/doc").unwrap().key, v1.key);
}

#[test]
fn test_checkin_after_restore_branches_from_restored_version() {
    let repo = repository(HistoryLayout::default());
    let session = repo.login("alice", None).unwrap();
    versionable_doc(&session);
    let vm = session.version_manager();

    let v1 = vm.checkpoint("/doc").unwrap();
    edit_title(&session, "/doc", "two");
    let _v2 = vm.checkpoint("/doc").unwrap();
    edit_title(&session, "/doc", "three");
    let v3 = vm.checkin("/doc").unwrap();

    let history = vm.version_history("/doc").unwrap();
    assert!(history.is_successor_of(&v3.key, &v1.key));
    assert!(!history.is_successor_of(&v1.key, &v3.key));

    vm.restore("/doc", v1.name.as_str(), false).unwrap();
    vm.checkout("/doc").unwrap();
    let v4 = vm.checkin("/doc").unwrap();
    assert_eq!(v4.predecessors, vec![v1.key]);

    let history = vm.version_history("/doc").unwrap();
    let v1_now = history.record(&v1.key).unwrap();
    assert!(v1_now.successors.contains(&v4.key));
    assert!(!history.is_successor_of(&v4.key, &v3.key));
}

#[test]
fn test_restore_requires_clean_session() {
    let repo = repository(HistoryLayout::default());
    let session = repo.login("alice", None).unwrap();
    versionable_doc(&session);
    let vm = session.version_manager();
    let v1 = vm.checkpoint("/doc").unwrap();
    session.root_node().unwrap().add_node("scratch").unwrap();
    assert!(matches!(
        vm.restore("/doc", v1.name.as_str(), false),
        Err(RepositoryError::InvalidItemState(_))
    ));
}

#[test]
fn test_restore_unknown_version_name() {
    let repo = repository(HistoryLayout::default());
    let session = repo.login("alice", None).unwrap();
    versionable_doc(&session);
    assert!(matches!(
        session.version_manager().restore("/doc", "nope", false),
        Err(RepositoryError::Version(_))
    ));
}

#[test]
fn test_restore_removed_node_under_original_identifier() {
    let repo = repository(HistoryLayout::default());
    let session = repo.login("alice", None).unwrap();
    versionable_doc(&session);
    let vm = session.version_manager();
    let key = session.node("/doc").unwrap().key();
    let v1 = vm.checkpoint("/doc").unwrap();

    session.remove_item("/doc").unwrap();
    session.save().unwrap();
    assert!(!session.item_exists("/doc").unwrap());

    vm.restore_version("/doc", &v1, false).unwrap();
    let doc = session.node("/doc").unwrap();
    assert_eq!(doc.key(), key);
    assert_eq!(title(&session, "/doc"), "one");
    assert!(doc.is_node_type("mix:versionable").unwrap());
}

#[test]
fn test_restore_all_needs_a_rooted_version() {
    let repo = repository(HistoryLayout::default());
    let session = repo.login("alice", None).unwrap();
    versionable_doc(&session);
    let vm = session.version_manager();
    let v1 = vm.checkpoint("/doc").unwrap();
    edit_title(&session, "/doc", "two");

    vm.restore_all(std::slice::from_ref(&v1), false).unwrap();
    assert_eq!(title(&session, "/doc"), "one");

    session.remove_item("/doc").unwrap();
    session.save().unwrap();
    assert!(matches!(
        vm.restore_all(&[v1], false),
        Err(RepositoryError::Version(_))
    ));
}

#[test]
fn test_restore_by_label() {
    let repo = repository(HistoryLayout::default());
    let session = repo.login("alice", None).unwrap();
    versionable_doc(&session);
    let vm = session.version_manager();
    let v1 = vm.checkpoint("/doc").unwrap();
    vm.add_version_label("/doc", v1.name.as_str(), "published", false)
        .unwrap();
    edit_title(&session, "/doc", "two");
    vm.checkin("/doc").unwrap();

    vm.restore_by_label("/doc", "published", false).unwrap();
    assert_eq!(title(&session, "/doc"), "one");
    assert!(matches!(
        vm.restore_by_label("/doc", "missing", false),
        Err(RepositoryError::Version(_))
    ));
}

#[test]
fn test_nested_versionable_child_is_restored_from_its_own_history() {
    let repo = repository(HistoryLayout::default());
    let session = repo.login("alice", None).unwrap();
    let parent = session.root_node().unwrap().add_node("parent").unwrap();
    parent.add_mixin("mix:versionable").unwrap();
    let child = parent.add_node("child").unwrap();
    child.add_mixin("mix:versionable").unwrap();
    child.set_property("title", "child one").unwrap();
    session.save().unwrap();

    let vm = session.version_manager();
    vm.checkpoint("/parent/child").unwrap();
    let p1 = vm.checkpoint("/parent").unwrap();

    let frozen = vm.frozen_node(&p1).unwrap();
    assert!(matches!(
        &frozen.children[0],
        arbor_jcr::VersionedItem::VersionedChild { .. }
    ));

    session.remove_item("/parent/child").unwrap();
    session.save().unwrap();
    vm.restore("/parent", p1.name.as_str(), false).unwrap();
    assert_eq!(title(&session, "/parent/child"), "child one");
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

#[test]
fn test_labels_are_unique_per_history() {
    let repo = repository(HistoryLayout::default());
    let session = repo.login("alice", None).unwrap();
    versionable_doc(&session);
    let vm = session.version_manager();
    let v1 = vm.checkpoint("/doc").unwrap();
    let v2 = vm.checkpoint("/doc").unwrap();

    vm.add_version_label("/doc", v1.name.as_str(), "stable", false).unwrap();
    vm.add_version_label("/doc", v1.name.as_str(), "stable", false).unwrap();
    assert!(matches!(
        vm.add_version_label("/doc", v2.name.as_str(), "stable", false),
        Err(RepositoryError::Version(_))
    ));
    assert!(vm
        .add_version_label("/doc", v2.name.as_str(), "bad/label", false)
        .is_err());

    let history = vm.version_history("/doc").unwrap();
    assert_eq!(history.labels_of(&v1.key), vec!["stable"]);
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Publishes `/doc` from the default workspace into staging.
fn published(repo: &Arc<Repository>) -> (Session, Session) {
    let default = repo.login("alice", None).unwrap();
    versionable_doc(&default);
    default.version_manager().checkin("/doc").unwrap();
    let staging = repo.login("alice", Some("staging")).unwrap();
    staging
        .version_manager()
        .merge("/", "default", false, false)
        .unwrap();
    (default, staging)
}

#[test]
fn test_merge_copies_missing_nodes_with_same_identifiers() {
    let repo = repository(HistoryLayout::default());
    let (default, staging) = published(&repo);
    let original = default.node("/doc").unwrap();
    let copy = staging.node("/doc").unwrap();
    assert_eq!(copy.key(), original.key());
    assert_eq!(title(&staging, "/doc"), "one");
    assert!(staging.item_exists("/doc/section/body").unwrap());
    assert_eq!(
        staging.version_manager().base_version("/doc").unwrap().key,
        default.version_manager().base_version("/doc").unwrap().key
    );
}

#[test]
fn test_merge_fast_forwards_checked_in_target() {
    let repo = repository(HistoryLayout::default());
    let (default, staging) = published(&repo);
    edit_title(&default, "/doc", "two");
    let v2 = default.version_manager().checkin("/doc").unwrap();

    let failed = staging
        .version_manager()
        .merge("/doc", "default", false, false)
        .unwrap();
    assert!(failed.is_empty());
    assert_eq!(title(&staging, "/doc"), "two");
    assert_eq!(staging.version_manager().base_version("/doc").unwrap().key, v2.key);
}

#[test]
fn test_merge_leaves_newer_target_alone() {
    let repo = repository(HistoryLayout::default());
    let (_default, staging) = published(&repo);
    edit_title(&staging, "/doc", "staged");
    staging.version_manager().checkin("/doc").unwrap();

    staging
        .version_manager()
        .merge("/doc", "default", false, false)
        .unwrap();
    assert_eq!(title(&staging, "/doc"), "staged");
}

#[test]
fn test_diverged_merge_and_resolution() {
    let repo = repository(HistoryLayout::default());
    let (default, staging) = published(&repo);
    edit_title(&staging, "/doc", "staged");
    staging.version_manager().checkin("/doc").unwrap();
    edit_title(&default, "/doc", "authored");
    let theirs = default.version_manager().checkin("/doc").unwrap();

    let vm = staging.version_manager();
    assert!(matches!(
        vm.merge("/doc", "default", false, false),
        Err(RepositoryError::Merge(_))
    ));

    let failed = vm.merge("/doc", "default", true, false).unwrap();
    assert_eq!(failed, vec![staging.node("/doc").unwrap().key()]);
    let marked = staging
        .node("/doc")
        .unwrap()
        .property("jcr:mergeFailed")
        .unwrap()
        .values()
        .unwrap();
    assert_eq!(marked, vec![Value::Reference(theirs.key)]);
    assert_eq!(title(&staging, "/doc"), "staged");

    assert!(matches!(vm.done_merge("/doc", &theirs), Err(RepositoryError::Version(_))));
    vm.checkout("/doc").unwrap();
    assert!(matches!(vm.checkin("/doc"), Err(RepositoryError::Version(_))));
    vm.done_merge("/doc", &theirs).unwrap();
    assert!(!staging.node("/doc").unwrap().has_property("jcr:mergeFailed").unwrap());

    let merged = vm.checkin("/doc").unwrap();
    assert!(merged.predecessors.contains(&theirs.key));
}

#[test]
fn test_cancel_merge_does_not_add_predecessor() {
    let repo = repository(HistoryLayout::default());
    let (default, staging) = published(&repo);
    edit_title(&staging, "/doc", "staged");
    staging.version_manager().checkin("/doc").unwrap();
    edit_title(&default, "/doc", "authored");
    let theirs = default.version_manager().checkin("/doc").unwrap();

    let vm = staging.version_manager();
    vm.merge("/doc", "default", true, false).unwrap();
    vm.checkout("/doc").unwrap();
    vm.cancel_merge("/doc", &theirs).unwrap();
    let merged = vm.checkin("/doc").unwrap();
    assert!(!merged.predecessors.contains(&theirs.key));
}

#[test]
fn test_merge_from_unknown_workspace() {
    let repo = repository(HistoryLayout::default());
    let session = repo.login("alice", None).unwrap();
    assert!(matches!(
        session.version_manager().merge("/", "nowhere", false, false),
        Err(RepositoryError::NoSuchWorkspace(_))
    ));
}
