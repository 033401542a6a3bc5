//! The repository over a SQLite file: persistence across reopen.

use arbor_jcr::{Repository, RepositoryConfig};
use arbor_storage::SqliteStore;

fn open(path: &str) -> std::sync::Arc<Repository> {
    let store = SqliteStore::new(path).expect("database should open");
    Repository::open(RepositoryConfig::default(), store).expect("repository should open")
}

#[test]
fn test_content_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("arbor.db");
    let db = db.to_str().unwrap();

    let key = {
        let repo = open(db);
        let session = repo.login("alice", None).unwrap();
        let doc = session.root_node().unwrap().add_node("doc").unwrap();
        doc.set_property("title", "persisted").unwrap();
        doc.add_node("child").unwrap();
        session.save().unwrap();
        repo.create_workspace("archive").unwrap();
        doc.key()
    };

    let repo = open(db);
    assert_eq!(repo.workspace_names().unwrap(), vec!["archive", "default"]);
    let session = repo.login("bob", None).unwrap();
    let doc = session.node("/doc").unwrap();
    assert_eq!(doc.key(), key);
    assert_eq!(doc.property("title").unwrap().string().unwrap(), "persisted");
    assert!(doc.has_node("child").unwrap());
}

#[test]
fn test_version_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("arbor.db");
    let db = db.to_str().unwrap();

    let v1 = {
        let repo = open(db);
        let session = repo.login("alice", None).unwrap();
        let doc = session.root_node().unwrap().add_node("doc").unwrap();
        doc.add_mixin("mix:versionable").unwrap();
        doc.set_property("title", "one").unwrap();
        session.save().unwrap();
        let vm = session.version_manager();
        let v1 = vm.checkpoint("/doc").unwrap();
        vm.add_version_label("/doc", v1.name.as_str(), "first", false)
            .unwrap();
        session.node("/doc").unwrap().set_property("title", "two").unwrap();
        session.save().unwrap();
        v1
    };

    let repo = open(db);
    let session = repo.login("alice", None).unwrap();
    let vm = session.version_manager();
    let history = vm.version_history("/doc").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.version_by_label("first").unwrap().key, v1.key);

    vm.restore_by_label("/doc", "first", false).unwrap();
    assert_eq!(
        session.property("/doc/title").unwrap().string().unwrap(),
        "one"
    );
}
