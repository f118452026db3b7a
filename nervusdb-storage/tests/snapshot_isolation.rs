//! Reader/writer isolation through epoch pinning.

use nervusdb_storage::{Db, Options};
use tempfile::tempdir;

fn bulk_options() -> Options {
    Options {
        durable_writes: false,
        ..Options::default()
    }
}

#[test]
fn pinned_reader_ignores_concurrent_flush() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("graph.ndb");

    let writer = Db::open(&base, bulk_options()).unwrap();
    for i in 0..5_000 {
        writer.add_fact(&format!("n{i}"), "knows", &format!("m{i}")).unwrap();
    }
    writer.flush().unwrap();

    // Lockless reader while the writer still holds the lock.
    let reader = Db::open(&base, Options::read_only()).unwrap();
    let pinned_epoch = reader.current_epoch();
    reader.push_pinned_epoch(pinned_epoch);
    assert_eq!(reader.find(None, Some("knows"), None).unwrap().len(), 5_000);

    // Writer moves on.
    for i in 0..10 {
        writer.add_fact(&format!("x{i}"), "knows", &format!("y{i}")).unwrap();
    }
    writer.flush().unwrap();
    assert!(writer.current_epoch() > pinned_epoch);

    // Pinned: still the old view.
    assert_eq!(reader.find(None, Some("knows"), None).unwrap().len(), 5_000);

    // Unpinned: the new manifest is picked up.
    assert_eq!(reader.pop_pinned_epoch(), Some(pinned_epoch));
    assert_eq!(reader.find(None, Some("knows"), None).unwrap().len(), 5_010);

    reader.close().unwrap();
    writer.close().unwrap();
}

#[test]
fn pins_nest() {
    let dir = tempdir().unwrap();
    let db = Db::open(dir.path().join("graph.ndb"), bulk_options()).unwrap();

    db.add_fact("a", "r", "b").unwrap();
    db.flush().unwrap();
    let first = db.current_epoch();
    db.push_pinned_epoch(first);

    db.add_fact("c", "r", "d").unwrap();
    db.flush().unwrap();

    // While pinned, even the writer's own queries stay on the old epoch.
    assert_eq!(db.find(None, Some("r"), None).unwrap().len(), 1);

    db.push_pinned_epoch(first);
    assert_eq!(db.find(None, Some("r"), None).unwrap().len(), 1);
    db.pop_pinned_epoch();
    assert_eq!(db.find(None, Some("r"), None).unwrap().len(), 1);

    db.pop_pinned_epoch();
    assert_eq!(db.find(None, Some("r"), None).unwrap().len(), 2);
    db.close().unwrap();
}

#[test]
fn snapshot_repeats_identical_results_across_flush() {
    let dir = tempdir().unwrap();
    let db = Db::open(dir.path().join("graph.ndb"), bulk_options()).unwrap();
    for i in 0..100 {
        db.add_fact(&format!("s{i}"), "p", "o").unwrap();
    }
    db.flush().unwrap();

    let epoch = db.current_epoch();
    db.push_pinned_epoch(epoch);
    let before = db.find(None, Some("p"), None).unwrap();

    db.add_fact("extra", "p", "o").unwrap();
    db.flush().unwrap();

    let after = db.find(None, Some("p"), None).unwrap();
    assert_eq!(before, after, "a pinned snapshot must not move");
    db.pop_pinned_epoch();
    assert_eq!(db.find(None, Some("p"), None).unwrap().len(), 101);
    db.close().unwrap();
}

#[test]
fn unbatched_writes_are_immediately_visible_to_writer() {
    let dir = tempdir().unwrap();
    let db = Db::open(dir.path().join("graph.ndb"), Options::default()).unwrap();
    db.add_fact("a", "r", "b").unwrap();
    assert_eq!(db.find(Some("a"), None, None).unwrap().len(), 1);
    db.close().unwrap();
}
