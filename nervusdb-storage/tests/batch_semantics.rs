//! Batch staging, nesting, aborts and replay-time dedup.

use nervusdb_storage::txn::BatchOptions;
use nervusdb_storage::{Db, Options, TriplePattern};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> Db {
    Db::open(dir.join("graph.ndb"), Options::default()).unwrap()
}

fn count(db: &Db) -> usize {
    db.query(TriplePattern::any()).unwrap().len()
}

#[test]
fn aborted_batch_leaves_count_unchanged() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    db.add_fact("base", "r", "x").unwrap();
    let before = count(&db);

    db.begin_batch(BatchOptions::default()).unwrap();
    for i in 0..100 {
        db.add_fact(&format!("b{i}"), "r", "x").unwrap();
    }
    assert_eq!(count(&db), before + 100, "batch sees its own writes");
    db.abort_batch().unwrap();
    assert_eq!(count(&db), before);
    db.close().unwrap();
}

#[test]
fn crash_mid_batch_reproduces_pre_batch_count() {
    let dir = tempdir().unwrap();
    let before;
    {
        let db = open(dir.path());
        db.add_fact("base", "r", "x").unwrap();
        before = count(&db);
        db.begin_batch(BatchOptions::default()).unwrap();
        for i in 0..100 {
            db.add_fact(&format!("b{i}"), "r", "x").unwrap();
        }
        // No commit record: simulated crash.
        drop(db);
    }
    let db = open(dir.path());
    assert_eq!(count(&db), before);
    db.close().unwrap();
}

#[test]
fn committed_batch_applies_and_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let db = open(dir.path());
        db.begin_batch(BatchOptions::default()).unwrap();
        db.add_fact("a", "r", "b").unwrap();
        db.add_fact("c", "r", "d").unwrap();
        db.commit_batch(true).unwrap();
        assert_eq!(count(&db), 2);
        drop(db); // rely on the WAL, not on flush
    }
    let db = open(dir.path());
    assert_eq!(count(&db), 2);
    db.close().unwrap();
}

#[test]
fn nested_batches_merge_and_honor_inner_abort() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    db.begin_batch(BatchOptions::default()).unwrap();
    db.add_fact("outer", "r", "x").unwrap();

    db.begin_batch(BatchOptions::default()).unwrap();
    db.add_fact("inner", "r", "x").unwrap();
    assert_eq!(db.batch_depth(), 2);
    db.abort_batch().unwrap();

    assert_eq!(count(&db), 1, "aborted inner writes are gone");
    db.commit_batch(true).unwrap();
    assert_eq!(db.batch_depth(), 0);
    assert_eq!(db.find(Some("outer"), None, None).unwrap().len(), 1);
    assert!(db.find(Some("inner"), None, None).unwrap().is_empty());
    db.close().unwrap();
}

#[test]
fn batch_delete_shadows_shared_state_until_commit() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    db.add_fact("X", "r", "Y").unwrap();
    db.flush().unwrap();

    db.begin_batch(BatchOptions::default()).unwrap();
    db.delete_fact("X", "r", "Y").unwrap();
    assert!(db.find(Some("X"), None, None).unwrap().is_empty());
    db.abort_batch().unwrap();
    assert_eq!(db.find(Some("X"), None, None).unwrap().len(), 1);

    db.begin_batch(BatchOptions::default()).unwrap();
    db.delete_fact("X", "r", "Y").unwrap();
    db.commit_batch(true).unwrap();
    assert!(db.find(Some("X"), None, None).unwrap().is_empty());
    db.close().unwrap();
}

#[test]
fn batch_property_overlay_is_read_back_before_commit() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    let key = db.add_fact("Alice", "knows", "Bob").unwrap();

    let mut bag = nervusdb_storage::PropertyBag::new();
    bag.insert("since".into(), nervusdb_storage::PropertyValue::Int(2020));

    db.begin_batch(BatchOptions::default()).unwrap();
    db.set_edge_properties(key, bag.clone()).unwrap();
    assert_eq!(db.get_edge_properties(key), Some(bag.clone()));
    db.abort_batch().unwrap();
    assert_eq!(db.get_edge_properties(key), None);

    db.begin_batch(BatchOptions::default()).unwrap();
    db.set_edge_properties(key, bag.clone()).unwrap();
    db.commit_batch(true).unwrap();
    assert_eq!(db.get_edge_properties(key), Some(bag));
    db.close().unwrap();
}

#[test]
fn replay_rejects_a_tx_id_applied_on_a_prior_run() {
    let dir = tempdir().unwrap();
    {
        let db = open(dir.path());
        db.begin_batch(BatchOptions {
            tx_id: Some("tx-42".into()),
            session_id: Some("s1".into()),
        })
        .unwrap();
        db.add_fact("a", "r", "b").unwrap();
        db.commit_batch(true).unwrap();
        // The flush records tx-42 in the persistent applied set.
        db.flush().unwrap();

        // The caller reuses the id; the commit lands in the WAL but the
        // handle dies before flushing.
        db.begin_batch(BatchOptions {
            tx_id: Some("tx-42".into()),
            session_id: Some("s1".into()),
        })
        .unwrap();
        db.add_fact("duplicate", "r", "b").unwrap();
        db.commit_batch(true).unwrap();
        drop(db);
    }

    // Replay sees a commit whose id was already applied on a prior run and
    // rejects it wholesale.
    let db = open(dir.path());
    assert_eq!(count(&db), 1);
    assert!(db.find(Some("duplicate"), None, None).unwrap().is_empty());
    db.close().unwrap();
}

#[test]
fn a_never_flushed_committed_batch_replays_once() {
    let dir = tempdir().unwrap();
    {
        let db = open(dir.path());
        db.begin_batch(BatchOptions {
            tx_id: Some("tx-9".into()),
            session_id: None,
        })
        .unwrap();
        db.add_fact("a", "r", "b").unwrap();
        db.commit_batch(true).unwrap();
        drop(db); // crash before any flush
    }
    {
        let db = open(dir.path());
        assert_eq!(count(&db), 1);
        db.flush().unwrap();
        drop(db);
    }
    let db = open(dir.path());
    assert_eq!(count(&db), 1);
    db.close().unwrap();
}

#[test]
fn commit_without_batch_is_an_error() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    assert!(db.commit_batch(true).is_err());
    assert!(db.abort_batch().is_err());
    db.close().unwrap();
}
