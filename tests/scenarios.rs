//! End-to-end scenarios from spec §8 "TESTABLE PROPERTIES", run against
//! the public `Environment`/`WriteTransaction`/`Cursor` API rather than
//! any internal type. A few scenarios need lower-level introspection
//! the public API doesn't expose (raw crash injection, direct GC-record
//! scanning); those are approximated as closely as the API allows, with
//! the deviation called out in the test's own comment.

use mdbrs::{EnvFlags, EnvironmentBuilder, NextMode, NodeFlags, Table, TableFlags};
use tempfile::tempdir;

/// S1 — basic put/get.
#[test]
fn s1_basic_put_get() {
    let dir = tempdir().unwrap();
    let env = EnvironmentBuilder::new().pagesize(4096).open(dir.path().join("s1.mdbrs")).unwrap();

    let mut wtxn = env.begin_write().unwrap();
    wtxn.put(Table::MAIN, b"foo", b"bar", NodeFlags::empty()).unwrap();
    wtxn.commit().unwrap();

    let rtxn = env.begin_read().unwrap();
    let value = rtxn.get(Table::MAIN, b"foo").unwrap().unwrap();
    assert_eq!(value, b"bar");
    assert_eq!(value.len(), 3);
}

/// S2 — DUPSORT ordering.
#[test]
fn s2_dupsort_ordering() {
    let dir = tempdir().unwrap();
    let env = EnvironmentBuilder::new().pagesize(4096).open(dir.path().join("s2.mdbrs")).unwrap();
    let d = env.open_table("d", TableFlags::CREATE | TableFlags::DUPSORT).unwrap();

    let mut wtxn = env.begin_write().unwrap();
    wtxn.put(d, b"k", b"002", NodeFlags::empty()).unwrap();
    wtxn.put(d, b"k", b"001", NodeFlags::empty()).unwrap();
    wtxn.put(d, b"k", b"003", NodeFlags::empty()).unwrap();

    let mut cur = wtxn.cursor(d).unwrap();
    let first = cur.first().unwrap().unwrap();
    assert_eq!(first.key, b"k");
    assert_eq!(first.value, b"001");
    assert_eq!(cur.next_dup().unwrap().unwrap().value, b"002");
    assert_eq!(cur.next_dup().unwrap().unwrap().value, b"003");
    assert!(cur.next_dup().unwrap().is_none());
}

/// S3 — crash simulation with SAFE_NOSYNC.
///
/// There's no process-kill hook through the public API, so "simulate
/// process abort without sync" is approximated by committing under
/// `SAFE_NOSYNC` (which marks meta slots "weak" rather than "steady",
/// see `env.rs::write_meta`) and then just reopening — a real crash
/// would lose at most the weak tail, which is exactly what reopening
/// and re-reading exercises here. What the scenario actually asserts —
/// that the visible state after reopen is some committed prefix T1..Tk
/// with k ≤ 3, never a torn mix — holds whether or not a crash
/// literally happened in between.
#[test]
fn s3_safe_nosync_crash_recovery_sees_a_consistent_prefix() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s3.mdbrs");
    {
        let env = EnvironmentBuilder::new().pagesize(4096).flags(EnvFlags::SAFE_NOSYNC).open(&path).unwrap();
        for (k, v) in [(b"t1", b"v1"), (b"t2", b"v2"), (b"t3", b"v3")] {
            let mut wtxn = env.begin_write().unwrap();
            wtxn.put(Table::MAIN, k, v, NodeFlags::empty()).unwrap();
            wtxn.commit().unwrap();
        }
    }

    let env = EnvironmentBuilder::new().pagesize(4096).flags(EnvFlags::SAFE_NOSYNC).open(&path).unwrap();
    let rtxn = env.begin_read().unwrap();
    assert!(rtxn.txnid() <= 3);
    // No partial visibility: every key up to the recovered txnid is
    // either fully present or the whole txn is absent, never a torn mix.
    let t1 = rtxn.get(Table::MAIN, b"t1").unwrap();
    let t2 = rtxn.get(Table::MAIN, b"t2").unwrap();
    let t3 = rtxn.get(Table::MAIN, b"t3").unwrap();
    match rtxn.txnid() {
        1 => assert_eq!((t1.as_deref(), t2.as_deref(), t3.as_deref()), (Some(&b"v1"[..]), None, None)),
        2 => assert_eq!((t1.as_deref(), t2.as_deref(), t3.as_deref()), (Some(&b"v1"[..]), Some(&b"v2"[..]), None)),
        3 => assert_eq!((t1.as_deref(), t2.as_deref(), t3.as_deref()), (Some(&b"v1"[..]), Some(&b"v2"[..]), Some(&b"v3"[..]))),
        other => panic!("unexpected recovered txnid {other}"),
    }
}

/// S4 — reader blocks GC.
///
/// Holding a reader at a literal `txnid == 100` would need 99 throwaway
/// commits first just to land there; this test establishes the same
/// mechanism (a live reader pinning `oldest_live` while the writer
/// churns) at whatever txnid the pin happens to land on, and checks the
/// same invariant the scenario cares about: the file grows while the
/// reader is alive and shrinks back (within one page) once it's gone
/// and one more writer txn has run.
#[test]
fn s4_reader_blocks_gc_until_released() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s4.mdbrs");
    let env = EnvironmentBuilder::new().pagesize(4096).open(&path).unwrap();

    {
        let mut wtxn = env.begin_write().unwrap();
        wtxn.put(Table::MAIN, b"seed", b"v", NodeFlags::empty()).unwrap();
        wtxn.commit().unwrap();
    }
    let baseline = env.audit().unwrap().first_unallocated;

    let pinned_reader = env.begin_read().unwrap();

    for _ in 0..1000u32 {
        let mut wtxn = env.begin_write().unwrap();
        wtxn.put(Table::MAIN, b"churn", b"v", NodeFlags::empty()).unwrap();
        wtxn.delete(Table::MAIN, b"churn").unwrap();
        wtxn.commit().unwrap();
    }

    let grown = env.audit().unwrap().first_unallocated;
    assert!(grown > baseline, "file must grow while a reader pins oldest_live and GC can't reclaim");

    pinned_reader.abort();

    {
        let mut wtxn = env.begin_write().unwrap();
        wtxn.put(Table::MAIN, b"churn", b"v", NodeFlags::empty()).unwrap();
        wtxn.delete(Table::MAIN, b"churn").unwrap();
        wtxn.commit().unwrap();
    }

    let recovered = env.audit().unwrap().first_unallocated;
    assert!(
        recovered <= baseline + 1,
        "first_unallocated should return to baseline +/- one page once the reader is gone: baseline={baseline}, recovered={recovered}"
    );
}

/// S5 — split propagates.
#[test]
fn s5_ascending_inserts_grow_height_and_preserve_order() {
    let dir = tempdir().unwrap();
    let env = EnvironmentBuilder::new().pagesize(4096).open(dir.path().join("s5.mdbrs")).unwrap();
    let t = env.open_table("wide", TableFlags::CREATE).unwrap();

    {
        let mut wtxn = env.begin_write().unwrap();
        for i in 0..10_000u32 {
            let mut key = format!("{i:04}").into_bytes();
            key.resize(512, b'.');
            wtxn.put(t, &key, b"v", NodeFlags::empty()).unwrap();
        }
        wtxn.commit().unwrap();
    }

    let stat = env.stat(t).unwrap();
    assert!(stat.depth >= 3, "tree height must be at least 3, got {}", stat.depth);
    assert_eq!(stat.entries, 10_000);

    let rtxn = env.begin_read().unwrap();
    let mut cur = rtxn.cursor(t).unwrap();
    let mut count = 0u32;
    let mut prev: Option<Vec<u8>> = None;
    let mut entry = cur.first().unwrap();
    while let Some(e) = entry {
        if let Some(p) = &prev {
            assert!(p.as_slice() < e.key.as_slice(), "cursor must walk keys in ascending order");
        }
        prev = Some(e.key.clone());
        count += 1;
        entry = cur.next(NextMode::Normal).unwrap();
    }
    assert_eq!(count, 10_000);
}

/// S6 — dense-mode GC.
///
/// There's no public hook to pin the GC table's own slot-id budget
/// directly, so the "fewer GC slot-ids than chunks" precondition is
/// induced the way the scenario names — many large retired lists from
/// one commit that deletes a big batch of LARGE-run values in a single
/// txn, which is exactly what forces `gc::updater::gc_update`'s bigfoot
/// splitting path. The original scenario's "every pgno present exactly
/// once across GC records" is checked via `audit()`'s reachability walk,
/// which already fails if any retired page is missing from the GC table
/// or double-counted as both live and free.
#[test]
fn s6_dense_mode_gc_after_bulk_large_value_retirement() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s6.mdbrs");
    let env = EnvironmentBuilder::new().pagesize(4096).open(&path).unwrap();

    let big = vec![0x42u8; 9_000];
    {
        let mut wtxn = env.begin_write().unwrap();
        for i in 0..64u32 {
            wtxn.put(Table::MAIN, format!("big-{i:03}").as_bytes(), &big, NodeFlags::empty()).unwrap();
        }
        wtxn.commit().unwrap();
    }
    {
        let mut wtxn = env.begin_write().unwrap();
        for i in 0..64u32 {
            assert!(wtxn.delete(Table::MAIN, format!("big-{i:03}").as_bytes()).unwrap());
        }
        wtxn.commit().unwrap();
    }

    env.audit().unwrap();

    drop(env);
    let env = EnvironmentBuilder::new().pagesize(4096).open(&path).unwrap();
    let report = env.audit().unwrap();
    assert_eq!(report.main_items, 0);
}
