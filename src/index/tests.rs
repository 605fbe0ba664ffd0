use super::*;
use tempfile::TempDir;

fn create_test_index(max_node_entries: usize) -> (VersionedIndex, TempDir) {
    let dir = TempDir::new().unwrap();
    let index = VersionedIndex::open(
        dir.path().join("index"),
        IndexConfig { max_node_entries },
        false,
    )
    .unwrap();
    (index, dir)
}

fn keys(reader: Reader<'_>) -> Vec<String> {
    reader
        .map(|item| String::from_utf8(item.unwrap().0).unwrap())
        .collect()
}

#[test]
fn test_empty_index() {
    let (index, _dir) = create_test_index(4);
    assert_eq!(index.root(), IndexRoot::default());
    assert!(matches!(index.get(b"a"), Err(StoreError::KeyNotFound)));

    let snapshot = index.snapshot();
    let mut reader = snapshot.reader(ReaderSpec::default()).unwrap();
    assert!(matches!(reader.read(), Err(StoreError::KeyNotFound)));
    assert_eq!(snapshot.count(b"").unwrap(), 0);
}

#[test]
fn test_apply_tx_advances_watermark() {
    let (index, _dir) = create_test_index(4);
    index.apply_tx(1, [b"a".as_slice(), b"b".as_slice()]).unwrap();
    assert_eq!(index.indexed_tx(), 1);
    assert_eq!(index.get(b"a").unwrap(), 1);
    assert_eq!(index.get(b"b").unwrap(), 1);

    // Out of order
    assert!(matches!(
        index.apply_tx(3, [b"c".as_slice()]),
        Err(StoreError::IllegalArguments(_))
    ));
    assert!(matches!(
        index.apply_tx(1, [b"c".as_slice()]),
        Err(StoreError::IllegalArguments(_))
    ));
    assert_eq!(index.indexed_tx(), 1);
}

#[test]
fn test_insert_rules() {
    let (index, _dir) = create_test_index(4);
    assert!(matches!(
        index.insert(b"", 1),
        Err(StoreError::IllegalArguments(_))
    ));

    index.insert(b"k", 5).unwrap();
    assert_eq!(index.indexed_tx(), 0);
    assert!(matches!(
        index.insert(b"k", 4),
        Err(StoreError::IllegalArguments(_))
    ));

    // Re-applying the same TxID is a no-op
    index.insert(b"k", 5).unwrap();
    assert_eq!(index.get_ts(b"k", 10).unwrap(), vec![5]);
}

#[test]
fn test_get_ts_newest_first() {
    let (index, _dir) = create_test_index(4);
    index.apply_tx(1, [b"a".as_slice()]).unwrap();
    index.apply_tx(2, [b"a".as_slice(), b"b".as_slice()]).unwrap();
    index.apply_tx(3, [b"b".as_slice()]).unwrap();

    assert_eq!(index.get_ts(b"a", 2).unwrap(), vec![2, 1]);
    assert_eq!(index.get_ts(b"a", 1).unwrap(), vec![2]);
    assert_eq!(index.get_ts(b"b", 10).unwrap(), vec![3, 2]);
    assert!(matches!(
        index.get_ts(b"a", 0),
        Err(StoreError::IllegalArguments(_))
    ));
    assert!(matches!(
        index.get_ts(b"zz", 1),
        Err(StoreError::KeyNotFound)
    ));
}

#[test]
fn test_old_snapshot_is_unaffected_by_later_inserts() {
    let (index, _dir) = create_test_index(4);
    index.apply_tx(1, [b"a".as_slice()]).unwrap();

    let before = index.snapshot();
    for tx in 2..=40u64 {
        let key = format!("key{tx:03}");
        index.apply_tx(tx, [key.as_bytes(), b"a".as_slice()]).unwrap();
    }

    assert_eq!(before.indexed_tx(), 1);
    assert_eq!(before.get(b"a").unwrap(), 1);
    assert!(matches!(before.get(b"key002"), Err(StoreError::KeyNotFound)));
    assert_eq!(before.count(b"").unwrap(), 1);

    let after = index.snapshot();
    assert_eq!(after.get(b"a").unwrap(), 40);
    assert_eq!(after.version_count(b"a").unwrap(), 40);
    assert_eq!(after.count(b"key").unwrap(), 39);
    assert_eq!(index.active_snapshots(), 2);

    before.release();
    drop(after);
    assert_eq!(index.active_snapshots(), 0);
}

#[test]
fn test_small_fanout_splits_and_keeps_order() {
    let (index, _dir) = create_test_index(4);
    // Insert in a scrambled order so splits happen on both sides
    let mut expected = Vec::new();
    for (tx, i) in (1..=64u64).zip((0..64u64).map(|i| (i * 37) % 64)) {
        let key = format!("k{i:02}");
        index.apply_tx(tx, [key.as_bytes()]).unwrap();
        expected.push(key);
    }
    expected.sort();

    let snapshot = index.snapshot();
    assert_eq!(keys(snapshot.reader(ReaderSpec::default()).unwrap()), expected);

    let mut descending = expected.clone();
    descending.reverse();
    assert_eq!(
        keys(snapshot.reader(ReaderSpec::default().descending()).unwrap()),
        descending
    );

    for key in &expected {
        assert!(snapshot.get(key.as_bytes()).is_ok());
    }
    assert!(index.node_count() > 16);
}

#[test]
fn test_prefix_readers() {
    let (index, _dir) = create_test_index(4);
    let all = [
        "a", "user:1", "user:2", "user:3", "user:4", "user:5", "userx", "z",
    ];
    for (tx, key) in (1u64..).zip(all) {
        index.apply_tx(tx, [key.as_bytes()]).unwrap();
    }
    let snapshot = index.snapshot();

    let asc = snapshot.reader(ReaderSpec::with_prefix("user:")).unwrap();
    assert_eq!(
        keys(asc),
        vec!["user:1", "user:2", "user:3", "user:4", "user:5"]
    );

    let from = snapshot
        .reader(ReaderSpec::with_prefix("user:").start_at("user:3"))
        .unwrap();
    assert_eq!(keys(from), vec!["user:3", "user:4", "user:5"]);

    let desc = snapshot
        .reader(ReaderSpec::with_prefix("user:").descending())
        .unwrap();
    assert_eq!(
        keys(desc),
        vec!["user:5", "user:4", "user:3", "user:2", "user:1"]
    );

    let desc_from = snapshot
        .reader(ReaderSpec::with_prefix("user:").descending().start_at("user:2"))
        .unwrap();
    assert_eq!(keys(desc_from), vec!["user:2", "user:1"]);

    // Without match_prefix the reader runs to the end of the keyspace
    let unbounded = snapshot
        .reader(ReaderSpec {
            prefix: b"user:4".to_vec(),
            ..ReaderSpec::default()
        })
        .unwrap();
    assert_eq!(keys(unbounded), vec!["user:4", "user:5", "userx", "z"]);

    let none = snapshot.reader(ReaderSpec::with_prefix("nope")).unwrap();
    assert!(keys(none).is_empty());

    assert_eq!(snapshot.count(b"user").unwrap(), 6);
}

#[test]
fn test_reader_yields_latest_tx() {
    let (index, _dir) = create_test_index(4);
    index.apply_tx(1, [b"a".as_slice(), b"b".as_slice()]).unwrap();
    index.apply_tx(2, [b"a".as_slice()]).unwrap();

    let snapshot = index.snapshot();
    let mut reader = snapshot.reader(ReaderSpec::default()).unwrap();
    assert_eq!(reader.read().unwrap(), (b"a".to_vec(), 2));
    assert_eq!(reader.read().unwrap(), (b"b".to_vec(), 1));
    assert!(matches!(reader.read(), Err(StoreError::KeyNotFound)));
    assert!(matches!(reader.read(), Err(StoreError::KeyNotFound)));
}

#[test]
fn test_reopen_restores_watermark_and_nodes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index");
    {
        let index = VersionedIndex::open(&path, IndexConfig { max_node_entries: 4 }, false).unwrap();
        for tx in 1..=20u64 {
            let key = format!("key{tx:02}");
            index.apply_tx(tx, [key.as_bytes()]).unwrap();
        }
    }

    let index = VersionedIndex::open(&path, IndexConfig { max_node_entries: 4 }, false).unwrap();
    assert_eq!(index.indexed_tx(), 20);
    assert_eq!(index.get(b"key07").unwrap(), 7);
    assert_eq!(index.snapshot().count(b"key").unwrap(), 20);

    index.apply_tx(21, [b"key07".as_slice()]).unwrap();
    assert_eq!(index.get_ts(b"key07", 5).unwrap(), vec![21, 7]);
}

#[test]
fn test_hot_key_history_stays_compact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index");
    let file = path.join(INDEX_FILE);
    {
        let index = VersionedIndex::open(&path, IndexConfig { max_node_entries: 4 }, false).unwrap();
        for tx in 1..=1000u64 {
            index.apply_tx(tx, [b"hot".as_slice()]).unwrap();
        }
        let first_half = std::fs::metadata(&file).unwrap().len();
        let mid = index.snapshot();

        for tx in 1001..=2000u64 {
            index.apply_tx(tx, [b"hot".as_slice()]).unwrap();
        }
        let total = std::fs::metadata(&file).unwrap().len();

        // Every update writes a bounded number of bytes
        assert!(total < 2000 * 512, "node file is {total} bytes");
        let second_half = total - first_half;
        assert!(
            second_half < first_half + first_half / 4,
            "second 1000 updates took {second_half} bytes, first took {first_half}"
        );

        assert_eq!(mid.version_count(b"hot").unwrap(), 1000);
        assert_eq!(mid.get_ts(b"hot", 3).unwrap(), vec![1000, 999, 998]);
    }

    let index = VersionedIndex::open(&path, IndexConfig { max_node_entries: 4 }, false).unwrap();
    let snapshot = index.snapshot();
    assert_eq!(snapshot.version_count(b"hot").unwrap(), 2000);
    assert_eq!(
        snapshot.get_ts(b"hot", 20).unwrap(),
        (1981..=2000).rev().collect::<Vec<u64>>()
    );
    let all = snapshot.get_ts(b"hot", usize::MAX).unwrap();
    assert_eq!(all, (1..=2000).rev().collect::<Vec<u64>>());
}

#[test]
fn test_reset_clears_everything() {
    let (index, _dir) = create_test_index(4);
    index.apply_tx(1, [b"a".as_slice()]).unwrap();
    index.reset().unwrap();

    assert_eq!(index.root(), IndexRoot::default());
    assert_eq!(index.node_count(), 0);
    index.apply_tx(1, [b"b".as_slice()]).unwrap();
    assert!(matches!(index.get(b"a"), Err(StoreError::KeyNotFound)));
}

#[test]
fn test_invalid_config_rejected() {
    let dir = TempDir::new().unwrap();
    let result = VersionedIndex::open(dir.path(), IndexConfig { max_node_entries: 2 }, false);
    assert!(matches!(result, Err(StoreError::Config(_))));
}
