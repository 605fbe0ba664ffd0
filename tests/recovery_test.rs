//! Crash recovery through the Store facade

mod common;

use std::fs::{self, OpenOptions};
use std::io::Write;

use chainkv::index::INDEX_FILE;
use chainkv::storage::log::segment_path;
use chainkv::{Store, StoreError};
use common::*;
use tempfile::tempdir;

#[tokio::test(flavor = "multi_thread")]
async fn test_reopen_keeps_chain_and_index() {
    let dir = tempdir().unwrap();
    let head = {
        let store = Store::open(test_config(dir.path())).await.unwrap();
        for i in 0..50 {
            store.set(format!("key{}", i % 7), format!("v{i}")).unwrap();
        }
        wait_indexed(&store).await;
        let head = store.current_root();
        store.shutdown().await;
        head
    };

    let store = reopen(dir.path()).await;
    assert_eq!(store.current_root(), head);
    assert_eq!(store.index_info(), 50);
    assert_eq!(store.recovery_report().lag(), 0);

    let item = store.get(b"key0").await.unwrap();
    assert_eq!(item.tx_id, 50);
    assert_eq!(item.value, b"v49");
    assert_eq!(store.history(b"key3", 0, 0, false).unwrap().len(), 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_segments_roll_over_and_recover() {
    let dir = tempdir().unwrap();
    {
        let store = Store::open(test_config(dir.path())).await.unwrap();
        let blob = "x".repeat(1000);
        for i in 0..12 {
            store.set(format!("blob{i}"), blob.as_str()).unwrap();
        }
        store.shutdown().await;
    }
    let log_dir = dir.path().join("log");
    assert!(segment_path(&log_dir, 3).exists());

    let store = reopen(dir.path()).await;
    assert_eq!(store.tx_count(), 12);
    let item = store.get_since(b"blob11", 12).await.unwrap();
    assert_eq!(item.value.len(), 1000);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_torn_log_tail_is_dropped() {
    let dir = tempdir().unwrap();
    let second = {
        let store = Store::open(test_config(dir.path())).await.unwrap();
        store.set("a", "1").unwrap();
        let second = store.current_root();
        store.set("b", "2").unwrap();
        wait_indexed(&store).await;
        store.shutdown().await;
        second
    };

    let segment = segment_path(&dir.path().join("log"), 1);
    let len = fs::metadata(&segment).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&segment)
        .unwrap()
        .set_len(len - 3)
        .unwrap();

    let store = reopen(dir.path()).await;
    assert_eq!(store.current_root(), second);
    assert!(matches!(
        store.read_tx(2),
        Err(StoreError::NotFound { tx_id: 2, head: 1 })
    ));

    // The index had already seen tx 2; it is rebuilt to match the log
    assert!(store.recovery_report().index_reset);
    assert!(matches!(
        store.get_since(b"b", 1).await,
        Err(StoreError::KeyNotFound)
    ));
    assert_eq!(store.get_since(b"a", 1).await.unwrap().tx_id, 1);

    // The freed TxID is reused
    assert_eq!(store.set("c", "3").unwrap().tx_id, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flipped_byte_inside_log_is_corruption() {
    let dir = tempdir().unwrap();
    {
        let store = Store::open(test_config(dir.path())).await.unwrap();
        for i in 0..3 {
            store.set(format!("k{i}"), "value").unwrap();
        }
        store.shutdown().await;
    }

    let segment = segment_path(&dir.path().join("log"), 1);
    let mut bytes = fs::read(&segment).unwrap();
    // Inside the body of the first record
    bytes[40] ^= 0xFF;
    fs::write(&segment, bytes).unwrap();

    match Store::open(test_config(dir.path())).await {
        Err(StoreError::Corruption(_)) => {}
        Err(e) => panic!("expected Corruption, got {e}"),
        Ok(_) => panic!("expected Corruption, store opened"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_damaged_header_keeps_later_transactions() {
    let dir = tempdir().unwrap();
    {
        let store = Store::open(test_config(dir.path())).await.unwrap();
        for i in 0..3 {
            store.set(format!("k{i}"), "value").unwrap();
        }
        store.shutdown().await;
    }

    let segment = segment_path(&dir.path().join("log"), 1);
    let mut bytes = fs::read(&segment).unwrap();
    let len = bytes.len();
    // tx_id field of the first record header
    bytes[6] ^= 0xFF;
    fs::write(&segment, &bytes).unwrap();

    assert!(matches!(
        Store::open(test_config(dir.path())).await,
        Err(StoreError::Corruption(_))
    ));
    assert_eq!(fs::metadata(&segment).unwrap().len(), len as u64);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_torn_index_tail_is_replayed() {
    let dir = tempdir().unwrap();
    {
        let store = Store::open(test_config(dir.path())).await.unwrap();
        for i in 0..5 {
            store.set(format!("k{i}"), "v").unwrap();
        }
        wait_indexed(&store).await;
        store.shutdown().await;
    }

    // Half-written frame after the last commit frame
    let index_file = dir.path().join("index").join(INDEX_FILE);
    OpenOptions::new()
        .append(true)
        .open(&index_file)
        .unwrap()
        .write_all(&[1, 0, 0, 0, 50, 7, 7])
        .unwrap();

    let store = reopen(dir.path()).await;
    assert_eq!(store.recovery_report().indexed_tx, 5);
    assert!(!store.recovery_report().index_reset);
    store.set("k5", "v").unwrap();
    assert_eq!(store.get_since(b"k5", 6).await.unwrap().tx_id, 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lost_index_is_rebuilt() {
    let dir = tempdir().unwrap();
    {
        let store = Store::open(test_config(dir.path())).await.unwrap();
        for i in 0..20 {
            store.set(format!("k{i:02}"), format!("{i}")).unwrap();
        }
        wait_indexed(&store).await;
        store.shutdown().await;
    }
    fs::remove_dir_all(dir.path().join("index")).unwrap();

    let store = reopen(dir.path()).await;
    assert_eq!(store.recovery_report().lag(), 20);
    wait_indexed(&store).await;
    assert_eq!(store.count(b"k").unwrap(), 20);
    assert_eq!(store.get(b"k13").await.unwrap().value, b"13");
}
