//! Concurrent writers and readers against one store

mod common;

use std::collections::HashSet;

use chainkv::ChainState;
use common::*;

const WRITERS: usize = 8;
const WRITES_PER_TASK: usize = 25;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_are_gapless() {
    let (store, _dir) = open_test_store().await;
    let store = Arc::new(store);

    let mut tasks = Vec::new();
    for writer in 0..WRITERS {
        let store = Arc::clone(&store);
        tasks.push(tokio::task::spawn_blocking(move || {
            (0..WRITES_PER_TASK)
                .map(|i| {
                    store
                        .set(format!("w{writer}:{i:02}"), format!("{writer}-{i}"))
                        .unwrap()
                        .tx_id
                })
                .collect::<Vec<_>>()
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        let per_writer = task.await.unwrap();
        // One writer's commits are ordered among themselves
        assert!(per_writer.windows(2).all(|w| w[0] < w[1]));
        ids.extend(per_writer);
    }

    let total = (WRITERS * WRITES_PER_TASK) as u64;
    assert_eq!(ids.len() as u64, total);
    assert_eq!(ids, (1..=total).collect());
    assert_eq!(store.tx_count(), total);

    wait_indexed(&store).await;
    assert_extends(&store, &ChainState::genesis());
    for writer in 0..WRITERS {
        assert_eq!(
            store.count(format!("w{writer}:").as_bytes()).unwrap(),
            WRITES_PER_TASK as u64
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_during_writes_see_consistent_state() {
    let (store, _dir) = open_test_store().await;
    let store = Arc::new(store);
    store.set("counter", "0").unwrap();
    wait_indexed(&store).await;

    let writer = tokio::task::spawn_blocking({
        let store = Arc::clone(&store);
        move || {
            for i in 1..=100u32 {
                store.set("counter", i.to_string()).unwrap();
            }
        }
    });

    let reader = tokio::spawn({
        let store = Arc::clone(&store);
        async move {
            let mut trusted = ChainState::genesis();
            let mut last_seen = 0u64;
            for _ in 0..20 {
                let item = store.safe_get(b"counter", trusted).await.unwrap();
                trusted = assert_verifies(&item, &trusted);

                // Reads never go backwards
                assert!(item.tx_id >= last_seen);
                last_seen = item.tx_id;

                let value: u64 = String::from_utf8(item.value).unwrap().parse().unwrap();
                assert_eq!(value + 1, item.tx_id);
                tokio::task::yield_now().await;
            }
            trusted
        }
    });

    writer.await.unwrap();
    let trusted = reader.await.unwrap();
    assert_extends(&store, &trusted);

    wait_indexed(&store).await;
    assert_eq!(store.get(b"counter").await.unwrap().value, b"100");
    assert_eq!(store.history(b"counter", 0, 0, false).unwrap().len(), 101);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_index_snapshot_is_stable_while_indexing() {
    let (store, _dir) = open_test_store().await;
    for i in 0..10 {
        store.set(format!("k{i}"), "old").unwrap();
    }
    wait_indexed(&store).await;

    let snapshot = store.index_snapshot();
    let before = snapshot.count(b"k").unwrap();

    for i in 0..30 {
        store.set(format!("k{i}"), "new").unwrap();
    }
    wait_indexed(&store).await;

    assert_eq!(snapshot.indexed_tx(), 10);
    assert_eq!(snapshot.count(b"k").unwrap(), before);
    assert_eq!(snapshot.get(b"k3").unwrap(), 4);
    snapshot.release();

    assert_eq!(store.count(b"k").unwrap(), 30);
    assert_eq!(store.get(b"k3").await.unwrap().tx_id, 14);
}
