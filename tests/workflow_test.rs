//! End-to-end workflow: write, index, read, prove, verify

mod common;

use chainkv::{ChainState, Kv, StoreError};
use common::*;

#[tokio::test(flavor = "multi_thread")]
async fn test_set_get_history_scenario() {
    let (store, _dir) = open_test_store().await;

    let first = store.set("a", "1").unwrap();
    assert_eq!(first.tx_id, 1);
    let item = store.get_since(b"a", 1).await.unwrap();
    assert_eq!((item.value.as_slice(), item.tx_id), (b"1".as_slice(), 1));

    let second = store.set("a", "2").unwrap();
    assert_eq!(second.tx_id, 2);
    let item = store.get_since(b"a", 2).await.unwrap();
    assert_eq!((item.value.as_slice(), item.tx_id), (b"2".as_slice(), 2));

    let snapshot = store.index_snapshot();
    assert_eq!(snapshot.get_ts(b"a", 2).unwrap(), vec![2, 1]);
    snapshot.release();

    let history = store.history(b"a", 0, 0, true).unwrap();
    let values: Vec<_> = history.iter().map(|i| i.value.clone()).collect();
    assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_tracks_trusted_state_across_reads() {
    let (store, _dir) = open_test_store().await;
    let mut trusted = ChainState::genesis();

    for round in 0..5u32 {
        store
            .set_batch(vec![
                Kv::new(format!("doc:{round}"), format!("body {round}")),
                Kv::new("doc:latest", format!("{round}")),
            ])
            .unwrap();
        wait_indexed(&store).await;

        // Each verified read moves the client forward; history must extend it
        let item = store.safe_get(b"doc:latest", trusted).await.unwrap();
        assert_eq!(item.value, round.to_string().into_bytes());
        trusted = assert_verifies(&item, &trusted);
        assert_eq!(trusted, store.current_root());
    }

    // Reading an old key never moves the trusted state backwards
    let item = store.safe_get(b"doc:0", trusted).await.unwrap();
    assert_eq!(item.tx_id, 1);
    assert_eq!(assert_verifies(&item, &trusted), trusted);

    assert_extends(&store, &ChainState::genesis());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_forked_history_is_detected() {
    // Two stores with the same first write diverge on the second
    let (honest, _d1) = open_test_store().await;
    let (forked, _d2) = open_test_store().await;

    honest.set("k", "1").unwrap();
    forked.set("k", "1").unwrap();
    honest.set("k", "2").unwrap();
    forked.set("k", "evil").unwrap();
    wait_indexed(&forked).await;

    // The client trusts the honest head
    let trusted = honest.current_root();
    let item = forked.safe_get(b"k", trusted).await.unwrap();
    assert!(matches!(
        item.verify(&trusted),
        Err(StoreError::Verification(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_and_scan() {
    let (store, _dir) = open_test_store().await;
    let entries: Vec<_> = (0..40)
        .map(|i| Kv::new(format!("item:{i:03}"), format!("{i}")))
        .collect();
    let result = store.set_batch(entries).unwrap();
    store.set("other", "x").unwrap();
    wait_indexed(&store).await;

    assert_eq!(store.count(b"item:").unwrap(), 40);
    let page = store.scan(b"item:", true, 5).unwrap();
    assert_eq!(page.len(), 5);
    assert_eq!(page[0].key, b"item:000");
    assert!(page.iter().all(|i| i.tx_id == result.tx_id));

    let tail = store.scan(b"item:", false, 3).unwrap();
    let keys: Vec<_> = tail.iter().map(|i| i.key.clone()).collect();
    assert_eq!(
        keys,
        vec![b"item:039".to_vec(), b"item:038".to_vec(), b"item:037".to_vec()]
    );

    let tx = store.by_index(result.tx_id).unwrap();
    assert_eq!(tx.entries.len(), 40);
    let proof = store.proof(result.tx_id, b"item:017").unwrap();
    assert_eq!(proof.tree_size, 40);
    assert_eq!(proof.leaf_index, 17);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_reports_progress() {
    let (store, _dir) = open_test_store().await;
    for i in 0..3 {
        store.set(format!("k{i}"), "v").unwrap();
    }
    wait_indexed(&store).await;

    let health = store.health();
    assert!(health.healthy);
    assert_eq!(health.tx_count, 3);
    assert_eq!(health.indexed_tx, 3);
    assert!(health.halted.is_none());

    store.shutdown().await;
    // Committed data stays readable from the log after shutdown
    assert_eq!(store.read_tx(3).unwrap().entries[0].key, b"k2");
}
