//! Store fixtures

use std::path::Path;
use std::time::Duration;

use chainkv::{Config, Store};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Fast configuration: no fsync, small nodes, short waits
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::for_dir(dir);
    config.storage.fsync_enabled = false;
    config.storage.max_segment_size = 4096;
    config.index.max_node_entries = 4;
    config.background.indexer.wait_timeout_ms = 5_000;
    config
}

/// Returns (store, _tempdir) - tempdir must be kept alive for the store to work
pub async fn open_test_store() -> (Store, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(test_config(dir.path())).await.unwrap();
    (store, dir)
}

pub async fn reopen(dir: &Path) -> Store {
    Store::open(test_config(dir)).await.unwrap()
}

/// Wait until everything committed so far is indexed
pub async fn wait_indexed(store: &Store) {
    store
        .wait_for_indexing(
            store.tx_count(),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
}
