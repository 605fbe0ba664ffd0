// File: src/background/indexer/job.rs

use std::sync::Arc;

use tokio::sync::broadcast;

use super::config::IndexerConfig;
use super::watermark::WatermarkPublisher;
use crate::error::{StoreError, StoreResult};
use crate::index::VersionedIndex;
use crate::traits::TxSource;

/// Indexer background job
///
/// Drains committed transactions in TxID order into the versioned index:
/// 1. Reads the next transaction from the source
/// 2. Applies all of its keys to the index as one durable step
/// 3. Advances the watermark
///
/// It is woken by the source's commit channel, never by a timer. Any error
/// halts the job; waiters then fail with `IndexingHalted`.
pub struct Indexer {
    source: Arc<dyn TxSource>,
    index: Arc<VersionedIndex>,
    publisher: WatermarkPublisher,
    config: IndexerConfig,
}

/// Outcome of one catch-up pass
enum CatchUp {
    Idle,
    Shutdown,
}

impl Indexer {
    pub fn new(
        source: Arc<dyn TxSource>,
        index: Arc<VersionedIndex>,
        publisher: WatermarkPublisher,
        config: IndexerConfig,
    ) -> Self {
        Self {
            source,
            index,
            publisher,
            config,
        }
    }

    /// Run the indexer as a background task
    ///
    /// Runs until a shutdown signal is received, the commit channel closes,
    /// or indexing fails.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut commits = self.source.subscribe();

        loop {
            // Mark the current head as seen before reading it, so a commit
            // that lands during catch-up still wakes the next iteration
            commits.borrow_and_update();

            match self.catch_up(&mut shutdown).await {
                Ok(CatchUp::Idle) => {}
                Ok(CatchUp::Shutdown) => {
                    tracing::info!(indexed_tx = self.index.indexed_tx(), "Indexer shutting down");
                    return;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        indexed_tx = self.index.indexed_tx(),
                        committed_tx = self.source.committed_tx_id(),
                        "Indexer halted"
                    );
                    self.publisher.halt(e.to_string());
                    return;
                }
            }

            tokio::select! {
                changed = commits.changed() => {
                    if changed.is_err() {
                        tracing::info!("Commit channel closed, indexer stopping");
                        return;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!(indexed_tx = self.index.indexed_tx(), "Indexer shutting down");
                    return;
                }
            }
        }
    }

    /// Index everything committed so far, one batch at a time
    async fn catch_up(&self, shutdown: &mut broadcast::Receiver<()>) -> StoreResult<CatchUp> {
        loop {
            let committed = self.source.committed_tx_id();
            let next = self.index.indexed_tx() + 1;
            if next > committed {
                return Ok(CatchUp::Idle);
            }
            let last = committed.min(next + self.config.batch_size - 1);

            let source = Arc::clone(&self.source);
            let index = Arc::clone(&self.index);
            let result = tokio::task::spawn_blocking(move || index_range(&*source, &index, next, last))
                .await
                .map_err(|e| StoreError::IndexingHalted(format!("indexing task failed: {e}")));

            // Whatever was applied before a failure is durable
            self.publisher.advance(self.index.indexed_tx());
            result??;

            tracing::debug!(from = next, to = last, "Indexed transactions");

            if !matches!(
                shutdown.try_recv(),
                Err(broadcast::error::TryRecvError::Empty)
            ) {
                return Ok(CatchUp::Shutdown);
            }
            tokio::task::yield_now().await;
        }
    }
}

fn index_range(
    source: &dyn TxSource,
    index: &VersionedIndex,
    first: u64,
    last: u64,
) -> StoreResult<()> {
    for tx_id in first..=last {
        let tx = source.read_tx(tx_id)?;
        index.apply_tx(tx_id, tx.entries.iter().map(|kv| kv.key.as_slice()))?;
    }
    Ok(())
}
