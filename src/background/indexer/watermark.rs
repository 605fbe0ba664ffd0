//! Indexed watermark shared between the indexer and readers

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, StoreResult};

/// What the indexer has published so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexerState {
    /// Highest TxID fully reflected in the index
    pub indexed_tx: u64,

    /// Set once the indexer stopped on an unrecoverable error
    pub halted: Option<String>,
}

/// Write side, owned by the indexer task
#[derive(Debug)]
pub struct WatermarkPublisher {
    state: watch::Sender<IndexerState>,
}

impl WatermarkPublisher {
    pub fn new(indexed_tx: u64) -> Self {
        let (state, _) = watch::channel(IndexerState {
            indexed_tx,
            halted: None,
        });
        Self { state }
    }

    /// Move the watermark forward; never moves it back
    pub fn advance(&self, indexed_tx: u64) {
        self.state.send_if_modified(|s| {
            if indexed_tx > s.indexed_tx {
                s.indexed_tx = indexed_tx;
                true
            } else {
                false
            }
        });
    }

    /// Mark the indexer as halted and wake every waiter
    pub fn halt(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.state.send_modify(|s| {
            s.halted.get_or_insert(reason);
        });
    }

    #[must_use]
    pub fn watermark(&self) -> Watermark {
        Watermark {
            state: self.state.subscribe(),
        }
    }
}

/// Read side, cloned into every caller that needs to wait
#[derive(Debug, Clone)]
pub struct Watermark {
    state: watch::Receiver<IndexerState>,
}

impl Watermark {
    #[must_use]
    pub fn indexed_tx(&self) -> u64 {
        self.state.borrow().indexed_tx
    }

    #[must_use]
    pub fn halted(&self) -> Option<String> {
        self.state.borrow().halted.clone()
    }

    #[must_use]
    pub fn state(&self) -> IndexerState {
        self.state.borrow().clone()
    }

    /// Wait until the watermark reaches `target`
    ///
    /// Returns the watermark observed. A target that is already reached
    /// resolves immediately, even if `cancel` has fired.
    ///
    /// # Errors
    ///
    /// - `IndexingHalted` if the indexer stopped (or is gone) first
    /// - `Timeout` once `timeout` elapses
    /// - `Cancelled` when `cancel` fires
    pub async fn wait_for(
        &self,
        target: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        let mut rx = self.state.clone();

        tokio::select! {
            biased;
            reached = rx.wait_for(|s| s.indexed_tx >= target || s.halted.is_some()) => {
                match reached {
                    Ok(state) if state.indexed_tx >= target => Ok(state.indexed_tx),
                    Ok(state) => Err(StoreError::IndexingHalted(
                        state.halted.clone().unwrap_or_default(),
                    )),
                    Err(_) => Err(StoreError::IndexingHalted("indexer stopped".into())),
                }
            }
            () = cancel.cancelled() => Err(StoreError::Cancelled),
            () = tokio::time::sleep(timeout) => Err(StoreError::Timeout {
                target,
                indexed: self.indexed_tx(),
            }),
        }
    }
}
