// File: src/background/mod.rs

//! Background job management
//!
//! The only job is the indexer, which keeps the versioned index in step with
//! the transaction log. It never blocks the commit path and is woken by
//! commit notifications. Shutdown is signalled over a broadcast channel.

pub mod config;
pub mod indexer;

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::error::StoreResult;
use crate::index::VersionedIndex;
use crate::traits::TxSource;

pub use config::BackgroundConfig;
pub use indexer::{Indexer, IndexerConfig, Watermark, WatermarkPublisher};

/// Background job runner
///
/// Owns the watermark publisher until the indexer is started. Readers obtain
/// a [`Watermark`] at any time, including when jobs are disabled.
pub struct BackgroundJobRunner {
    source: Arc<dyn TxSource>,
    index: Arc<VersionedIndex>,
    publisher: Mutex<Option<WatermarkPublisher>>,
    watermark: Watermark,
    config: BackgroundConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl BackgroundJobRunner {
    pub fn new(
        source: Arc<dyn TxSource>,
        index: Arc<VersionedIndex>,
        config: BackgroundConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let publisher = WatermarkPublisher::new(index.indexed_tx());
        let watermark = publisher.watermark();

        Self {
            source,
            index,
            publisher: Mutex::new(Some(publisher)),
            watermark,
            config,
            shutdown_tx,
        }
    }

    /// Start all background jobs
    ///
    /// Calling this a second time starts nothing.
    pub async fn start(&self) -> StoreResult<Vec<tokio::task::JoinHandle<()>>> {
        if self.config.disabled {
            tracing::info!("Background jobs disabled via CHAINKV_BACKGROUND_DISABLED=true");
            return Ok(vec![]);
        }

        let Some(publisher) = self
            .publisher
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        else {
            tracing::warn!("Background jobs already started");
            return Ok(vec![]);
        };

        let mut handles = Vec::new();

        let indexer = Indexer::new(
            Arc::clone(&self.source),
            Arc::clone(&self.index),
            publisher,
            self.config.indexer.clone(),
        );
        let shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(indexer.run(shutdown_rx)));
        tracing::info!(
            indexed_tx = self.index.indexed_tx(),
            committed_tx = self.source.committed_tx_id(),
            batch_size = self.config.indexer.batch_size,
            "Indexer job started"
        );

        Ok(handles)
    }

    /// Watermark readers wait on
    #[must_use]
    pub fn watermark(&self) -> Watermark {
        self.watermark.clone()
    }

    #[must_use]
    pub fn config(&self) -> &BackgroundConfig {
        &self.config
    }

    /// Signal all jobs to shutdown gracefully
    pub fn shutdown(&self) {
        tracing::info!("Signaling background jobs to shutdown");
        let _ = self.shutdown_tx.send(());
    }
}
