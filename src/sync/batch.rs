//! Bounded-concurrency execution of batch write plans.

use futures::stream::{self, StreamExt};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{BatchConfig, BatchOperation};
use crate::remote::RemoteIndexClient;
use crate::sync::events::{SyncEvent, SyncObserver};

/// Chunk size and fan-out of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Operations per batch request
    pub batch_size: usize,
    /// Maximum chunks in flight at once
    pub concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            concurrency: 10,
        }
    }
}

impl From<&BatchConfig> for BatchOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            concurrency: config.concurrency,
        }
    }
}

/// Summary of a completed batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub uuid: Uuid,
    pub operation_count: usize,
    pub chunk_count: usize,
}

/// Splits write plans into chunks and submits them with bounded concurrency.
pub struct BatchRunner<'a> {
    client: &'a RemoteIndexClient,
    observer: &'a dyn SyncObserver,
}

impl<'a> BatchRunner<'a> {
    pub fn new(client: &'a RemoteIndexClient, observer: &'a dyn SyncObserver) -> Self {
        Self { client, observer }
    }

    /// Run every operation, one multi-collection request per chunk.
    ///
    /// At most `options.concurrency` chunks are in flight; the next pending
    /// chunk starts as soon as one completes. A chunk is complete once every
    /// task it spawned has been waited on. The first failing chunk aborts the
    /// run: chunks still in flight are dropped and the error carries the chunk
    /// index.
    pub async fn run_batch(
        &self,
        operations: &[BatchOperation],
        options: BatchOptions,
    ) -> Result<BatchSummary> {
        let batch_size = options.batch_size.max(1);
        let concurrency = options.concurrency.max(1);
        let uuid = Uuid::new_v4();
        let chunk_count = operations.len().div_ceil(batch_size);

        log::debug!(
            "Batch {}: {} operation(s) in {} chunk(s), concurrency {}",
            uuid,
            operations.len(),
            chunk_count,
            concurrency
        );
        self.observer.on_event(&SyncEvent::BatchStart { uuid, chunk_count });

        let mut chunks = stream::iter(operations.chunks(batch_size).enumerate())
            .map(|(index, chunk)| async move {
                self.client
                    .submit_batch(chunk)
                    .await
                    .map_err(|e| AppError::chunk(index, e))
            })
            .buffer_unordered(concurrency);

        while let Some(result) = chunks.next().await {
            if let Err(e) = result {
                log::error!("Batch {} aborted: {}", uuid, e);
                return Err(e);
            }
            self.observer.on_event(&SyncEvent::BatchChunk { uuid });
        }

        self.observer.on_event(&SyncEvent::BatchEnd { uuid });
        Ok(BatchSummary {
            uuid,
            operation_count: operations.len(),
            chunk_count,
        })
    }
}
