//! Ingestion queue.
//!
//! Writes land in a bounded buffer and are acknowledged immediately; a
//! background worker drains batches into the primary shard in arrival
//! order. A batch the shard rejects (validation, read-only) is dropped
//! and counted: the buffer is upstream of the shard, so rejection is
//! observable in logs and metrics rather than in the client response.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{ShardError, ShardResult};
use crate::metrics;
use crate::shard::Shard;
use crate::storage::Document;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1_024;

#[derive(Debug, Clone)]
pub struct IngestBatch {
    pub id: Uuid,
    pub documents: Vec<Document>,
    pub received_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<IngestBatch>,
}

impl IngestQueue {
    /// Spawn the drain worker feeding `primary` and return the enqueue
    /// handle.
    pub fn start(primary: Arc<Shard>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(drain(primary, rx));
        Self { tx }
    }

    /// Buffer a batch. Fails fast when the queue is full instead of
    /// applying backpressure to the HTTP handler.
    pub fn enqueue(&self, documents: Vec<Document>) -> ShardResult<Uuid> {
        let batch = IngestBatch {
            id: Uuid::new_v4(),
            documents,
            received_at: Utc::now(),
        };
        let id = batch.id;
        self.tx.try_send(batch).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ShardError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => {
                ShardError::Internal("ingest worker is gone".to_string())
            }
        })?;
        metrics::global().queue_depth.inc();
        Ok(id)
    }
}

async fn drain(primary: Arc<Shard>, mut rx: mpsc::Receiver<IngestBatch>) {
    tracing::info!(shard = %primary.name(), "ingest worker started");
    while let Some(batch) = rx.recv().await {
        metrics::global().queue_depth.dec();
        let size = batch.documents.len();
        match primary.index(batch.documents).await {
            Ok(indexed) => {
                tracing::debug!(batch = %batch.id, indexed, "batch drained");
            }
            Err(err) => {
                metrics::global().queue_batches_dropped.inc();
                tracing::warn!(batch = %batch.id, size, error = %err, "batch dropped");
            }
        }
    }
    tracing::info!(shard = %primary.name(), "ingest worker stopped");
}
