//! Primary → replica streaming.
//!
//! The primary keeps a single persistent cursor: the largest rowid it has
//! pushed out. Each tick scans everything past the cursor and fans the
//! batch out to every configured replica in parallel. Upserts are
//! id-idempotent on the receiving side, so redelivery after a failure is
//! harmless; within one replica rows always arrive in rowid order.

use futures::future::join_all;

use crate::config::ReplicaDescriptor;
use crate::error::ShardResult;
use crate::metrics;
use crate::shard::registry::ShardRegistry;
use crate::shard::ShardInner;
use crate::storage::{Document, ScannedRow, META_LAST_SYNCED_ROWID};

pub struct Replicator;

impl Replicator {
    /// One replication step. The cursor advances to the largest scanned
    /// rowid even when a replica fails: a replica that missed a window
    /// resynchronizes on its own re-attach path, and holding the cursor
    /// back would re-send the window to the healthy replicas forever.
    pub(crate) async fn step(
        shard_name: &str,
        inner: &mut ShardInner,
        registry: &dyn ShardRegistry,
    ) -> ShardResult<()> {
        let config = match &inner.config {
            Some(config) if !config.read_only && !config.replicas.is_empty() => config.clone(),
            _ => return Ok(()),
        };

        let rows = inner.store.scan_since(inner.last_synced_rowid, None)?;
        let max_rowid = match rows.last() {
            Some(row) => row.rowid,
            None => return Ok(()),
        };
        let batch: Vec<Document> = rows.into_iter().map(ScannedRow::into_document).collect();

        let tasks = config.replicas.iter().map(|descriptor| {
            let batch = batch.clone();
            async move {
                if descriptor.key() == shard_name {
                    tracing::warn!(replica = descriptor.key(), "shard listed as its own replica, skipping");
                    return true;
                }
                sync_one(registry, descriptor, batch).await
            }
        });
        let results = join_all(tasks).await;

        let failed = results.iter().filter(|ok| !**ok).count();
        metrics::global().replication_batches.inc();
        if failed > 0 {
            metrics::global()
                .replication_failures
                .inc_by(failed as u64);
            tracing::warn!(
                shard = shard_name,
                failed,
                replicas = results.len(),
                "advancing sync cursor past failed replicas"
            );
        }

        inner.last_synced_rowid = max_rowid;
        inner
            .store
            .meta_put(META_LAST_SYNCED_ROWID, &max_rowid.to_string())?;
        tracing::debug!(shard = shard_name, cursor = max_rowid, sent = batch.len(), "replication step complete");
        Ok(())
    }
}

async fn sync_one(
    registry: &dyn ShardRegistry,
    descriptor: &ReplicaDescriptor,
    batch: Vec<Document>,
) -> bool {
    let handle = match registry.replica(descriptor).await {
        Some(handle) => handle,
        None => {
            tracing::warn!(replica = descriptor.key(), "replica could not be resolved");
            return false;
        }
    };
    match handle.sync(batch).await {
        Ok(count) => {
            tracing::debug!(replica = descriptor.key(), count, "replica synced");
            true
        }
        Err(err) => {
            tracing::warn!(replica = descriptor.key(), error = %err, "replica sync failed");
            false
        }
    }
}
