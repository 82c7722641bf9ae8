//! Rolling cold-storage migration.
//!
//! When the primary's document count or on-disk size crosses its
//! watermark, the oldest rows move into the current cold shard; full cold
//! shards roll over to `<prefix>-<index + 1>`. The primary only deletes
//! rows after every cold write succeeded, and the cold upsert is
//! id-idempotent, so a crash mid-migration can at worst leave a document
//! duplicated but findable, never lost.

use crate::config::ConfigPatch;
use crate::error::ShardResult;
use crate::metrics;
use crate::shard::registry::ShardRegistry;
use crate::shard::ShardInner;
use crate::storage::{Document, ScannedRow, META_CURRENT_COLD_INDEX};

pub struct LifecycleManager;

impl LifecycleManager {
    pub(crate) async fn step(
        shard_name: &str,
        inner: &mut ShardInner,
        registry: &dyn ShardRegistry,
    ) -> ShardResult<()> {
        let config = match &inner.config {
            Some(config) if !config.read_only => config.clone(),
            _ => return Ok(()),
        };

        let (count, bytes) = inner.store.count_and_bytes()?;
        metrics::global().store_documents.set(count as i64);
        metrics::global().store_bytes.set(bytes as i64);
        if count < config.purge_count_threshold && bytes <= config.size_threshold_bytes {
            return Ok(());
        }

        let target = config
            .purge_target_count
            .unwrap_or_else(|| count - count / 5);
        let to_purge = count.saturating_sub(target);
        if to_purge == 0 {
            return Ok(());
        }
        let rows = inner.store.oldest(to_purge as usize)?;
        let last_moved = match rows.last() {
            Some(row) => row.rowid,
            None => return Ok(()),
        };
        tracing::info!(
            shard = shard_name,
            count,
            bytes,
            to_purge = rows.len(),
            "migrating oldest rows to cold storage"
        );

        let mut index = config.current_cold_index;
        let mut offset = 0usize;
        let mut all_written = true;
        while offset < rows.len() {
            let cold_name = config.cold_shard_name(index);
            let handle = match registry.cold(&config.cold_shard_prefix, index).await {
                Some(handle) => handle,
                None => {
                    tracing::warn!(shard = shard_name, cold = %cold_name, "cold shard unresolvable, aborting migration");
                    all_written = false;
                    break;
                }
            };

            // Stats failures report zeros, which reads as an empty shard.
            let stats = handle.stats().await;
            let available = if stats.read_only {
                // A sealed shard never takes another write, whatever its
                // remaining capacity.
                0
            } else {
                config.cold_shard_capacity.saturating_sub(stats.count)
            };
            if available == 0 {
                index += 1;
                continue;
            }

            let take = (available as usize).min(rows.len() - offset);
            let slice = &rows[offset..offset + take];
            let was_empty = stats.count == 0;

            if was_empty {
                // A fresh cold shard adopts the primary's id type before
                // its first write.
                let adopt = ConfigPatch {
                    id_type: Some(config.id_type),
                    ..Default::default()
                };
                if let Err(err) = handle.configure(adopt).await {
                    tracing::warn!(cold = %cold_name, error = %err, "cold shard configure failed, aborting migration");
                    all_written = false;
                    break;
                }
            }

            let batch: Vec<Document> = slice.iter().cloned().map(ScannedRow::into_document).collect();
            match handle.index(batch).await {
                Ok(moved) => {
                    tracing::debug!(cold = %cold_name, moved, "cold shard write committed");
                }
                Err(err) => {
                    tracing::warn!(cold = %cold_name, error = %err, "cold shard write failed, keeping rows on primary");
                    all_written = false;
                    break;
                }
            }

            if was_empty {
                // Cold shards are sealed on their first write.
                let seal = ConfigPatch {
                    read_only: Some(true),
                    ..Default::default()
                };
                if let Err(err) = handle.configure(seal).await {
                    tracing::warn!(cold = %cold_name, error = %err, "failed to seal cold shard");
                }
            }

            offset += take;
            if take as u64 == available {
                index += 1;
            }
        }

        if index != config.current_cold_index {
            if let Some(config) = inner.config.as_mut() {
                config.current_cold_index = index;
            }
            inner.persist_config()?;
            inner
                .store
                .meta_put(META_CURRENT_COLD_INDEX, &index.to_string())?;
        }

        if !all_written {
            // The primary keeps everything; the next tick retries.
            return Ok(());
        }

        let deleted = inner.store.delete_up_to(last_moved)?;
        metrics::global().documents_migrated.inc_by(deleted as u64);
        if let Ok((count, bytes)) = inner.store.count_and_bytes() {
            metrics::global().store_documents.set(count as i64);
            metrics::global().store_bytes.set(bytes as i64);
        }
        tracing::info!(
            shard = shard_name,
            deleted,
            last_moved,
            cold_index = index,
            "migration complete"
        );
        Ok(())
    }
}
