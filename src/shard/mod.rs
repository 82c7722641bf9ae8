//! The index shard: a single-writer actor owning one FTS store.
//!
//! A shard plays four roles behind one mutex: indexer, query engine,
//! replication source, and lifecycle manager. Every RPC handler and the
//! scheduler tick serialize on the shard state, so no two writes ever
//! interleave on the store. Fan-out to other shards happens through the
//! registry capability; cold shards never call back into the primary, so
//! the lock graph is acyclic.

pub mod registry;
pub mod scheduler;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::cache::CacheInvalidator;
use crate::config::{ConfigPatch, IdType, ShardConfig};
use crate::error::{FieldError, ShardError, ShardResult};
use crate::filter;
use crate::lifecycle::LifecycleManager;
use crate::metrics;
use crate::planner::QueryPlanner;
use crate::replication::Replicator;
use crate::router::ColdRouter;
use crate::storage::{
    DocId, Document, Hit, ScannedRow, Store, StoredDocument, META_CONFIG,
    META_CURRENT_COLD_INDEX, META_LAST_SYNCED_ROWID,
};

use registry::{ShardHandle, ShardRegistry};

/// Soft deadline on a search; past it the caller gets an empty result.
pub const SEARCH_DEADLINE: Duration = Duration::from_secs(5);

/// Public query surface clamp; requests above this are silently lowered.
pub const SEARCH_MAX_ROWS: usize = 1_000;

/// Maximum byte length of a string document id.
pub const MAX_ID_BYTES: usize = 255;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub include_cold: bool,
    #[serde(default = "default_search_max")]
    pub max: usize,
}

fn default_search_max() -> usize {
    20
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShardStats {
    pub count: u64,
    pub bytes: u64,
    pub read_only: bool,
}

pub(crate) struct ShardInner {
    pub(crate) store: Store,
    /// `None` until the first `configure` (the Fresh state).
    pub(crate) config: Option<ShardConfig>,
    /// Largest rowid delivered to every configured replica; -1 before any
    /// replication.
    pub(crate) last_synced_rowid: i64,
}

impl ShardInner {
    pub(crate) fn persist_config(&self) -> ShardResult<()> {
        if let Some(config) = &self.config {
            self.store.meta_put(META_CONFIG, &serde_json::to_string(config)?)?;
        }
        Ok(())
    }
}

pub struct Shard {
    name: String,
    inner: Mutex<ShardInner>,
    registry: Arc<dyn ShardRegistry>,
    invalidator: Option<Arc<dyn CacheInvalidator>>,
    scheduler_armed: AtomicBool,
    self_ref: Weak<Shard>,
}

impl Shard {
    /// Open the shard named `name` with its database under `data_dir`,
    /// loading any persisted config and cursors. A config that fails to
    /// deserialize is replaced by defaults so the shard keeps accepting
    /// writes.
    pub fn open(
        name: &str,
        data_dir: &Path,
        registry: Arc<dyn ShardRegistry>,
        invalidator: Option<Arc<dyn CacheInvalidator>>,
    ) -> ShardResult<Arc<Self>> {
        std::fs::create_dir_all(data_dir)?;
        let mut store = Store::open(&data_dir.join(format!("{}.db", name)))?;

        let config = match store.meta_get(META_CONFIG)? {
            Some(raw) => match serde_json::from_str::<ShardConfig>(&raw) {
                Ok(config) => Some(config),
                Err(err) => {
                    // Corrupt config must not stop the write path; fall
                    // back to defaults and keep going.
                    tracing::error!(shard = name, error = %err, "persisted config corrupted, falling back to defaults");
                    Some(ShardConfig::default())
                }
            },
            None => None,
        };

        let mut config = config;
        if let Some(config) = &mut config {
            store.ensure_documents(config.id_type)?;
            // The scalar copy wins: lifecycle persists it independently of
            // the config blob.
            if let Some(index) = store.meta_get_i64(META_CURRENT_COLD_INDEX)? {
                config.current_cold_index = index as u32;
            }
        }
        let last_synced_rowid = store.meta_get_i64(META_LAST_SYNCED_ROWID)?.unwrap_or(-1);

        Ok(Arc::new_cyclic(|weak| Self {
            name: name.to_string(),
            inner: Mutex::new(ShardInner {
                store,
                config,
                last_synced_rowid,
            }),
            registry,
            invalidator,
            scheduler_armed: AtomicBool::new(false),
            self_ref: weak.clone(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index a batch of documents. The whole batch is validated before any
    /// write; any failure rejects the batch with the full error list.
    pub async fn index(&self, batch: Vec<Document>) -> ShardResult<usize> {
        let indexed = self.write_batch(batch, "index").await?;
        metrics::global().documents_indexed.inc_by(indexed as u64);
        Ok(indexed)
    }

    /// Identical to `index`, but called by a peer shard on the replication
    /// path.
    pub async fn sync(&self, batch: Vec<Document>) -> ShardResult<usize> {
        let synced = self.write_batch(batch, "sync").await?;
        metrics::global().documents_synced.inc_by(synced as u64);
        Ok(synced)
    }

    async fn write_batch(&self, batch: Vec<Document>, op: &'static str) -> ShardResult<usize> {
        let mut inner = self.inner.lock().await;
        let config = inner
            .config
            .as_ref()
            .ok_or_else(|| ShardError::NotConfigured(self.name.clone()))?;
        if config.read_only {
            return Err(ShardError::ReadOnly);
        }
        let id_type = config.id_type;

        let errors = validate_batch(&batch, id_type);
        if !errors.is_empty() {
            metrics::global().batches_rejected.inc();
            return Err(ShardError::Validation(errors));
        }

        let docs = prepare_batch(batch);
        let indexed = docs.len();
        inner.store.upsert(&docs)?;
        drop(inner);

        if let Some(invalidator) = &self.invalidator {
            invalidator.invalidate();
        }
        tracing::debug!(shard = %self.name, op, count = indexed, "batch committed");
        Ok(indexed)
    }

    /// Execute a full-text search. Never fails: planner rejections, store
    /// faults, and deadline overruns all surface as an empty result.
    pub async fn search(&self, request: SearchRequest) -> Vec<Hit> {
        metrics::global().searches.inc();
        match tokio::time::timeout(SEARCH_DEADLINE, self.search_inner(request)).await {
            Ok(hits) => hits,
            Err(_) => {
                tracing::warn!(shard = %self.name, "search exceeded deadline");
                Vec::new()
            }
        }
    }

    async fn search_inner(&self, request: SearchRequest) -> Vec<Hit> {
        let max = request.max.min(SEARCH_MAX_ROWS);
        if max == 0 || request.query.is_empty() {
            return Vec::new();
        }

        let plan = match QueryPlanner::plan(&request.query, max) {
            Ok(plan) => plan,
            Err(reason) => {
                metrics::global().searches_rejected.inc();
                tracing::info!(shard = %self.name, query = %request.query, reason = reason.as_str(), "query rejected");
                return Vec::new();
            }
        };

        let (mut hits, fan_out) = {
            let inner = self.inner.lock().await;
            let local = match inner.store.match_query(&plan.processed, plan.row_cap) {
                Ok(hits) => hits,
                Err(err) => {
                    tracing::warn!(shard = %self.name, error = %err, "local match failed");
                    return Vec::new();
                }
            };
            let fan_out = inner.config.as_ref().and_then(|config| {
                (request.include_cold && !config.read_only && config.current_cold_index > 0)
                    .then(|| (config.cold_shard_prefix.clone(), config.current_cold_index))
            });
            (local, fan_out)
        };

        // Cold fan-out happens outside the shard lock; cold shards
        // serialize independently and never call back here.
        if let Some((prefix, shard_count)) = fan_out {
            let cold = ColdRouter::fan_out(
                self.registry.as_ref(),
                &prefix,
                shard_count,
                &request.query,
                max,
            )
            .await;
            hits.extend(cold);
            hits.sort_by(|a, b| a.rank.partial_cmp(&b.rank).unwrap_or(std::cmp::Ordering::Equal));
        }
        hits.truncate(max);
        hits
    }

    /// Count, on-disk byte size, and read-only flag. Best-effort: a store
    /// fault reports zeros rather than an error.
    pub async fn stats(&self) -> ShardStats {
        let inner = self.inner.lock().await;
        let read_only = inner
            .config
            .as_ref()
            .map(|config| config.read_only)
            .unwrap_or(false);
        match inner.store.count_and_bytes() {
            Ok((count, bytes)) => ShardStats {
                count,
                bytes,
                read_only,
            },
            Err(err) => {
                tracing::warn!(shard = %self.name, error = %err, "stats read failed");
                ShardStats {
                    count: 0,
                    bytes: 0,
                    read_only,
                }
            }
        }
    }

    /// Merge a partial config into the persisted one. The first configure
    /// moves the shard from Fresh to Active and arms the scheduler; a
    /// read-only shard accepts only no-op patches, and the id type cannot
    /// change once documents exist.
    pub async fn configure(&self, patch: ConfigPatch) -> ShardResult<()> {
        let mut inner = self.inner.lock().await;

        let updated = match &inner.config {
            Some(current) => {
                if current.read_only {
                    if patch.is_noop_for(current) {
                        return Ok(());
                    }
                    return Err(ShardError::ReadOnly);
                }
                if let Some(new_type) = patch.id_type {
                    if new_type != current.id_type {
                        let (count, _) = inner.store.count_and_bytes()?;
                        if count > 0 {
                            return Err(ShardError::Config(
                                "id type cannot change while documents exist".to_string(),
                            ));
                        }
                    }
                }
                let mut updated = current.clone();
                updated.apply(&patch)?;
                updated
            }
            None => {
                let mut config = ShardConfig::default();
                config.apply(&patch)?;
                config
            }
        };

        if inner.store.id_type() != Some(updated.id_type) {
            inner.store.ensure_documents(updated.id_type)?;
        }
        inner.config = Some(updated.clone());
        inner.persist_config()?;
        if patch.current_cold_index.is_some() {
            inner
                .store
                .meta_put(META_CURRENT_COLD_INDEX, &updated.current_cold_index.to_string())?;
        }
        drop(inner);

        tracing::info!(shard = %self.name, read_only = updated.read_only, "configured");
        if !updated.read_only {
            if let Some(shard) = self.self_ref.upgrade() {
                scheduler::arm(shard, updated.tick_interval_ms);
            }
        }
        Ok(())
    }

    /// One scheduler tick: replication, then lifecycle. Returns the next
    /// tick interval, or `None` when the shard is read-only and the timer
    /// must not rearm. Normally driven by the scheduler; tests call it
    /// directly.
    pub async fn tick(&self) -> Option<u64> {
        let mut inner = self.inner.lock().await;
        let config = inner.config.clone()?;
        if config.read_only {
            return None;
        }

        if let Err(err) = Replicator::step(&self.name, &mut inner, self.registry.as_ref()).await {
            tracing::warn!(shard = %self.name, error = %err, "replication step failed");
        }
        if let Err(err) = LifecycleManager::step(&self.name, &mut inner, self.registry.as_ref()).await
        {
            tracing::warn!(shard = %self.name, error = %err, "lifecycle step failed");
        }

        let interval = inner
            .config
            .as_ref()
            .map(|config| config.tick_interval_ms)
            .unwrap_or(config.tick_interval_ms);
        Some(interval)
    }

    /// Page through documents in rowid order, for export tooling. Works on
    /// read-only shards: exporting is a read.
    pub async fn export(&self, cursor: i64, limit: usize) -> ShardResult<Vec<ScannedRow>> {
        let inner = self.inner.lock().await;
        inner.store.scan_since(cursor, Some(limit))
    }

    pub(crate) fn scheduler_armed(&self) -> &AtomicBool {
        &self.scheduler_armed
    }

    /// Snapshot of the current config, for the HTTP stats surface.
    pub async fn config(&self) -> Option<ShardConfig> {
        self.inner.lock().await.config.clone()
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard").field("name", &self.name).finish()
    }
}

#[async_trait::async_trait]
impl ShardHandle for Shard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn index(&self, batch: Vec<Document>) -> ShardResult<usize> {
        Shard::index(self, batch).await
    }

    async fn sync(&self, batch: Vec<Document>) -> ShardResult<usize> {
        Shard::sync(self, batch).await
    }

    async fn search(&self, request: SearchRequest) -> Vec<Hit> {
        Shard::search(self, request).await
    }

    async fn stats(&self) -> ShardStats {
        Shard::stats(self).await
    }

    async fn configure(&self, patch: ConfigPatch) -> ShardResult<()> {
        Shard::configure(self, patch).await
    }
}

fn validate_batch(batch: &[Document], id_type: IdType) -> Vec<FieldError> {
    let mut errors = Vec::new();
    for (position, doc) in batch.iter().enumerate() {
        if !doc.id.matches(id_type) {
            errors.push(FieldError {
                field: format!("documents[{}].id", position),
                message: format!("id does not match shard id type {:?}", id_type),
                value: serde_json::json!(doc.id),
            });
        } else {
            match &doc.id {
                DocId::Int(value) => {
                    if *value < 0 {
                        errors.push(FieldError {
                            field: format!("documents[{}].id", position),
                            message: "integer id must be non-negative".to_string(),
                            value: serde_json::json!(value),
                        });
                    }
                }
                DocId::Str(value) => {
                    if value.is_empty() {
                        errors.push(FieldError {
                            field: format!("documents[{}].id", position),
                            message: "string id must be non-empty".to_string(),
                            value: serde_json::json!(value),
                        });
                    } else if value.len() > MAX_ID_BYTES {
                        errors.push(FieldError {
                            field: format!("documents[{}].id", position),
                            message: format!("string id exceeds {} bytes", MAX_ID_BYTES),
                            value: serde_json::json!(value),
                        });
                    }
                }
            }
        }
        if doc.content.is_empty() {
            errors.push(FieldError {
                field: format!("documents[{}].content", position),
                message: "content must be a non-empty string".to_string(),
                value: serde_json::Value::Null,
            });
        }
    }
    errors
}

/// Filter content and collapse duplicate ids (last writer wins; relative
/// ordering among duplicates is not part of the contract).
fn prepare_batch(batch: Vec<Document>) -> Vec<StoredDocument> {
    let mut by_id: HashMap<DocId, usize> = HashMap::new();
    let mut docs: Vec<StoredDocument> = Vec::with_capacity(batch.len());
    for doc in batch {
        let stored = StoredDocument::new(doc.id.clone(), filter::filter_content(&doc.content));
        match by_id.get(&doc.id) {
            Some(&slot) => docs[slot] = stored,
            None => {
                by_id.insert(doc.id, docs.len());
                docs.push(stored);
            }
        }
    }
    docs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_batch_id_type_mismatch() {
        let batch = vec![Document::new("a", "text"), Document::new(7, "text")];
        let errors = validate_batch(&batch, IdType::String);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "documents[1].id");
    }

    #[test]
    fn test_validate_batch_empty_content() {
        let batch = vec![Document::new("a", "")];
        let errors = validate_batch(&batch, IdType::String);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "documents[0].content");
    }

    #[test]
    fn test_validate_batch_long_string_id() {
        let batch = vec![Document::new("x".repeat(256).as_str(), "text")];
        let errors = validate_batch(&batch, IdType::String);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_validate_batch_negative_integer_id() {
        let batch = vec![Document::new(-1, "text")];
        let errors = validate_batch(&batch, IdType::Integer);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_prepare_batch_dedupes_last_writer() {
        let batch = vec![
            Document::new("u", "first words"),
            Document::new("v", "other words"),
            Document::new("u", "second words"),
        ];
        let docs = prepare_batch(batch);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].filtered_content, "second words");
    }
}
