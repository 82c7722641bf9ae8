use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::search_cache_key;
use crate::config::ConfigPatch;
use crate::error::ShardError;
use crate::metrics;
use crate::shard::{SearchRequest, ShardStats};
use crate::storage::{DocId, Document, Hit};

use super::AppState;

// ==================== Index ====================

#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    pub documents: Vec<Document>,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub batch_id: Uuid,
    pub queued: usize,
}

/// Buffer a batch for the primary shard. Acknowledged with 202 before the
/// shard sees it; validation failures show up in logs and metrics.
pub async fn index_documents(
    State(state): State<AppState>,
    Json(request): Json<IndexRequest>,
) -> Result<(StatusCode, Json<IndexResponse>), ShardError> {
    if request.documents.is_empty() {
        return Err(ShardError::BadRequest(
            "documents must be a non-empty array".to_string(),
        ));
    }
    let queued = request.documents.len();
    let batch_id = state.queue.enqueue(request.documents)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IndexResponse { batch_id, queued }),
    ))
}

// ==================== Search ====================

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<Hit>,
    pub count: usize,
}

pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Json<SearchResponse> {
    let key = search_cache_key(
        state.primary.name(),
        &request.query,
        request.include_cold,
        request.max,
    );
    if let Some(hits) = state.cache.get(&key) {
        let count = hits.len();
        return Json(SearchResponse { hits, count });
    }

    let hits = state.primary.search(request).await;
    state.cache.put(key, hits.clone());
    let count = hits.len();
    Json(SearchResponse { hits, count })
}

// ==================== Configure ====================

#[derive(Debug, Serialize)]
pub struct ConfigureResponse {
    pub status: String,
}

pub async fn configure(
    State(state): State<AppState>,
    Json(patch): Json<ConfigPatch>,
) -> Result<Json<ConfigureResponse>, ShardError> {
    state.primary.configure(patch).await?;
    Ok(Json(ConfigureResponse {
        status: "ok".to_string(),
    }))
}

// ==================== Export ====================

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_export_cursor")]
    pub cursor: i64,
    #[serde(default = "default_export_limit")]
    pub limit: usize,
}

fn default_export_cursor() -> i64 {
    -1
}

fn default_export_limit() -> usize {
    500
}

#[derive(Debug, Serialize)]
pub struct ExportRow {
    pub rowid: i64,
    pub id: DocId,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub rows: Vec<ExportRow>,
    /// Cursor for the next page; absent on the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<i64>,
}

/// Page through the primary's documents in rowid order, for dump tooling.
pub async fn export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ExportResponse>, ShardError> {
    let limit = query.limit.clamp(1, 5_000);
    let rows = state.primary.export(query.cursor, limit).await?;
    let next_cursor = (rows.len() == limit).then(|| rows.last().map(|row| row.rowid)).flatten();
    let rows = rows
        .into_iter()
        .map(|row| ExportRow {
            rowid: row.rowid,
            id: row.id,
            content: row.content,
        })
        .collect();
    Ok(Json(ExportResponse { rows, next_cursor }))
}

// ==================== Per-shard admin surface ====================

#[derive(Debug, Serialize)]
pub struct ShardListResponse {
    pub shards: Vec<String>,
}

pub async fn list_shards(State(state): State<AppState>) -> Json<ShardListResponse> {
    let mut shards = state.registry.shard_names().await;
    shards.sort();
    Json(ShardListResponse { shards })
}

pub async fn shard_stats(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StatsResponse>, ShardError> {
    let shard = state
        .registry
        .get(&name)
        .await
        .ok_or(ShardError::UnknownShard(name))?;
    let stats = shard.stats().await;
    Ok(Json(StatsResponse {
        shard: shard.name().to_string(),
        stats,
    }))
}

/// Search an individual shard (a replica or a cold shard) directly,
/// bypassing the result cache.
pub async fn shard_search(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ShardError> {
    let shard = state
        .registry
        .get(&name)
        .await
        .ok_or(ShardError::UnknownShard(name))?;
    let hits = shard.search(request).await;
    let count = hits.len();
    Ok(Json(SearchResponse { hits, count }))
}

// ==================== Stats / health / metrics ====================

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub shard: String,
    #[serde(flatten)]
    pub stats: ShardStats,
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.primary.stats().await;
    Json(StatsResponse {
        shard: state.primary.name().to_string(),
        stats,
    })
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn metrics_text() -> String {
    metrics::global().encode()
}
