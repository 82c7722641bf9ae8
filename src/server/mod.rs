mod auth;
mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::cache::ResultCache;
use crate::queue::IngestQueue;
use crate::shard::registry::InMemoryRegistry;
use crate::shard::Shard;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<InMemoryRegistry>,
    pub primary: Arc<Shard>,
    pub queue: IngestQueue,
    pub cache: Arc<ResultCache>,
    /// When set, every API route except /health and /metrics requires
    /// `Authorization: Bearer <token>`.
    pub api_token: Option<Arc<String>>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/index", post(handlers::index_documents))
        .route("/search", post(handlers::search))
        .route("/configure", post(handlers::configure))
        .route("/export", get(handlers::export))
        .route("/stats", get(handlers::stats))
        .route("/shards", get(handlers::list_shards))
        .route("/shards/{name}/stats", get(handlers::shard_stats))
        .route("/shards/{name}/search", post(handlers::shard_search))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_text))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
