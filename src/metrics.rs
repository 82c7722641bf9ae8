//! Prometheus metrics, exposed at `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

pub fn global() -> &'static Metrics {
    &METRICS
}

pub struct Metrics {
    registry: Registry,
    pub documents_indexed: IntCounter,
    pub documents_synced: IntCounter,
    pub batches_rejected: IntCounter,
    pub searches: IntCounter,
    pub searches_rejected: IntCounter,
    pub replication_batches: IntCounter,
    pub replication_failures: IntCounter,
    pub documents_migrated: IntCounter,
    pub store_documents: IntGauge,
    pub store_bytes: IntGauge,
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub queue_depth: IntGauge,
    pub queue_batches_dropped: IntCounter,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let documents_indexed =
            IntCounter::new("textshard_documents_indexed_total", "Documents indexed").unwrap();
        let documents_synced =
            IntCounter::new("textshard_documents_synced_total", "Documents received via sync")
                .unwrap();
        let batches_rejected =
            IntCounter::new("textshard_batches_rejected_total", "Batches failing validation")
                .unwrap();
        let searches = IntCounter::new("textshard_searches_total", "Search requests").unwrap();
        let searches_rejected =
            IntCounter::new("textshard_searches_rejected_total", "Searches rejected by planner")
                .unwrap();
        let replication_batches =
            IntCounter::new("textshard_replication_batches_total", "Replication fan-outs")
                .unwrap();
        let replication_failures = IntCounter::new(
            "textshard_replication_failures_total",
            "Per-replica sync failures",
        )
        .unwrap();
        let documents_migrated = IntCounter::new(
            "textshard_documents_migrated_total",
            "Documents rolled into cold storage",
        )
        .unwrap();
        let store_documents =
            IntGauge::new("textshard_store_documents", "Documents in the primary store").unwrap();
        let store_bytes =
            IntGauge::new("textshard_store_bytes", "Primary store size on disk").unwrap();
        let cache_hits =
            IntCounter::new("textshard_cache_hits_total", "Result cache hits").unwrap();
        let cache_misses =
            IntCounter::new("textshard_cache_misses_total", "Result cache misses").unwrap();
        let queue_depth =
            IntGauge::new("textshard_queue_depth", "Batches buffered in the ingest queue")
                .unwrap();
        let queue_batches_dropped = IntCounter::new(
            "textshard_queue_batches_dropped_total",
            "Queued batches dropped after rejection",
        )
        .unwrap();

        for collector in [
            &documents_indexed,
            &documents_synced,
            &batches_rejected,
            &searches,
            &searches_rejected,
            &replication_batches,
            &replication_failures,
            &documents_migrated,
            &cache_hits,
            &cache_misses,
            &queue_batches_dropped,
        ] {
            registry.register(Box::new(collector.clone())).unwrap();
        }
        registry.register(Box::new(store_documents.clone())).unwrap();
        registry.register(Box::new(store_bytes.clone())).unwrap();
        registry.register(Box::new(queue_depth.clone())).unwrap();

        Self {
            registry,
            documents_indexed,
            documents_synced,
            batches_rejected,
            searches,
            searches_rejected,
            replication_batches,
            replication_failures,
            documents_migrated,
            store_documents,
            store_bytes,
            cache_hits,
            cache_misses,
            queue_depth,
            queue_batches_dropped,
        }
    }

    /// Render the registry in the Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %err, "metrics encoding failed");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
