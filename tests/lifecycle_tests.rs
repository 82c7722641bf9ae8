//! Rolling cold-storage migration driven by the scheduler tick.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{configured_shard, create_registry};
use textshard::{
    ConfigPatch, Document, IdType, InMemoryRegistry, ReplicaDescriptor, SearchRequest, Shard,
    ShardError, ShardHandle, ShardRegistry, ShardResult, ShardStats,
};

fn search(query: &str, include_cold: bool, max: usize) -> SearchRequest {
    SearchRequest {
        query: query.to_string(),
        include_cold,
        max,
    }
}

async fn rolling_primary(
    registry: &Arc<InMemoryRegistry>,
    threshold: u64,
    target: u64,
    capacity: u64,
) -> Arc<Shard> {
    let primary = configured_shard(registry, "primary", IdType::String).await;
    primary
        .configure(ConfigPatch {
            purge_count_threshold: Some(threshold),
            purge_target_count: Some(target),
            cold_shard_capacity: Some(capacity),
            ..Default::default()
        })
        .await
        .unwrap();
    primary
}

fn archive_batch(count: usize) -> Vec<Document> {
    (0..count)
        .map(|i| {
            Document::new(
                format!("doc-{}", i).as_str(),
                format!("archive entry token{}", i),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_rolling_migration_fills_and_seals_cold_shards() {
    let (registry, _tmp) = create_registry();
    let primary = rolling_primary(&registry, 20, 10, 5).await;

    primary.index(archive_batch(25)).await.unwrap();
    primary.tick().await;

    // 15 oldest documents rolled off.
    assert_eq!(primary.stats().await.count, 10);

    let cold0 = registry.get_or_create("cold-0").await.unwrap();
    let stats0 = cold0.stats().await;
    assert_eq!(stats0.count, 5);
    assert!(stats0.read_only);

    let cold1 = registry.get_or_create("cold-1").await.unwrap();
    assert_eq!(cold1.stats().await.count, 5);

    let cold2 = registry.get_or_create("cold-2").await.unwrap();
    assert_eq!(cold2.stats().await.count, 5);

    let index = primary.config().await.unwrap().current_cold_index;
    assert!((2..=3).contains(&index), "unexpected cold index {}", index);
}

#[tokio::test]
async fn test_purged_documents_stay_searchable_through_cold_fan_out() {
    let (registry, _tmp) = create_registry();
    let primary = rolling_primary(&registry, 20, 10, 5).await;

    primary.index(archive_batch(25)).await.unwrap();
    primary.tick().await;

    // doc-3 was among the oldest 15: gone locally, found through fan-out.
    assert!(primary.search(search("token3", false, 10)).await.is_empty());
    let hits = primary.search(search("token3", true, 10)).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, textshard::DocId::Str("doc-3".to_string()));

    // A recent document is still served locally.
    let hits = primary.search(search("token24", true, 10)).await;
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_sealed_cold_shard_rejects_direct_writes() {
    let (registry, _tmp) = create_registry();
    let primary = rolling_primary(&registry, 20, 10, 5).await;

    primary.index(archive_batch(25)).await.unwrap();
    primary.tick().await;

    let cold0 = registry.get_or_create("cold-0").await.unwrap();
    let result = cold0
        .index(vec![Document::new("late", "late arrival content")])
        .await;
    assert!(matches!(result, Err(ShardError::ReadOnly)));
    let result = cold0
        .sync(vec![Document::new("late", "late arrival content")])
        .await;
    assert!(matches!(result, Err(ShardError::ReadOnly)));
}

#[tokio::test]
async fn test_no_migration_below_watermarks() {
    let (registry, _tmp) = create_registry();
    let primary = rolling_primary(&registry, 20, 10, 5).await;

    primary.index(archive_batch(19)).await.unwrap();
    primary.tick().await;

    assert_eq!(primary.stats().await.count, 19);
    assert_eq!(primary.config().await.unwrap().current_cold_index, 0);
}

#[tokio::test]
async fn test_size_watermark_triggers_with_default_target() {
    let (registry, _tmp) = create_registry();
    let primary = configured_shard(&registry, "primary", IdType::String).await;
    primary
        .configure(ConfigPatch {
            // Count watermark out of reach; any non-empty store trips the
            // byte watermark.
            size_threshold_bytes: Some(1),
            cold_shard_capacity: Some(5),
            ..Default::default()
        })
        .await
        .unwrap();

    primary.index(archive_batch(10)).await.unwrap();
    primary.tick().await;

    // No purge target set: 20% of the store rolls off.
    assert_eq!(primary.stats().await.count, 8);
    let cold0 = registry.get_or_create("cold-0").await.unwrap();
    let stats0 = cold0.stats().await;
    assert_eq!(stats0.count, 2);
    assert!(stats0.read_only);
}

/// Cold resolution that serves real shards up to `working_below`, and a
/// shard whose writes always fail from there on.
struct BrokenColdRegistry {
    inner: Arc<InMemoryRegistry>,
    working_below: u32,
}

struct BrokenShard;

#[async_trait]
impl ShardHandle for BrokenShard {
    fn name(&self) -> &str {
        "broken"
    }

    async fn index(&self, _batch: Vec<Document>) -> ShardResult<usize> {
        Err(ShardError::Internal("simulated cold failure".to_string()))
    }

    async fn sync(&self, _batch: Vec<Document>) -> ShardResult<usize> {
        Err(ShardError::Internal("simulated cold failure".to_string()))
    }

    async fn search(&self, _request: SearchRequest) -> Vec<textshard::Hit> {
        Vec::new()
    }

    async fn stats(&self) -> ShardStats {
        ShardStats {
            count: 0,
            bytes: 0,
            read_only: false,
        }
    }

    async fn configure(&self, _patch: ConfigPatch) -> ShardResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ShardRegistry for BrokenColdRegistry {
    async fn replica(&self, descriptor: &ReplicaDescriptor) -> Option<Arc<dyn ShardHandle>> {
        self.inner.replica(descriptor).await
    }

    async fn cold(&self, prefix: &str, index: u32) -> Option<Arc<dyn ShardHandle>> {
        if index < self.working_below {
            self.inner.cold(prefix, index).await
        } else {
            Some(Arc::new(BrokenShard))
        }
    }
}

#[tokio::test]
async fn test_cold_write_failure_aborts_without_deletion() {
    let (inner, tmp) = create_registry();
    let registry = Arc::new(BrokenColdRegistry {
        inner: inner.clone(),
        working_below: 0,
    });
    let primary = Shard::open("primary", tmp.path(), registry, None).unwrap();
    primary
        .configure(ConfigPatch {
            id_type: Some(IdType::String),
            purge_count_threshold: Some(20),
            purge_target_count: Some(10),
            cold_shard_capacity: Some(5),
            ..Default::default()
        })
        .await
        .unwrap();

    primary.index(archive_batch(25)).await.unwrap();
    primary.tick().await;

    // Nothing was deleted: the primary keeps everything and will retry.
    assert_eq!(primary.stats().await.count, 25);
}

#[tokio::test]
async fn test_partial_cold_failure_keeps_all_rows_on_primary() {
    let (inner, tmp) = create_registry();
    let registry = Arc::new(BrokenColdRegistry {
        inner: inner.clone(),
        working_below: 1,
    });
    let primary = Shard::open("primary", tmp.path(), registry, None).unwrap();
    primary
        .configure(ConfigPatch {
            id_type: Some(IdType::String),
            purge_count_threshold: Some(20),
            purge_target_count: Some(10),
            cold_shard_capacity: Some(5),
            ..Default::default()
        })
        .await
        .unwrap();

    primary.index(archive_batch(25)).await.unwrap();
    primary.tick().await;

    // cold-0 took its fill, but cold-1 failed: the delete never ran. The
    // five migrated documents are duplicated, not lost.
    assert_eq!(primary.stats().await.count, 25);
    let cold0 = inner.get_or_create("cold-0").await.unwrap();
    assert_eq!(cold0.stats().await.count, 5);
}

#[tokio::test]
async fn test_retry_after_cold_recovery_converges() {
    let (inner, tmp) = create_registry();
    let registry = Arc::new(BrokenColdRegistry {
        inner: inner.clone(),
        working_below: 1,
    });
    let primary = Shard::open("primary", tmp.path(), registry, None).unwrap();
    primary
        .configure(ConfigPatch {
            id_type: Some(IdType::String),
            purge_count_threshold: Some(20),
            purge_target_count: Some(10),
            cold_shard_capacity: Some(5),
            ..Default::default()
        })
        .await
        .unwrap();

    primary.index(archive_batch(25)).await.unwrap();
    primary.tick().await;
    assert_eq!(primary.stats().await.count, 25);

    // Heal the cold tier and reopen the primary over the same state.
    let healed = Arc::new(BrokenColdRegistry {
        inner: inner.clone(),
        working_below: u32::MAX,
    });
    drop(primary);
    let primary = Shard::open("primary", tmp.path(), healed, None).unwrap();
    primary.tick().await;

    // The migration finally lands; the id-idempotent cold upsert absorbs
    // the redelivered rows.
    assert_eq!(primary.stats().await.count, 10);
    let cold0 = inner.get_or_create("cold-0").await.unwrap();
    assert_eq!(cold0.stats().await.count, 5);
}
