//! Cold-shard query fan-out.
//!
//! When a search asks for cold results, every cold shard gets a slice of
//! the row budget in parallel; the merged hits are ranked and capped. A
//! failing cold shard contributes an empty result instead of failing the
//! search. Cold shards never fan out themselves.

use futures::future::join_all;

use crate::shard::registry::ShardRegistry;
use crate::shard::SearchRequest;
use crate::storage::Hit;

pub struct ColdRouter;

impl ColdRouter {
    pub(crate) async fn fan_out(
        registry: &dyn ShardRegistry,
        prefix: &str,
        shard_count: u32,
        query: &str,
        max: usize,
    ) -> Vec<Hit> {
        if shard_count == 0 || max == 0 {
            return Vec::new();
        }
        let per_shard = max.div_ceil(shard_count as usize).max(1);

        let tasks = (0..shard_count).map(|index| async move {
            match registry.cold(prefix, index).await {
                Some(handle) => {
                    handle
                        .search(SearchRequest {
                            query: query.to_string(),
                            include_cold: false,
                            max: per_shard,
                        })
                        .await
                }
                None => {
                    tracing::warn!(prefix, index, "cold shard unresolvable during fan-out");
                    Vec::new()
                }
            }
        });

        let mut hits: Vec<Hit> = join_all(tasks).await.into_iter().flatten().collect();
        hits.sort_by(|a, b| a.rank.partial_cmp(&b.rank).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(max);
        hits
    }
}
