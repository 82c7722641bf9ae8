//! Shard addressing.
//!
//! Shards refer to each other by name only, resolved through a registry
//! capability injected at construction. The registry hands out typed
//! handles; it is the only component that knows how names map to shard
//! instances, so tests and alternative deployments can substitute their
//! own resolution.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cache::CacheInvalidator;
use crate::config::{ConfigPatch, ReplicaDescriptor};
use crate::error::ShardResult;
use crate::storage::{Document, Hit};

use super::{SearchRequest, Shard, ShardStats};

/// The typed RPC surface every shard exposes to its peers.
#[async_trait]
pub trait ShardHandle: Send + Sync {
    fn name(&self) -> &str;
    async fn index(&self, batch: Vec<Document>) -> ShardResult<usize>;
    async fn sync(&self, batch: Vec<Document>) -> ShardResult<usize>;
    async fn search(&self, request: SearchRequest) -> Vec<Hit>;
    async fn stats(&self) -> ShardStats;
    async fn configure(&self, patch: ConfigPatch) -> ShardResult<()>;
}

/// Capability for resolving shard names to handles.
#[async_trait]
pub trait ShardRegistry: Send + Sync {
    /// Resolve a replica descriptor to a shard handle.
    async fn replica(&self, descriptor: &ReplicaDescriptor) -> Option<Arc<dyn ShardHandle>>;

    /// Resolve the cold shard `<prefix>-<index>`.
    async fn cold(&self, prefix: &str, index: u32) -> Option<Arc<dyn ShardHandle>>;
}

/// Registry for a single-process deployment: every name resolves to an
/// in-process shard backed by its own database file under `data_dir`,
/// created implicitly on first address.
pub struct InMemoryRegistry {
    data_dir: PathBuf,
    invalidator: Option<Arc<dyn CacheInvalidator>>,
    shards: RwLock<HashMap<String, Arc<Shard>>>,
    self_ref: Weak<InMemoryRegistry>,
}

impl InMemoryRegistry {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        invalidator: Option<Arc<dyn CacheInvalidator>>,
    ) -> Arc<Self> {
        let data_dir = data_dir.into();
        Arc::new_cyclic(|weak| Self {
            data_dir,
            invalidator,
            shards: RwLock::new(HashMap::new()),
            self_ref: weak.clone(),
        })
    }

    /// Fetch the shard registered under `name`, creating it on first
    /// address.
    pub async fn get_or_create(&self, name: &str) -> ShardResult<Arc<Shard>> {
        if let Some(shard) = self.shards.read().await.get(name) {
            return Ok(shard.clone());
        }
        let mut shards = self.shards.write().await;
        if let Some(shard) = shards.get(name) {
            return Ok(shard.clone());
        }
        let registry: Arc<dyn ShardRegistry> = self
            .self_ref
            .upgrade()
            .expect("registry outlives its shards");
        let shard = Shard::open(name, &self.data_dir, registry, self.invalidator.clone())?;
        shards.insert(name.to_string(), shard.clone());
        Ok(shard)
    }

    /// Look up an already-instantiated shard without creating one. The
    /// admin surface uses this so arbitrary names cannot spawn databases.
    pub async fn get(&self, name: &str) -> Option<Arc<Shard>> {
        self.shards.read().await.get(name).cloned()
    }

    /// Names of every shard instantiated so far.
    pub async fn shard_names(&self) -> Vec<String> {
        self.shards.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ShardRegistry for InMemoryRegistry {
    async fn replica(&self, descriptor: &ReplicaDescriptor) -> Option<Arc<dyn ShardHandle>> {
        match self.get_or_create(descriptor.key()).await {
            Ok(shard) => Some(shard),
            Err(err) => {
                tracing::warn!(replica = descriptor.key(), error = %err, "replica resolution failed");
                None
            }
        }
    }

    async fn cold(&self, prefix: &str, index: u32) -> Option<Arc<dyn ShardHandle>> {
        let name = format!("{}-{}", prefix, index);
        match self.get_or_create(&name).await {
            Ok(shard) => Some(shard),
            Err(err) => {
                tracing::warn!(cold = %name, error = %err, "cold shard resolution failed");
                None
            }
        }
    }
}
