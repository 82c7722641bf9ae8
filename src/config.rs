//! Per-shard configuration and replica addressing.

use serde::{Deserialize, Serialize};

use crate::error::{ShardError, ShardResult};

/// Default scheduler tick interval in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 60_000;

/// Lower bound on the tick interval; smaller values are raised to this.
pub const MIN_TICK_INTERVAL_MS: u64 = 1_000;

/// Hard size ceiling watermark for the primary store, just under the 10 GB
/// limit the deployment target applies to a single database.
pub const DEFAULT_SIZE_THRESHOLD_BYTES: u64 = 9_000_000_000;

/// The kind of document id a shard accepts. Fixed at first configure and
/// immutable while documents exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdType {
    #[default]
    String,
    Integer,
}

/// Address of a replica shard. `Region` targets a replica by name with a
/// "prefer this region" hint; `Local` targets one by stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReplicaDescriptor {
    Region { name: String },
    Local { id: String },
}

impl ReplicaDescriptor {
    /// The stable key this descriptor resolves under.
    pub fn key(&self) -> &str {
        match self {
            ReplicaDescriptor::Region { name } => name,
            ReplicaDescriptor::Local { id } => id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    pub id_type: IdType,
    pub tick_interval_ms: u64,
    /// Document count at which the lifecycle manager starts migrating.
    pub purge_count_threshold: u64,
    /// Count to shrink back to; when unset, 20% of the current count is
    /// migrated instead.
    pub purge_target_count: Option<u64>,
    pub size_threshold_bytes: u64,
    pub cold_shard_prefix: String,
    pub cold_shard_capacity: u64,
    pub current_cold_index: u32,
    pub replicas: Vec<ReplicaDescriptor>,
    pub read_only: bool,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            id_type: IdType::default(),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            purge_count_threshold: 100_000,
            purge_target_count: None,
            size_threshold_bytes: DEFAULT_SIZE_THRESHOLD_BYTES,
            cold_shard_prefix: "cold".to_string(),
            cold_shard_capacity: 10_000,
            current_cold_index: 0,
            replicas: Vec::new(),
            read_only: false,
        }
    }
}

impl ShardConfig {
    /// Name of the cold shard at `index` under this config's prefix.
    pub fn cold_shard_name(&self, index: u32) -> String {
        format!("{}-{}", self.cold_shard_prefix, index)
    }

    /// Apply a partial update, enforcing the structural rules that do not
    /// depend on shard state (those live in `Shard::configure`).
    pub fn apply(&mut self, patch: &ConfigPatch) -> ShardResult<()> {
        if let Some(id_type) = patch.id_type {
            self.id_type = id_type;
        }
        if let Some(interval) = patch.tick_interval_ms {
            if interval < MIN_TICK_INTERVAL_MS {
                tracing::warn!(
                    requested = interval,
                    minimum = MIN_TICK_INTERVAL_MS,
                    "tick interval below minimum, clamping"
                );
            }
            self.tick_interval_ms = interval.max(MIN_TICK_INTERVAL_MS);
        }
        if let Some(threshold) = patch.purge_count_threshold {
            self.purge_count_threshold = threshold;
        }
        if let Some(target) = patch.purge_target_count {
            self.purge_target_count = Some(target);
        }
        if let Some(bytes) = patch.size_threshold_bytes {
            self.size_threshold_bytes = bytes;
        }
        if let Some(prefix) = &patch.cold_shard_prefix {
            if prefix.is_empty() {
                return Err(ShardError::Config(
                    "cold shard prefix must be non-empty".to_string(),
                ));
            }
            self.cold_shard_prefix = prefix.clone();
        }
        if let Some(capacity) = patch.cold_shard_capacity {
            if capacity == 0 {
                return Err(ShardError::Config(
                    "cold shard capacity must be at least 1".to_string(),
                ));
            }
            self.cold_shard_capacity = capacity;
        }
        if let Some(index) = patch.current_cold_index {
            self.current_cold_index = index;
        }
        if let Some(replicas) = &patch.replicas {
            validate_replicas(replicas)?;
            self.replicas = replicas.clone();
        }
        if let Some(read_only) = patch.read_only {
            self.read_only = read_only;
        }
        Ok(())
    }
}

fn validate_replicas(replicas: &[ReplicaDescriptor]) -> ShardResult<()> {
    let mut seen = std::collections::HashSet::new();
    for replica in replicas {
        if replica.key().is_empty() {
            return Err(ShardError::Config(
                "replica descriptor must have a non-empty name or id".to_string(),
            ));
        }
        if !seen.insert(replica.key()) {
            return Err(ShardError::Config(format!(
                "duplicate replica '{}'",
                replica.key()
            )));
        }
    }
    Ok(())
}

/// Partial configuration merged into the persisted `ShardConfig` by
/// `Configure`. Unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub id_type: Option<IdType>,
    pub tick_interval_ms: Option<u64>,
    pub purge_count_threshold: Option<u64>,
    pub purge_target_count: Option<u64>,
    pub size_threshold_bytes: Option<u64>,
    pub cold_shard_prefix: Option<String>,
    pub cold_shard_capacity: Option<u64>,
    pub current_cold_index: Option<u32>,
    pub replicas: Option<Vec<ReplicaDescriptor>>,
    pub read_only: Option<bool>,
}

impl ConfigPatch {
    /// True when applying this patch to `config` would change nothing.
    pub fn is_noop_for(&self, config: &ShardConfig) -> bool {
        let mut merged = config.clone();
        match merged.apply(self) {
            Ok(()) => {
                serde_json::to_string(&merged).ok() == serde_json::to_string(config).ok()
            }
            Err(_) => false,
        }
    }
}
