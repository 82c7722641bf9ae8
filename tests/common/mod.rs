//! Common test utilities: registry + shard fixtures backed by a temp dir.
#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use textshard::{ConfigPatch, IdType, InMemoryRegistry, Shard};

pub fn create_registry() -> (Arc<InMemoryRegistry>, TempDir) {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");
    let registry = InMemoryRegistry::new(tmp_dir.path(), None);
    (registry, tmp_dir)
}

pub async fn configured_shard(
    registry: &Arc<InMemoryRegistry>,
    name: &str,
    id_type: IdType,
) -> Arc<Shard> {
    let shard = registry
        .get_or_create(name)
        .await
        .expect("Failed to open shard");
    shard
        .configure(ConfigPatch {
            id_type: Some(id_type),
            ..Default::default()
        })
        .await
        .expect("Failed to configure shard");
    shard
}
