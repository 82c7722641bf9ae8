pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod metrics;
pub mod planner;
pub mod queue;
pub mod replication;
pub mod router;
pub mod server;
pub mod shard;
pub mod storage;

pub use cache::{CacheInvalidator, ResultCache};
pub use config::{ConfigPatch, IdType, ReplicaDescriptor, ShardConfig};
pub use error::{FieldError, ShardError, ShardResult};
pub use server::{create_router, AppState};
pub use shard::registry::{InMemoryRegistry, ShardHandle, ShardRegistry};
pub use shard::{SearchRequest, Shard, ShardStats};
pub use storage::{DocId, Document, Hit, Store, StoredDocument};
