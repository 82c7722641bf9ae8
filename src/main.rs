use std::sync::Arc;

use clap::{Parser, ValueEnum};
use textshard::{
    cache::CacheInvalidator, create_router, AppState, ConfigPatch, IdType, InMemoryRegistry,
    ReplicaDescriptor, ResultCache,
};
use textshard::queue::{IngestQueue, DEFAULT_QUEUE_CAPACITY};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IdTypeArg {
    String,
    Integer,
}

impl From<IdTypeArg> for IdType {
    fn from(value: IdTypeArg) -> Self {
        match value {
            IdTypeArg::String => IdType::String,
            IdTypeArg::Integer => IdType::Integer,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "textshard")]
#[command(about = "Distributed full-text search shard service", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 7700)]
    port: u16,

    /// Data directory holding one database per shard
    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// Name of the primary shard
    #[arg(long, default_value = "primary")]
    shard_name: String,

    /// Document id type (immutable once documents exist)
    #[arg(long, value_enum, default_value_t = IdTypeArg::String)]
    id_type: IdTypeArg,

    /// Replica to fan indexed documents out to (repeatable)
    #[arg(long = "replica")]
    replicas: Vec<String>,

    /// Scheduler tick interval in milliseconds
    #[arg(long, default_value_t = 60_000)]
    tick_interval_ms: u64,

    /// Document count at which cold migration starts
    #[arg(long, default_value_t = 100_000)]
    purge_count_threshold: u64,

    /// Document count to shrink back to (default: migrate 20%)
    #[arg(long)]
    purge_target_count: Option<u64>,

    /// Name prefix for cold shards
    #[arg(long, default_value = "cold")]
    cold_shard_prefix: String,

    /// Documents per cold shard
    #[arg(long, default_value_t = 10_000)]
    cold_shard_capacity: u64,

    /// Ingest queue capacity in batches
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Result cache capacity in entries
    #[arg(long, default_value_t = 1_000)]
    cache_entries: usize,

    /// Result cache TTL in seconds
    #[arg(long, default_value_t = 60)]
    cache_ttl_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before parsing CLI args)
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "textshard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let id_type: IdType = args.id_type.into();
    let cache = Arc::new(ResultCache::new(args.cache_entries, args.cache_ttl_secs));
    let invalidator: Arc<dyn CacheInvalidator> = cache.clone();
    let registry = InMemoryRegistry::new(&args.data_dir, Some(invalidator));

    let replicas: Vec<ReplicaDescriptor> = args
        .replicas
        .iter()
        .map(|name| ReplicaDescriptor::Region { name: name.clone() })
        .collect();

    // Replicas must be ready before the primary's first replication tick.
    for descriptor in &replicas {
        let replica = registry.get_or_create(descriptor.key()).await?;
        replica
            .configure(ConfigPatch {
                id_type: Some(id_type),
                ..Default::default()
            })
            .await?;
    }

    let primary = registry.get_or_create(&args.shard_name).await?;
    primary
        .configure(ConfigPatch {
            id_type: Some(id_type),
            tick_interval_ms: Some(args.tick_interval_ms),
            purge_count_threshold: Some(args.purge_count_threshold),
            purge_target_count: args.purge_target_count,
            cold_shard_prefix: Some(args.cold_shard_prefix.clone()),
            cold_shard_capacity: Some(args.cold_shard_capacity),
            replicas: (!replicas.is_empty()).then_some(replicas),
            ..Default::default()
        })
        .await?;

    let queue = IngestQueue::start(primary.clone(), args.queue_capacity);
    let state = AppState {
        registry,
        primary,
        queue,
        cache,
        api_token: std::env::var("TEXTSHARD_API_TOKEN").ok().map(Arc::new),
    };

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
    tracing::info!(port = args.port, shard = %args.shard_name, "textshard listening");
    axum::serve(listener, app).await?;
    Ok(())
}
