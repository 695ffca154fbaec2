use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use event_publisher::{EventPublisher, MediaJobQueue, ProducerPool, SchemaRegistryCache};
use feed::{FeedHydrator, FeedRanker, FeedService, ViewFilter};
use graph_neo4j::Neo4jGraph;
use outbox::{EngagementService, OutboxRelay, spawn_relay_task};
use reelz_api::{
    GraphCandidateSource, OutboxSource, PostStore, ProducerFactory, RelationalStore, SchemaRegistry, ViewHistory,
};
use schema_registry_http::HttpSchemaRegistry;
use storage_memory::{MemoryBroker, MemoryGraph, MemorySchemaRegistry, MemoryStore};
use storage_postgres::PgStore;

use crate::api::{self, AppState};
use crate::config::{BrokerConfig, GraphConfig, RegistryConfig, ServeArgs, ServerConfig, StoreConfig};
use crate::error::ServerError;

/// How long background tasks get to stop after cancellation.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The primary store seen through each of its roles.
struct Stores {
    relational: Arc<dyn RelationalStore>,
    outbox: Arc<dyn OutboxSource>,
    posts: Arc<dyn PostStore>,
    views: Arc<dyn ViewHistory>,
    postgres: Option<PgStore>,
}

impl Stores {
    fn from_store<S>(store: Arc<S>) -> Self
    where
        S: RelationalStore + OutboxSource + PostStore + ViewHistory + 'static,
    {
        Self {
            relational: store.clone(),
            outbox: store.clone(),
            posts: store.clone(),
            views: store,
            postgres: None,
        }
    }
}

async fn open_store(config: &StoreConfig) -> Result<Stores, ServerError> {
    match config {
        StoreConfig::Memory => Ok(Stores::from_store(Arc::new(MemoryStore::new()))),
        StoreConfig::Postgres(pg) => {
            let store = PgStore::connect(pg).await?;
            let mut stores = Stores::from_store(Arc::new(store.clone()));
            stores.postgres = Some(store);
            Ok(stores)
        }
    }
}

fn open_graph(config: &GraphConfig) -> Result<Arc<dyn GraphCandidateSource>, ServerError> {
    Ok(match config {
        GraphConfig::Memory => Arc::new(MemoryGraph::new()),
        GraphConfig::Neo4j(neo) => Arc::new(Neo4jGraph::new(neo)?),
    })
}

fn open_registry(config: &RegistryConfig) -> Result<Arc<dyn SchemaRegistry>, ServerError> {
    Ok(match config {
        RegistryConfig::Memory => Arc::new(MemorySchemaRegistry::new()),
        RegistryConfig::Http(http) => Arc::new(HttpSchemaRegistry::new(http)?),
    })
}

fn open_broker(config: &BrokerConfig) -> Result<Arc<dyn ProducerFactory>, ServerError> {
    match config {
        BrokerConfig::Memory => Ok(Arc::new(MemoryBroker::new())),
        #[cfg(feature = "kafka")]
        BrokerConfig::Kafka(kafka) => Ok(Arc::new(broker_kafka::KafkaProducerFactory::new(kafka.clone()))),
        #[cfg(not(feature = "kafka"))]
        BrokerConfig::Kafka(_) => Err(ServerError::Config {
            context: "broker",
            detail: "built without the `kafka` feature".into(),
        }),
    }
}

async fn join_with_timeout(name: &'static str, handle: JoinHandle<()>) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "task panicked"),
        Err(_) => {
            tracing::warn!(task = name, "task did not stop in time, aborting");
            abort.abort();
        }
    }
}

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("reelz-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    config.validate()?;
    tracing::info!(
        config = %args.config,
        store = config.store.kind(),
        graph = config.graph.kind(),
        broker = config.broker.kind(),
        schema_registry = config.schema_registry.kind(),
        "loaded config"
    );

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- Backends ---
    let stores = open_store(&config.store).await?;
    let graph = open_graph(&config.graph)?;
    let registry = open_registry(&config.schema_registry)?;
    let factory = open_broker(&config.broker)?;

    // --- Publishing ---
    let pool = ProducerPool::open(factory);
    let schemas = Arc::new(SchemaRegistryCache::new(registry));
    let publisher = Arc::new(EventPublisher::new(pool.clone(), schemas, config.publisher.retry_policy()));
    let media = Arc::new(MediaJobQueue::new(publisher.clone())?);

    // --- Domain services ---
    let engagement = Arc::new(EngagementService::new(stores.relational.clone(), stores.views.clone()));
    let feed = Arc::new(FeedService::new(
        FeedRanker::new(graph, config.feed.ranker_config()),
        ViewFilter::new(stores.views.clone(), config.feed.view_window()),
        FeedHydrator::new(stores.posts.clone()),
    ));

    // --- Outbox relay ---
    let relay_handle = if config.relay.enabled {
        let relay = Arc::new(OutboxRelay::new(
            stores.outbox.clone(),
            publisher.clone(),
            config.relay.producer.clone(),
            config.relay.batch_size,
        ));
        Some(spawn_relay_task(relay, Duration::from_millis(config.relay.interval_ms), token.clone()))
    } else {
        tracing::warn!("outbox relay disabled, events stay in the outbox");
        None
    };

    // --- API server ---
    let listener = api::bind(config.api_port).await?;
    let app = api::router(AppState { engagement, feed, media });
    let api_token = token.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(listener, app, api_token).await {
            tracing::error!(error = %e, "api server error");
        }
    });

    tracing::info!(port = config.api_port, "api server listening");
    tracing::info!("server ready");

    // --- Ожидание Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    token.cancel();

    join_with_timeout("api", api_handle).await;
    if let Some(handle) = relay_handle {
        join_with_timeout("outbox-relay", handle).await;
    }

    // Producers flush in-flight sends on disconnect
    if let Err(e) = pool.shutdown_all().await {
        tracing::error!(error = %e, "producer pool shutdown error");
    }
    if let Some(pg) = &stores.postgres {
        pg.close().await;
    }

    tracing::info!("shutdown complete");
    Ok(())
}
