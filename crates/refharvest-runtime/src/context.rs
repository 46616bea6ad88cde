use std::sync::Arc;

use tracing::info;

use refharvest_broker::ConsumerPool;
use refharvest_cache::{InMemoryCache, RedisCache, ThirdPartyCache};
use refharvest_harvester_core::RetryPolicy;
use refharvest_harvesters::HarvesterRegistry;
use refharvest_orchestrator::Orchestrator;
use refharvest_store_core::ReferenceStore;
use refharvest_store_postgres::PostgresStore;

use crate::config::Config;

/// Every long-lived collaborator the binary needs, built once at startup.
/// Replaces the reference architecture's implicit process-wide globals with
/// an explicit struct threaded through construction (§9's "Global-mutable
/// broker/app state" redesign note).
pub struct AppContext {
    /// The persistent relational store.
    pub store: Arc<dyn ReferenceStore>,
    /// The third-party payload cache (Redis-backed, or an in-memory double
    /// when no `redis_url` is configured).
    pub cache: Arc<dyn ThirdPartyCache>,
    /// Registers and runs retrievals against the configured harvesters.
    pub orchestrator: Arc<Orchestrator>,
    /// The AMQP consumer pool, already bound to its queue and exchange.
    pub consumer: ConsumerPool,
    /// Bind address for the health HTTP surface.
    pub health_bind_address: String,
}

impl AppContext {
    /// Wire `Config` into a running set of collaborators: storage pool,
    /// cache client, harvester registry, orchestrator, and broker
    /// connection, in that order (§10's "Graceful process lifecycle").
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn ReferenceStore> =
            Arc::new(PostgresStore::connect(&config.database_url, config.database_max_connections).await?);
        info!("connected to storage backend");

        let cache: Arc<dyn ThirdPartyCache> = match &config.redis_url {
            Some(redis_url) => {
                info!("connected to third-party cache backend");
                Arc::new(RedisCache::connect(redis_url).await?)
            }
            None => {
                info!("no redis_url configured, using in-memory third-party cache");
                Arc::new(InMemoryCache::new())
            }
        };

        let http_client = reqwest::Client::new();
        let registry = HarvesterRegistry::configure(&config.harvesters, http_client)?;
        info!(count = config.harvesters.len(), "harvester registry configured");

        let orchestrator = Arc::new(Orchestrator::new(store.clone(), registry, RetryPolicy::default()));

        let identifiers = refharvest_types::IdentifierTypeRegistry::from_keys(config.identifiers.clone());
        let broker_config = config.broker.clone().into_broker_config();
        let consumer = ConsumerPool::connect(broker_config, orchestrator.clone(), identifiers).await?;
        info!("connected to broker");

        Ok(Self { store, cache, orchestrator, consumer, health_bind_address: config.health_bind_address })
    }
}
