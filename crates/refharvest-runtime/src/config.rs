use std::time::Duration;

use serde::Deserialize;

use refharvest_broker::BrokerConfig;
use refharvest_harvesters::AdapterConfig;

fn default_exchange_name() -> String {
    "publications".into()
}
fn default_routing_key() -> String {
    "task.person.references.retrieval".into()
}
fn default_prefetch_count() -> u16 {
    10
}
fn default_consumer_ack_timeout_ms() -> u64 {
    60_000
}
fn default_inner_task_queue_length() -> usize {
    100
}
fn default_inner_task_parallelism_limit() -> usize {
    4
}
fn default_wait_before_shutdown_secs() -> u64 {
    30
}
fn default_result_timeout_secs() -> u64 {
    600
}
fn default_database_max_connections() -> u32 {
    10
}
fn default_cache_ttl_seconds() -> u64 {
    3600
}
fn default_health_bind_address() -> String {
    "0.0.0.0:8080".into()
}

/// The AMQP connection and queue-topology settings of §6, flattened onto
/// [`Config`] under the `broker` key.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSettings {
    /// AMQP broker host.
    pub host: String,
    /// AMQP broker username.
    pub user: String,
    /// AMQP broker password.
    pub password: String,
    /// The durable topic exchange name.
    #[serde(default = "default_exchange_name")]
    pub exchange_name: String,
    /// The durable inbound queue name.
    pub queue_name: String,
    /// The routing key the inbound queue binds to.
    #[serde(default = "default_routing_key")]
    pub routing_key: String,
    /// QoS prefetch count.
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    /// `x-consumer-timeout` queue argument, milliseconds.
    #[serde(default = "default_consumer_ack_timeout_ms")]
    pub consumer_ack_timeout_ms: u64,
    /// Bounded capacity of the internal task channel workers drain.
    #[serde(default = "default_inner_task_queue_length")]
    pub inner_task_queue_length: usize,
    /// Worker pool size.
    #[serde(default = "default_inner_task_parallelism_limit")]
    pub inner_task_parallelism_limit: usize,
    /// Graceful shutdown drain budget, in seconds.
    #[serde(default = "default_wait_before_shutdown_secs")]
    pub wait_before_shutdown_secs: u64,
    /// Per-retrieval-result pull timeout, in seconds.
    #[serde(default = "default_result_timeout_secs")]
    pub result_timeout_secs: u64,
}

impl BrokerSettings {
    /// Convert into the runtime `BrokerConfig` the broker crate consumes.
    pub fn into_broker_config(self) -> BrokerConfig {
        BrokerConfig {
            host: self.host,
            user: self.user,
            password: self.password,
            exchange_name: self.exchange_name,
            queue_name: self.queue_name,
            routing_key: self.routing_key,
            prefetch_count: self.prefetch_count,
            consumer_ack_timeout_ms: self.consumer_ack_timeout_ms,
            inner_task_queue_length: self.inner_task_queue_length,
            inner_task_parallelism_limit: self.inner_task_parallelism_limit,
            wait_before_shutdown: Duration::from_secs(self.wait_before_shutdown_secs),
            result_timeout: Duration::from_secs(self.result_timeout_secs),
        }
    }
}

/// Process-wide configuration, deserialised via the `config` crate from a
/// layered TOML file plus `REFHARVEST__`-prefixed environment overrides
/// (§10's "Configuration" ambient-stack item). Every item named in §6's
/// recognised-options list lives here.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// AMQP connection and topology settings.
    pub broker: BrokerSettings,
    /// Postgres connection string.
    pub database_url: String,
    /// Bounded connection pool size against `database_url`.
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,
    /// Redis connection string; when absent, an in-memory cache double is
    /// used instead (fine for a single-process deployment, not for a
    /// multi-replica one).
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Whether harvester adapters should consult the third-party cache
    /// before issuing a live external request.
    #[serde(default)]
    pub third_api_caching_enabled: bool,
    /// Default TTL applied to third-party cache entries, in seconds.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    /// The closed set of identifier type keys this deployment recognises.
    #[serde(default)]
    pub identifiers: Vec<String>,
    /// The configured harvester adapters, in the order
    /// `HarvesterRegistry::adapters_for` should try them.
    #[serde(default)]
    pub harvesters: Vec<AdapterConfig>,
    /// Ordered concept-label language preference, most preferred first.
    #[serde(default)]
    pub concept_languages: Vec<String>,
    /// Bind address for the `GET /` health HTTP surface.
    #[serde(default = "default_health_bind_address")]
    pub health_bind_address: String,
}

impl Config {
    /// Load configuration from an optional TOML file, then apply
    /// `REFHARVEST__`-prefixed environment overrides (e.g.
    /// `REFHARVEST__DATABASE_URL`, `REFHARVEST__BROKER__HOST`).
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("REFHARVEST").separator("__"));
        let raw = builder.build()?;
        Ok(raw.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_from_environment_alone() {
        std::env::set_var("REFHARVEST__DATABASE_URL", "postgres://localhost/refharvest_test");
        std::env::set_var("REFHARVEST__BROKER__HOST", "localhost");
        std::env::set_var("REFHARVEST__BROKER__USER", "guest");
        std::env::set_var("REFHARVEST__BROKER__PASSWORD", "guest");
        std::env::set_var("REFHARVEST__BROKER__QUEUE_NAME", "references");

        let config = Config::load(None).unwrap();
        assert_eq!(config.database_url, "postgres://localhost/refharvest_test");
        assert_eq!(config.broker.exchange_name, "publications");
        assert_eq!(config.health_bind_address, "0.0.0.0:8080");

        std::env::remove_var("REFHARVEST__DATABASE_URL");
        std::env::remove_var("REFHARVEST__BROKER__HOST");
        std::env::remove_var("REFHARVEST__BROKER__USER");
        std::env::remove_var("REFHARVEST__BROKER__PASSWORD");
        std::env::remove_var("REFHARVEST__BROKER__QUEUE_NAME");
    }
}
