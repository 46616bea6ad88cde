#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refharvest-harvesters** – Concrete [`HarvesterAdapter`] implementations
//! and the factory/registry (§4.5) that instantiates them from
//! configuration.
//!
//! Configuration enumerates adapters by name and per-adapter options; the
//! registry resolves names against a fixed, compiled-in set rather than any
//! form of plugin loading, so an unrecognised name fails fast at config
//! load instead of silently being ignored at retrieval time.

mod hal;
mod idref;
mod open_alex;

pub use hal::HalAdapter;
pub use idref::IdRefAdapter;
pub use open_alex::OpenAlexAdapter;

use std::sync::Arc;

use refharvest_harvester_core::HarvesterAdapter;
use refharvest_types::Entity;
use serde::Deserialize;

/// One configured adapter slot: its name and adapter-specific options
/// (e.g. `idref`'s `max_sudoc_parallelism`).
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// The adapter name, matched against the registry's compiled-in set.
    pub name: String,
    /// Adapter-specific options, interpreted per adapter.
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Raised when configuration names an adapter the registry doesn't know
/// how to build.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// `name` matched no known adapter.
    #[error("unknown harvester adapter: {0}")]
    UnknownAdapter(String),
}

/// The configured, ready-to-run set of harvester adapters for a
/// deployment, in the order configuration listed them.
pub struct HarvesterRegistry {
    adapters: Vec<Arc<dyn HarvesterAdapter>>,
}

impl HarvesterRegistry {
    /// Instantiate every adapter named in `configs`, sharing one HTTP
    /// client across them. Fails fast on the first unrecognised name.
    pub fn configure(configs: &[AdapterConfig], client: reqwest::Client) -> Result<Self, RegistryError> {
        let mut adapters: Vec<Arc<dyn HarvesterAdapter>> = Vec::with_capacity(configs.len());
        for config in configs {
            let adapter: Arc<dyn HarvesterAdapter> = match config.name.as_str() {
                "hal" => Arc::new(HalAdapter::new(client.clone())),
                "open_alex" => Arc::new(OpenAlexAdapter::new(client.clone())),
                "idref" => {
                    let max_sudoc_parallelism = config
                        .options
                        .get("max_sudoc_parallelism")
                        .and_then(serde_json::Value::as_u64)
                        .unwrap_or(3) as usize;
                    Arc::new(IdRefAdapter::new(client.clone(), max_sudoc_parallelism))
                }
                other => return Err(RegistryError::UnknownAdapter(other.to_string())),
            };
            adapters.push(adapter);
        }
        Ok(Self { adapters })
    }

    /// The adapters relevant to `entity`, in configuration order,
    /// optionally restricted to `only` (a retrieval's `harvesters` option;
    /// empty means no restriction).
    pub fn adapters_for(&self, entity: &Entity, only: &[String]) -> Vec<Arc<dyn HarvesterAdapter>> {
        self.adapters
            .iter()
            .filter(|adapter| only.is_empty() || only.iter().any(|name| name == adapter.name()))
            .filter(|adapter| adapter.is_relevant(entity))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refharvest_types::Identifier;

    fn configs() -> Vec<AdapterConfig> {
        vec![
            AdapterConfig { name: "hal".into(), options: serde_json::Value::Null },
            AdapterConfig { name: "idref".into(), options: serde_json::json!({"max_sudoc_parallelism": 5}) },
            AdapterConfig { name: "open_alex".into(), options: serde_json::Value::Null },
        ]
    }

    #[test]
    fn unknown_adapter_name_fails_fast() {
        let bad = vec![AdapterConfig { name: "scopus".into(), options: serde_json::Value::Null }];
        let err = HarvesterRegistry::configure(&bad, reqwest::Client::new()).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownAdapter(name) if name == "scopus"));
    }

    #[test]
    fn relevance_filtering_preserves_configuration_order() {
        let registry = HarvesterRegistry::configure(&configs(), reqwest::Client::new()).unwrap();
        let entity = Entity::new_person(
            Default::default(),
            vec![Identifier::trusted("idref", "123"), Identifier::trusted("orcid", "0000-0001-2345-6789")],
        )
        .unwrap();

        let selected = registry.adapters_for(&entity, &[]);
        let names: Vec<&str> = selected.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["idref", "open_alex"]);
    }

    #[test]
    fn harvesters_option_restricts_selection() {
        let registry = HarvesterRegistry::configure(&configs(), reqwest::Client::new()).unwrap();
        let entity = Entity::new_person(
            Default::default(),
            vec![Identifier::trusted("idref", "123"), Identifier::trusted("orcid", "0000-0001-2345-6789")],
        )
        .unwrap();

        let selected = registry.adapters_for(&entity, &["idref".to_string()]);
        let names: Vec<&str> = selected.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["idref"]);
    }
}
