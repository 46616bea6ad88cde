use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Entity;

/// The set of options that steer a single retrieval, carried end-to-end from
/// the inbound message through to the per-harvester adapters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalOptions {
    /// When true, identifier validation failures are logged and the
    /// offending identifier dropped rather than rejecting the whole
    /// retrieval.
    #[serde(default)]
    pub identifiers_safe_mode: bool,
    /// Identifier types to treat as absent during entity resolution, even
    /// though they were supplied.
    #[serde(default)]
    pub nullify: Vec<String>,
    /// The harvesters to run. Empty means "every harvester relevant to the
    /// entity", as determined by each adapter's relevance check.
    #[serde(default)]
    pub harvesters: Vec<String>,
    /// The reference event types the caller wants published; empty means
    /// all of them.
    #[serde(default)]
    pub events: Vec<crate::ReferenceEventType>,
}

/// A single harvesting run request: an entity to harvest references for, the
/// harvesters that will attempt it, and the options steering the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrieval {
    /// Storage identifier, assigned once persisted.
    pub id: Option<Uuid>,
    /// The entity (currently always a person) references are being
    /// harvested for.
    pub entity: Entity,
    /// The options this retrieval was started with.
    pub options: RetrievalOptions,
    /// When this retrieval was registered.
    pub requested_at: DateTime<Utc>,
}

impl Retrieval {
    /// Register a new retrieval for `entity` with `options`, stamped `at`.
    pub fn new(entity: Entity, options: RetrievalOptions, at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            entity,
            options,
            requested_at: at,
        }
    }

    /// The entity this retrieval concerns, with `nullify`-listed identifier
    /// types removed, as adapters should see it.
    pub fn effective_entity(&self) -> Entity {
        if self.options.nullify.is_empty() {
            self.entity.clone()
        } else {
            self.entity.nullifying(&self.options.nullify)
        }
    }

    /// Whether `harvester` should run for this retrieval: either the
    /// harvester list is empty (meaning "every relevant harvester") or it
    /// explicitly names `harvester`.
    pub fn wants_harvester(&self, harvester: &str) -> bool {
        self.options.harvesters.is_empty()
            || self.options.harvesters.iter().any(|h| h == harvester)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Entity, PersonName};

    fn entity() -> Entity {
        Entity::new_person(
            PersonName {
                first_name: Some("Jane".into()),
                last_name: Some("Doe".into()),
            },
            vec![crate::Identifier::trusted("idref", "123")],
        )
        .unwrap()
    }

    #[test]
    fn empty_harvester_list_means_all() {
        let r = Retrieval::new(entity(), RetrievalOptions::default(), Utc::now());
        assert!(r.wants_harvester("hal"));
        assert!(r.wants_harvester("idref"));
    }

    #[test]
    fn explicit_harvester_list_is_exclusive() {
        let r = Retrieval::new(
            entity(),
            RetrievalOptions {
                harvesters: vec!["hal".into()],
                ..Default::default()
            },
            Utc::now(),
        );
        assert!(r.wants_harvester("hal"));
        assert!(!r.wants_harvester("idref"));
    }

    #[test]
    fn nullify_strips_identifier_types_from_effective_entity() {
        let r = Retrieval::new(
            entity(),
            RetrievalOptions {
                nullify: vec!["idref".into()],
                ..Default::default()
            },
            Utc::now(),
        );
        assert!(r.effective_entity().identifiers.is_empty());
        assert!(!r.entity.identifiers.is_empty());
    }
}
