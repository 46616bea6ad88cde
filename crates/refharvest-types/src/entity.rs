use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Identifier, Result, TypesError};

/// The closed set of entity variants the orchestrator reconciles. Only
/// `Person` is populated today; the variant exists so storage and
/// reconciliation code do not need to change shape when a second kind is
/// added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A natural person identified by a researcher identifier.
    Person,
}

/// A person's name, split so contributor name-drift comparisons (see
/// `refharvest-reconciliation`) can operate on first/last name independently
/// of the identifiers that may also be known for them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    /// Given name, if known.
    pub first_name: Option<String>,
    /// Family name, if known.
    pub last_name: Option<String>,
}

impl PersonName {
    /// Whether both a first and last name are present.
    pub fn is_complete(&self) -> bool {
        self.first_name.as_deref().is_some_and(|s| !s.trim().is_empty())
            && self.last_name.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// A polymorphic entity the orchestrator reconciles and retrieves
/// publications for. Currently always a `Person`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Storage identifier, assigned once the entity has been persisted.
    pub id: Option<Uuid>,
    /// Which entity variant this is.
    pub kind: EntityKind,
    /// The entity's name.
    pub name: PersonName,
    /// Identifiers known for this entity, unique on `(type, value)`.
    pub identifiers: Vec<Identifier>,
}

impl Entity {
    /// Construct a `Person` entity, enforcing the identity invariant: at
    /// least one recognised identifier, or a full first and last name.
    pub fn new_person(name: PersonName, identifiers: Vec<Identifier>) -> Result<Self> {
        if identifiers.is_empty() && !name.is_complete() {
            return Err(TypesError::EntityMissingIdentity);
        }
        Ok(Self {
            id: None,
            kind: EntityKind::Person,
            name,
            identifiers,
        })
    }

    /// Identifiers of the given type carried by this entity.
    pub fn identifiers_of_type<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Identifier> {
        self.identifiers.iter().filter(move |id| id.kind == kind)
    }

    /// Return a copy of this entity with the given identifier types removed,
    /// implementing the `nullify` retrieval option: treating the listed
    /// identifier types as absent during entity resolution.
    pub fn nullifying(&self, types: &[String]) -> Self {
        let mut copy = self.clone();
        copy.identifiers.retain(|id| !types.iter().any(|t| t == &id.kind));
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_person_with_no_identity() {
        let err = Entity::new_person(PersonName::default(), vec![]).unwrap_err();
        assert_eq!(err, TypesError::EntityMissingIdentity);
    }

    #[test]
    fn accepts_person_with_only_identifier() {
        let id = Identifier::trusted("idref", "027231313");
        let entity = Entity::new_person(PersonName::default(), vec![id]).unwrap();
        assert_eq!(entity.identifiers.len(), 1);
    }

    #[test]
    fn accepts_person_with_only_full_name() {
        let name = PersonName {
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
        };
        assert!(Entity::new_person(name, vec![]).is_ok());
    }

    #[test]
    fn nullify_drops_listed_identifier_types() {
        let id_orcid = Identifier::trusted("orcid", "0000-0001");
        let id_idref = Identifier::trusted("idref", "1234");
        let entity = Entity::new_person(PersonName::default(), vec![id_orcid, id_idref]).unwrap();
        let nullified = entity.nullifying(&["orcid".to_string()]);
        assert_eq!(nullified.identifiers.len(), 1);
        assert_eq!(nullified.identifiers[0].kind, "idref");
    }
}
