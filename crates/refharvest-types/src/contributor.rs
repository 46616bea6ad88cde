use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Identifier, Organization, Result, TypesError};

/// A person in the authorship graph of a reference, as reported by one
/// particular harvester source. Uniqueness is `(source, source_identifier)`
/// when an identifier is known, otherwise `(source, name)` — the
/// contributor-scoped identifier variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    /// Storage identifier, assigned once persisted.
    pub id: Option<Uuid>,
    /// The harvester source this contributor record came from.
    pub source: String,
    /// The contributor's identifier within `source`, when the source
    /// assigns one.
    pub source_identifier: Option<String>,
    /// Display name as currently known.
    pub name: String,
    /// Given name, when the source splits it out.
    pub first_name: Option<String>,
    /// Family name, when the source splits it out.
    pub last_name: Option<String>,
    /// Prior display names, pushed here on name drift.
    pub name_variants: Vec<String>,
    /// Prior `(first_name, last_name)` pairs, pushed here on structured name
    /// drift.
    pub structured_name_variants: Vec<(Option<String>, Option<String>)>,
    /// External identifiers known for this contributor (ORCID, IdRef, ...).
    pub identifiers: Vec<Identifier>,
}

impl Contributor {
    /// Construct a contributor, requiring a non-blank name.
    pub fn new(source: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(TypesError::InvalidContributor(
                "contributor name must not be blank".into(),
            ));
        }
        Ok(Self {
            id: None,
            source: source.into(),
            source_identifier: None,
            name,
            first_name: None,
            last_name: None,
            name_variants: Vec::new(),
            structured_name_variants: Vec::new(),
            identifiers: Vec::new(),
        })
    }

    /// The reconciliation key: `(source, source_identifier)` when an
    /// identifier is set, otherwise `(source, name)`.
    pub fn reconciliation_key(&self) -> ContributorKey {
        match &self.source_identifier {
            Some(sid) => ContributorKey::Identified(self.source.clone(), sid.clone()),
            None => ContributorKey::Named(self.source.clone(), self.name.clone()),
        }
    }

    /// Record that the incoming name differs from the name currently stored,
    /// pushing the old name onto `name_variants` (deduplicated) before it is
    /// overwritten by the caller.
    pub fn record_name_drift(&mut self, incoming_name: &str) {
        if self.name != incoming_name && !self.name_variants.iter().any(|v| v == &self.name) {
            self.name_variants.push(self.name.clone());
        }
    }

    /// Record structured `(first_name, last_name)` drift the same way.
    pub fn record_structured_name_drift(
        &mut self,
        incoming_first: &Option<String>,
        incoming_last: &Option<String>,
    ) {
        let current = (self.first_name.clone(), self.last_name.clone());
        if &current != &(incoming_first.clone(), incoming_last.clone())
            && (current.0.is_some() || current.1.is_some())
            && !self.structured_name_variants.contains(&current)
        {
            self.structured_name_variants.push(current);
        }
    }
}

/// The key `refharvest-reconciliation` looks a contributor up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContributorKey {
    /// `(source, source_identifier)`.
    Identified(String, String),
    /// `(source, name)`.
    Named(String, String),
}

/// One contributor's participation in a reference: their role, rank among
/// co-contributors, and affiliated organizations at the time of
/// contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    /// The contributor.
    pub contributor: Contributor,
    /// Contribution role (e.g. `"author"`, `"editor"`), when known.
    pub role: Option<String>,
    /// Rank among co-contributors (1-based), when known.
    pub rank: Option<u32>,
    /// Organizations the contributor was affiliated with for this reference.
    pub affiliations: Vec<Organization>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_name() {
        assert!(Contributor::new("hal", "   ").is_err());
    }

    #[test]
    fn reconciliation_key_prefers_identifier() {
        let mut c = Contributor::new("hal", "Jane Doe").unwrap();
        c.source_identifier = Some("123".into());
        assert_eq!(
            c.reconciliation_key(),
            ContributorKey::Identified("hal".into(), "123".into())
        );
    }

    #[test]
    fn name_drift_pushes_old_name_once() {
        let mut c = Contributor::new("hal", "Jane Doe").unwrap();
        c.record_name_drift("J. Doe");
        c.name = "J. Doe".to_string();
        c.record_name_drift("Jane Doe");
        c.name = "Jane Doe".to_string();
        c.record_name_drift("J. Doe");
        assert_eq!(c.name_variants, vec!["Jane Doe".to_string(), "J. Doe".to_string()]);
    }
}
