use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{Result, TypesError};

/// The set of identifier type keys a deployment recognises, loaded from the
/// `identifiers` section of process configuration (see `refharvest-runtime`).
///
/// Identifier types are deliberately *not* a Rust enum: the original system
/// lets operators register new identifier keys (`idref`, `orcid`, `idhal_i`,
/// `idhal_s`, ...) without a code change, and this type preserves that by
/// validating against a runtime-configured closed set instead.
#[derive(Debug, Clone, Default)]
pub struct IdentifierTypeRegistry {
    known: HashSet<String>,
}

impl IdentifierTypeRegistry {
    /// Build a registry from a list of configured identifier type keys.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// The registry shipped by default, matching the identifier types named
    /// in the specification: IdRef, ORCID, and the two historical ID_HAL
    /// variants (person-scoped and structure-scoped).
    pub fn defaults() -> Self {
        Self::from_keys(["idref", "orcid", "idhal_i", "idhal_s"])
    }

    /// Whether `kind` is a recognised identifier type.
    pub fn contains(&self, kind: &str) -> bool {
        self.known.contains(kind)
    }
}

/// A single `(type, value)` identifier pair, unique on that pair within an
/// entity's identifier set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    /// The identifier's type key, e.g. `"idref"` or `"orcid"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The identifier's value within its type's namespace.
    pub value: String,
}

impl Identifier {
    /// Construct an identifier, rejecting types absent from `registry`.
    pub fn new(
        kind: impl Into<String>,
        value: impl Into<String>,
        registry: &IdentifierTypeRegistry,
    ) -> Result<Self> {
        let kind = kind.into();
        if !registry.contains(&kind) {
            return Err(TypesError::UnknownIdentifierType(kind));
        }
        Ok(Self {
            kind,
            value: value.into(),
        })
    }

    /// Construct an identifier without validating its type against a
    /// registry. Used when reading rows back from storage, where the type
    /// was already validated at write time.
    pub fn trusted(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_identifier_type() {
        let registry = IdentifierTypeRegistry::defaults();
        let err = Identifier::new("wikidata", "Q42", &registry).unwrap_err();
        assert_eq!(err, TypesError::UnknownIdentifierType("wikidata".into()));
    }

    #[test]
    fn accepts_known_identifier_type() {
        let registry = IdentifierTypeRegistry::defaults();
        let id = Identifier::new("idref", "027231313", &registry).unwrap();
        assert_eq!(id.kind, "idref");
        assert_eq!(id.value, "027231313");
    }

    #[test]
    fn custom_registry_can_extend_defaults() {
        let registry = IdentifierTypeRegistry::from_keys(["idref", "wikidata"]);
        assert!(Identifier::new("wikidata", "Q42", &registry).is_ok());
    }
}
