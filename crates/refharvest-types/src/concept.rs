use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single label attached to a `Concept`: a value in a language, optionally
/// marked as the preferred label for that language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// The label text.
    pub value: String,
    /// BCP-47-ish language tag, when known.
    pub language: Option<String>,
    /// Whether this is the preferred label for its language.
    pub preferred: bool,
}

/// A subject term, possibly dereferenced to a stable URI (e.g. a Wikidata or
/// JEL concept). Uniqueness is by `uri` when present, otherwise by
/// `(label.value, label.language)` of its first label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    /// Storage identifier, assigned once persisted.
    pub id: Option<Uuid>,
    /// Stable dereferenced URI, when the concept was resolved against an
    /// external vocabulary.
    pub uri: Option<String>,
    /// Labels known for this concept across languages.
    pub labels: Vec<Label>,
}

impl Concept {
    /// A stub concept carrying only a URI and whatever label was available
    /// at harvest time, used when the external dereferencer (a collaborator
    /// outside this crate's scope) fails.
    pub fn stub(uri: String, label: Option<Label>) -> Self {
        Self {
            id: None,
            uri: Some(uri),
            labels: label.into_iter().collect(),
        }
    }

    /// A concept known only by one or more free-text labels, with no URI.
    pub fn unresolved(labels: Vec<Label>) -> Self {
        Self {
            id: None,
            uri: None,
            labels,
        }
    }

    /// The reconciliation key for this concept: its URI when present,
    /// otherwise the `(value, language)` of its first label.
    pub fn reconciliation_key(&self) -> Option<ConceptKey> {
        if let Some(uri) = &self.uri {
            return Some(ConceptKey::Uri(uri.clone()));
        }
        self.labels
            .first()
            .map(|l| ConceptKey::Label(l.value.clone(), l.language.clone()))
    }
}

/// The key `refharvest-reconciliation` looks a concept up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConceptKey {
    /// Looked up by dereferenced URI.
    Uri(String),
    /// Looked up by `(label value, label language)`.
    Label(String, Option<String>),
}
