use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Identifier;

/// A research organization (university, lab, funder) affiliated with a
/// contribution. Uniqueness is by `(source, source_identifier)`; when an
/// incoming organization matches an existing one by *any* identifier but
/// carries more identifiers, the existing row is extended rather than
/// replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Storage identifier, assigned once persisted.
    pub id: Option<Uuid>,
    /// The harvester source this record came from.
    pub source: String,
    /// The organization's identifier within `source`.
    pub source_identifier: Option<String>,
    /// Display name.
    pub name: String,
    /// All identifiers known for this organization (ROR, IdRef, ...).
    pub identifiers: Vec<Identifier>,
}

impl Organization {
    /// Whether `self` and `other` share at least one `(type, value)`
    /// identifier, the trigger condition for organization merging.
    pub fn shares_identifier_with(&self, other: &Organization) -> bool {
        self.identifiers.iter().any(|a| other.identifiers.iter().any(|b| a == b))
    }
}

/// A journal a reference (or one of its issues) was published in. Uniqueness
/// is by `(source, source_identifier)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    /// Storage identifier, assigned once persisted.
    pub id: Option<Uuid>,
    /// The harvester source this record came from.
    pub source: String,
    /// The journal's identifier within `source`.
    pub source_identifier: Option<String>,
    /// Journal title(s), a journal may have changed its title over time.
    pub titles: Vec<String>,
    /// ISSNs known for this journal.
    pub issn: Vec<String>,
}

/// A specific issue of a `Journal` a reference was published in. Uniqueness
/// is by `(source, source_identifier)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Storage identifier, assigned once persisted.
    pub id: Option<Uuid>,
    /// The harvester source this record came from.
    pub source: String,
    /// The issue's identifier within `source`.
    pub source_identifier: Option<String>,
    /// Volume label, when known.
    pub volume: Option<String>,
    /// Issue number label, when known.
    pub number: Option<String>,
    /// The journal this issue belongs to.
    pub journal: Option<Journal>,
}

/// A book a reference (typically a book chapter) belongs to. Uniqueness is
/// by `(source, source_identifier)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Storage identifier, assigned once persisted.
    pub id: Option<Uuid>,
    /// The harvester source this record came from.
    pub source: String,
    /// The book's identifier within `source`.
    pub source_identifier: Option<String>,
    /// Book title(s).
    pub titles: Vec<String>,
    /// ISBNs known for this book.
    pub isbn: Vec<String>,
}

/// A bibliographic document type (article, book chapter, thesis, ...) as
/// classified by a harvester source. Uniqueness is by
/// `(source, source_identifier)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTypeRecord {
    /// Storage identifier, assigned once persisted.
    pub id: Option<Uuid>,
    /// The harvester source this record came from.
    pub source: String,
    /// The document type's identifier within `source`.
    pub source_identifier: Option<String>,
    /// Human-readable label.
    pub label: String,
    /// Dereferenced URI, when the source maps document types to a
    /// vocabulary (e.g. COAR resource types).
    pub uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_identifier_with_detects_overlap() {
        let a = Organization {
            id: None,
            source: "hal".into(),
            source_identifier: Some("1".into()),
            name: "A".into(),
            identifiers: vec![Identifier::trusted("ror", "x")],
        };
        let b = Organization {
            id: None,
            source: "scanr".into(),
            source_identifier: Some("2".into()),
            name: "A bis".into(),
            identifiers: vec![Identifier::trusted("ror", "x"), Identifier::trusted("idref", "y")],
        };
        assert!(a.shares_identifier_with(&b));
    }
}
