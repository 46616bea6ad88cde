use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Book, Concept, Contribution, DocumentTypeRecord, Identifier, Issue, Result, TypesError};

/// A concrete manifestation of a reference (a particular print or digital
/// form it is available in): a page range, a resolvable URL, and/or a
/// manifestation type label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifestation {
    /// Page range, when known (e.g. `"12-34"`).
    pub page: Option<String>,
    /// A resolvable URL for this manifestation.
    pub url: Option<String>,
    /// Manifestation type label (e.g. `"print"`, `"electronic"`).
    pub manifestation_type: Option<String>,
}

/// A normalised publication record, the central unit the orchestrator
/// fetches, hashes, compares, and persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// Storage identifier, assigned once persisted.
    pub id: Option<Uuid>,
    /// The harvester this reference came from, e.g. `"hal"`.
    pub harvester: String,
    /// The semver of the harvester/converter that produced this reference.
    pub harvester_version: semver::Version,
    /// This reference's identifier within `harvester`, unique per harvester.
    pub source_identifier: String,
    /// Lower-case hex content digest, see `refharvest-hash`.
    pub hash: String,
    /// Monotonically increasing version number per
    /// `(harvester, source_identifier)`.
    pub version: u32,
    /// Title(s) in one or more languages.
    pub titles: Vec<String>,
    /// Subtitle(s), possibly empty.
    pub subtitles: Vec<String>,
    /// Abstract text(s), possibly empty.
    pub abstracts: Vec<String>,
    /// Subject concepts, possibly empty.
    pub subjects: Vec<Concept>,
    /// Authorship / contribution graph.
    pub contributions: Vec<Contribution>,
    /// Document type classification(s), possibly empty.
    pub document_type: Vec<DocumentTypeRecord>,
    /// Identifiers for the reference itself (DOI, PubMed ID, ...).
    pub identifiers: Vec<Identifier>,
    /// Known manifestations of this reference.
    pub manifestations: Vec<Manifestation>,
    /// The issue this reference was published in, for journal articles.
    pub issue: Option<Issue>,
    /// The book this reference belongs to, for book chapters.
    pub book: Option<Book>,
    /// Free-text page reference when not captured in a manifestation.
    pub page: Option<String>,
    /// Record creation date at the source, when known.
    pub created: Option<DateTime<Utc>>,
    /// Parsed publication date, when the source's date string could be
    /// parsed.
    pub issued: Option<NaiveDate>,
    /// The raw, unparsed publication date string as reported by the source.
    pub raw_issued: Option<String>,
}

impl Reference {
    /// Validate the structural invariants: `harvester` non-blank, at least
    /// one title, `source_identifier` non-blank. The remaining list-typed
    /// fields are allowed to be empty but must have been constructed
    /// (Rust's `Vec` can't be null, so that half of the invariant is
    /// guaranteed by the type itself).
    pub fn validate(&self) -> Result<()> {
        if self.harvester.trim().is_empty() {
            return Err(TypesError::InvalidReference("harvester must not be blank".into()));
        }
        if self.source_identifier.trim().is_empty() {
            return Err(TypesError::InvalidReference(
                "source_identifier must not be blank".into(),
            ));
        }
        if self.titles.is_empty() {
            return Err(TypesError::InvalidReference("at least one title is required".into()));
        }
        Ok(())
    }

    /// The `(harvester, source_identifier)` key the recorder looks up prior
    /// versions by.
    pub fn recorder_key(&self) -> (String, String) {
        (self.harvester.clone(), self.source_identifier.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(harvester: &str, source_identifier: &str, title: &str) -> Reference {
        Reference {
            id: None,
            harvester: harvester.to_string(),
            harvester_version: semver::Version::new(1, 0, 0),
            source_identifier: source_identifier.to_string(),
            hash: "deadbeef".to_string(),
            version: 1,
            titles: vec![title.to_string()],
            subtitles: vec![],
            abstracts: vec![],
            subjects: vec![],
            contributions: vec![],
            document_type: vec![],
            identifiers: vec![],
            manifestations: vec![],
            issue: None,
            book: None,
            page: None,
            created: None,
            issued: None,
            raw_issued: None,
        }
    }

    #[test]
    fn validates_minimal_reference() {
        assert!(minimal("hal", "doc-1", "A title").validate().is_ok());
    }

    #[test]
    fn rejects_blank_harvester() {
        assert!(minimal("", "doc-1", "A title").validate().is_err());
    }

    #[test]
    fn rejects_reference_with_no_title() {
        let mut r = minimal("hal", "doc-1", "A title");
        r.titles.clear();
        assert!(r.validate().is_err());
    }
}
