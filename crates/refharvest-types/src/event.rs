use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Reference;

/// How a freshly converted reference compared against the last stored
/// version for the same `(harvester, source_identifier)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceEventType {
    /// No prior version existed for this `(harvester, source_identifier)`.
    Created,
    /// A prior version existed and its hash differs from the new one.
    Updated,
    /// A prior version existed with the same hash; no new version recorded.
    Unchanged,
    /// The harvester reported this reference no longer exists at the
    /// source.
    Deleted,
}

/// The outcome of recording one converted reference: which event type was
/// classified, the reference as recorded (its latest version), and whether
/// concept/contributor enhancement ran to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEvent {
    /// Storage identifier, assigned once persisted.
    pub id: Option<Uuid>,
    /// The harvesting this event was produced by.
    pub harvesting_id: Uuid,
    /// Which kind of change this event represents.
    pub event_type: ReferenceEventType,
    /// The reference as recorded (absent only for a `Deleted` event for a
    /// reference that was never actually stored).
    pub reference: Option<Reference>,
    /// Whether subject/contributor/organization enhancement completed for
    /// this reference. `false` means the raw converted reference was
    /// recorded but enrichment (concept dereferencing, contributor
    /// reconciliation) did not finish, and may be retried.
    pub enhanced: bool,
    /// When this event was produced.
    pub occurred_at: DateTime<Utc>,
}

impl ReferenceEvent {
    /// Classify the comparison between `previous` (the last stored version
    /// for this `(harvester, source_identifier)`, if any) and `incoming`
    /// (the freshly converted reference), returning the event type.
    pub fn classify(previous: Option<&Reference>, incoming: &Reference) -> ReferenceEventType {
        match previous {
            None => ReferenceEventType::Created,
            Some(prev) if prev.hash == incoming.hash => ReferenceEventType::Unchanged,
            Some(_) => ReferenceEventType::Updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    fn reference(hash: &str) -> Reference {
        Reference {
            id: None,
            harvester: "hal".into(),
            harvester_version: Version::new(1, 0, 0),
            source_identifier: "doc-1".into(),
            hash: hash.into(),
            version: 1,
            titles: vec!["T".into()],
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
    fn no_previous_is_created() {
        assert_eq!(
            ReferenceEvent::classify(None, &reference("a")),
            ReferenceEventType::Created
        );
    }

    #[test]
    fn same_hash_is_unchanged() {
        assert_eq!(
            ReferenceEvent::classify(Some(&reference("a")), &reference("a")),
            ReferenceEventType::Unchanged
        );
    }

    #[test]
    fn different_hash_is_updated() {
        assert_eq!(
            ReferenceEvent::classify(Some(&reference("a")), &reference("b")),
            ReferenceEventType::Updated
        );
    }
}
