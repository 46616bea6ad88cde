#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refharvest-recorder** – Compares a freshly converted [`Reference`]
//! against the last stored version for its `(harvester, source_identifier)`
//! and classifies the comparison into a typed [`ReferenceEvent`]
//! (created/updated/unchanged/deleted), persisting a new version only when
//! the classification calls for one.
//!
//! One [`Recorder`] is created per harvesting (one adapter's run within one
//! retrieval) and is responsible for two things beyond the per-record
//! comparison: idempotent redelivery (recording the same
//! `(harvesting_id, source_identifier)` twice returns the event already
//! produced instead of writing a second version or a second event), and
//! detecting references present in the previous harvest but absent from the
//! current one, emitted as `deleted` once the adapter's stream is drained.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use refharvest_store_core::{ReferenceStore, StoreError};
use refharvest_types::{Reference, ReferenceEvent, ReferenceEventType};
use uuid::Uuid;

/// Errors raised while recording a reference.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// The reference failed its own structural invariants (§3).
    #[error("invalid reference: {0}")]
    InvalidReference(#[from] refharvest_types::TypesError),
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenience alias for fallible recorder operations.
pub type RecorderResult<T> = Result<T, RecorderError>;

/// Records classified reference events for one harvesting run.
pub struct Recorder {
    store: Arc<dyn ReferenceStore>,
    harvesting_id: Uuid,
    event_filter: Option<HashSet<ReferenceEventType>>,
    /// `source_identifier -> already-produced event`, both for redelivery
    /// idempotence and to know which source identifiers were seen this run
    /// (so `finish` can diff against the prior harvest).
    seen: DashMap<String, ReferenceEvent>,
}

impl Recorder {
    /// Create a recorder for `harvesting_id`, emitting every event type.
    pub fn new(store: Arc<dyn ReferenceStore>, harvesting_id: Uuid) -> Self {
        Self {
            store,
            harvesting_id,
            event_filter: None,
            seen: DashMap::new(),
        }
    }

    /// Create a recorder that only *returns* events of the given types from
    /// [`Recorder::record`] and [`Recorder::finish`] (every reference is
    /// still compared and persisted regardless of this filter - `events`
    /// steers what the retrieval publishes, not what it records).
    pub fn with_event_filter(store: Arc<dyn ReferenceStore>, harvesting_id: Uuid, events: Vec<ReferenceEventType>) -> Self {
        Self {
            store,
            harvesting_id,
            event_filter: if events.is_empty() { None } else { Some(events.into_iter().collect()) },
            seen: DashMap::new(),
        }
    }

    /// Compare `new_ref` against the last stored version for its
    /// `(harvester, source_identifier)` and classify, persist, and record
    /// the resulting event (§4.3). `enhanced` signals that an ancillary
    /// fact changed without any hash-participating field changing.
    ///
    /// Returns `Ok(None)` when the event was classified and persisted but
    /// filtered out of the caller-visible stream by `events` options, or
    /// when this exact `(harvesting_id, source_identifier)` was already
    /// recorded earlier in this run (redelivery).
    pub async fn record(&self, new_ref: Reference, enhanced: bool) -> RecorderResult<Option<ReferenceEvent>> {
        new_ref.validate()?;

        if let Some(prior) = self.seen.get(&new_ref.source_identifier) {
            tracing::debug!(
                source_identifier = %new_ref.source_identifier,
                "duplicate delivery for this harvesting, returning previously recorded event"
            );
            return Ok(self.filtered(prior.clone()));
        }

        let previous = self
            .store
            .latest_reference(&new_ref.harvester, &new_ref.source_identifier)
            .await?;

        let (to_persist, event_type, reference_for_event) = match &previous {
            None => (Some(new_ref.clone()), ReferenceEventType::Created, None),
            Some(prev) if prev.hash == new_ref.hash && !enhanced => (None, ReferenceEventType::Unchanged, Some(prev.clone())),
            Some(prev) if prev.hash == new_ref.hash && enhanced => {
                let mut bumped = new_ref.clone();
                bumped.version = prev.version + 1;
                (Some(bumped), ReferenceEventType::Unchanged, None)
            }
            Some(prev) => {
                let mut bumped = new_ref.clone();
                bumped.version = prev.version + 1;
                (Some(bumped), ReferenceEventType::Updated, None)
            }
        };

        let recorded_reference = match to_persist {
            Some(reference) => self.store.insert_reference_version(&reference).await?,
            None => reference_for_event.expect("unchanged-without-persist always carries the old row"),
        };

        let event = ReferenceEvent {
            id: None,
            harvesting_id: self.harvesting_id,
            event_type,
            reference: Some(recorded_reference),
            enhanced,
            occurred_at: Utc::now(),
        };
        let stored_event = self.store.record_event(&event).await?;
        self.seen.insert(new_ref.source_identifier.clone(), stored_event.clone());

        Ok(self.filtered(stored_event))
    }

    /// After the adapter's stream has been fully drained, emit `deleted`
    /// events for every `source_identifier` previously known for
    /// `harvester` that was not seen during this run.
    pub async fn finish(&self, harvester: &str) -> RecorderResult<Vec<ReferenceEvent>> {
        let known = self.store.known_source_identifiers(harvester).await?;
        let mut deletions = Vec::new();

        for source_identifier in known {
            if self.seen.contains_key(&source_identifier) {
                continue;
            }
            let Some(previous) = self.store.latest_reference(harvester, &source_identifier).await? else {
                continue;
            };
            let event = ReferenceEvent {
                id: None,
                harvesting_id: self.harvesting_id,
                event_type: ReferenceEventType::Deleted,
                reference: Some(previous),
                enhanced: false,
                occurred_at: Utc::now(),
            };
            let stored = self.store.record_event(&event).await?;
            self.seen.insert(source_identifier, stored.clone());
            if let Some(visible) = self.filtered(stored) {
                deletions.push(visible);
            }
        }

        Ok(deletions)
    }

    fn filtered(&self, event: ReferenceEvent) -> Option<ReferenceEvent> {
        match &self.event_filter {
            Some(allowed) if !allowed.contains(&event.event_type) => None,
            _ => Some(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refharvest_store_memory::MemoryStore;
    use semver::Version;

    fn reference(source_identifier: &str, hash: &str, title: &str) -> Reference {
        Reference {
            id: None,
            harvester: "hal".into(),
            harvester_version: Version::new(1, 0, 0),
            source_identifier: source_identifier.into(),
            hash: hash.into(),
            version: 1,
            titles: vec![title.into()],
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

    fn store() -> Arc<dyn ReferenceStore> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn first_sighting_is_created_with_version_one() {
        let recorder = Recorder::new(store(), Uuid::new_v4());
        let event = recorder.record(reference("doc-1", "h1", "Title"), false).await.unwrap().unwrap();
        assert_eq!(event.event_type, ReferenceEventType::Created);
        assert_eq!(event.reference.unwrap().version, 1);
    }

    #[tokio::test]
    async fn same_hash_next_run_is_unchanged_without_new_row() {
        let s = store();
        let first_harvesting = Uuid::new_v4();
        Recorder::new(s.clone(), first_harvesting)
            .record(reference("doc-1", "h1", "Title"), false)
            .await
            .unwrap();

        let second = Recorder::new(s.clone(), Uuid::new_v4());
        let event = second.record(reference("doc-1", "h1", "Title"), false).await.unwrap().unwrap();
        assert_eq!(event.event_type, ReferenceEventType::Unchanged);
        assert_eq!(event.reference.unwrap().version, 1);
    }

    #[tokio::test]
    async fn changed_hash_is_updated_with_incremented_version() {
        let s = store();
        Recorder::new(s.clone(), Uuid::new_v4())
            .record(reference("doc-1", "h1", "Title"), false)
            .await
            .unwrap();

        let second = Recorder::new(s.clone(), Uuid::new_v4());
        let event = second.record(reference("doc-1", "h2", "New title"), false).await.unwrap().unwrap();
        assert_eq!(event.event_type, ReferenceEventType::Updated);
        assert_eq!(event.reference.unwrap().version, 2);
    }

    #[tokio::test]
    async fn enhanced_unchanged_still_persists_a_new_version() {
        let s = store();
        Recorder::new(s.clone(), Uuid::new_v4())
            .record(reference("doc-1", "h1", "Title"), false)
            .await
            .unwrap();

        let second = Recorder::new(s.clone(), Uuid::new_v4());
        let event = second.record(reference("doc-1", "h1", "Title"), true).await.unwrap().unwrap();
        assert_eq!(event.event_type, ReferenceEventType::Unchanged);
        assert!(event.enhanced);
        assert_eq!(event.reference.unwrap().version, 2);
    }

    #[tokio::test]
    async fn redelivery_within_one_harvesting_does_not_duplicate_events() {
        let recorder = Recorder::new(store(), Uuid::new_v4());
        let first = recorder.record(reference("doc-1", "h1", "Title"), false).await.unwrap().unwrap();
        let second = recorder.record(reference("doc-1", "h1", "Title"), false).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn missing_reference_on_finish_yields_deleted_event() {
        let s = store();
        let harvester = "hal";
        let first_run = Recorder::new(s.clone(), Uuid::new_v4());
        first_run.record(reference("doc-1", "h1", "Title"), false).await.unwrap();
        first_run.finish(harvester).await.unwrap();

        let second_run = Recorder::new(s.clone(), Uuid::new_v4());
        let deletions = second_run.finish(harvester).await.unwrap();
        assert_eq!(deletions.len(), 1);
        assert_eq!(deletions[0].event_type, ReferenceEventType::Deleted);
    }

    #[tokio::test]
    async fn event_filter_suppresses_unwanted_types_but_still_persists() {
        let s = store();
        let recorder = Recorder::with_event_filter(s.clone(), Uuid::new_v4(), vec![ReferenceEventType::Updated]);
        let suppressed = recorder.record(reference("doc-1", "h1", "Title"), false).await.unwrap();
        assert!(suppressed.is_none());

        let latest = s.latest_reference("hal", "doc-1").await.unwrap();
        assert!(latest.is_some());
    }
}
