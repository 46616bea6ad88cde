#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refharvest-store-memory** – In-memory storage driver for the reference
//! harvesting orchestrator.
//!
//! This crate provides a fast, non-persistent implementation of
//! `refharvest_store_core::ReferenceStore`, suitable for unit and
//! integration tests that need a storage backend without standing up
//! Postgres. All data is lost when the process terminates.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use refharvest_store_core::{ReferenceStore, StoreError, StoreResult};
use refharvest_types::{
    Book, Concept, ConceptKey, Contributor, ContributorKey, DocumentTypeRecord, Entity, Harvesting,
    Identifier, Issue, Journal, Organization, Reference, ReferenceEvent, ReferenceEventType, Retrieval,
};
use uuid::Uuid;

type SourceKey = (String, String);

/// An in-memory, non-persistent implementation of `ReferenceStore`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: DashMap<Uuid, Entity>,
    contributors: DashMap<ContributorKey, Contributor>,
    concepts: DashMap<ConceptKey, Concept>,
    organizations: DashMap<Uuid, Organization>,
    journals: DashMap<SourceKey, Journal>,
    issues: DashMap<SourceKey, Issue>,
    books: DashMap<SourceKey, Book>,
    document_types: DashMap<SourceKey, DocumentTypeRecord>,
    references: DashMap<SourceKey, Vec<Reference>>,
    events: DashMap<Uuid, ReferenceEvent>,
    retrievals: DashMap<Uuid, Retrieval>,
    harvestings: DashMap<Uuid, Harvesting>,
    last_event_type: DashMap<SourceKey, ReferenceEventType>,
    next_version: AtomicU32,
}

impl MemoryStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of entities currently stored, for test assertions.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    fn source_key(source: &str, source_identifier: &str) -> SourceKey {
        (source.to_string(), source_identifier.to_string())
    }
}

#[async_trait]
impl ReferenceStore for MemoryStore {
    async fn find_entity_by_identifier(&self, identifier: &Identifier) -> StoreResult<Option<Entity>> {
        Ok(self
            .entities
            .iter()
            .find(|e| e.identifiers.iter().any(|id| id == identifier))
            .map(|e| e.clone()))
    }

    async fn insert_entity(&self, entity: &Entity) -> StoreResult<Entity> {
        let clashes = entity.identifiers.iter().any(|id| {
            self.entities
                .iter()
                .any(|existing| existing.identifiers.iter().any(|other| other == id))
        });
        if clashes {
            return Err(StoreError::UniqueViolation("entity identifier already registered".into()));
        }
        let mut stored = entity.clone();
        let id = stored.id.unwrap_or_else(Uuid::new_v4);
        stored.id = Some(id);
        self.entities.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_contributor(&self, key: &ContributorKey) -> StoreResult<Option<Contributor>> {
        Ok(self.contributors.get(key).map(|c| c.clone()))
    }

    async fn insert_contributor(&self, contributor: &Contributor) -> StoreResult<Contributor> {
        let key = contributor.reconciliation_key();
        if self.contributors.contains_key(&key) {
            return Err(StoreError::UniqueViolation(format!("contributor {key:?} already exists")));
        }
        let mut stored = contributor.clone();
        stored.id.get_or_insert_with(Uuid::new_v4);
        self.contributors.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update_contributor(&self, contributor: &Contributor) -> StoreResult<()> {
        let key = contributor.reconciliation_key();
        self.contributors.insert(key, contributor.clone());
        Ok(())
    }

    async fn find_concept(&self, key: &ConceptKey) -> StoreResult<Option<Concept>> {
        Ok(self.concepts.get(key).map(|c| c.clone()))
    }

    async fn insert_concept(&self, concept: &Concept) -> StoreResult<Concept> {
        if let Some(key) = concept.reconciliation_key() {
            if self.concepts.contains_key(&key) {
                return Err(StoreError::UniqueViolation(format!("concept {key:?} already exists")));
            }
            let mut stored = concept.clone();
            stored.id.get_or_insert_with(Uuid::new_v4);
            self.concepts.insert(key, stored.clone());
            Ok(stored)
        } else {
            let mut stored = concept.clone();
            stored.id.get_or_insert_with(Uuid::new_v4);
            Ok(stored)
        }
    }

    async fn find_organization_sharing_identifier(
        &self,
        candidate: &Organization,
    ) -> StoreResult<Option<Organization>> {
        Ok(self
            .organizations
            .iter()
            .find(|o| o.shares_identifier_with(candidate))
            .map(|o| o.clone()))
    }

    async fn insert_organization(&self, organization: &Organization) -> StoreResult<Organization> {
        let mut stored = organization.clone();
        let id = stored.id.unwrap_or_else(Uuid::new_v4);
        stored.id = Some(id);
        self.organizations.insert(id, stored.clone());
        Ok(stored)
    }

    async fn merge_organization_identifiers(
        &self,
        organization_id: Uuid,
        identifiers: &[Identifier],
    ) -> StoreResult<()> {
        let mut entry = self
            .organizations
            .get_mut(&organization_id)
            .ok_or_else(|| StoreError::NotFound(format!("organization {organization_id}")))?;
        for identifier in identifiers {
            if !entry.identifiers.contains(identifier) {
                entry.identifiers.push(identifier.clone());
            }
        }
        Ok(())
    }

    async fn find_journal(&self, source: &str, source_identifier: &str) -> StoreResult<Option<Journal>> {
        Ok(self.journals.get(&Self::source_key(source, source_identifier)).map(|j| j.clone()))
    }

    async fn insert_journal(&self, journal: &Journal) -> StoreResult<Journal> {
        let key = Self::source_key(&journal.source, journal.source_identifier.as_deref().unwrap_or_default());
        let mut stored = journal.clone();
        stored.id.get_or_insert_with(Uuid::new_v4);
        self.journals.insert(key, stored.clone());
        Ok(stored)
    }

    async fn find_issue(&self, source: &str, source_identifier: &str) -> StoreResult<Option<Issue>> {
        Ok(self.issues.get(&Self::source_key(source, source_identifier)).map(|i| i.clone()))
    }

    async fn insert_issue(&self, issue: &Issue) -> StoreResult<Issue> {
        let key = Self::source_key(&issue.source, issue.source_identifier.as_deref().unwrap_or_default());
        let mut stored = issue.clone();
        stored.id.get_or_insert_with(Uuid::new_v4);
        self.issues.insert(key, stored.clone());
        Ok(stored)
    }

    async fn find_book(&self, source: &str, source_identifier: &str) -> StoreResult<Option<Book>> {
        Ok(self.books.get(&Self::source_key(source, source_identifier)).map(|b| b.clone()))
    }

    async fn insert_book(&self, book: &Book) -> StoreResult<Book> {
        let key = Self::source_key(&book.source, book.source_identifier.as_deref().unwrap_or_default());
        let mut stored = book.clone();
        stored.id.get_or_insert_with(Uuid::new_v4);
        self.books.insert(key, stored.clone());
        Ok(stored)
    }

    async fn find_document_type(
        &self,
        source: &str,
        source_identifier: &str,
    ) -> StoreResult<Option<DocumentTypeRecord>> {
        Ok(self
            .document_types
            .get(&Self::source_key(source, source_identifier))
            .map(|d| d.clone()))
    }

    async fn insert_document_type(&self, document_type: &DocumentTypeRecord) -> StoreResult<DocumentTypeRecord> {
        let key = Self::source_key(
            &document_type.source,
            document_type.source_identifier.as_deref().unwrap_or_default(),
        );
        let mut stored = document_type.clone();
        stored.id.get_or_insert_with(Uuid::new_v4);
        self.document_types.insert(key, stored.clone());
        Ok(stored)
    }

    async fn latest_reference(&self, harvester: &str, source_identifier: &str) -> StoreResult<Option<Reference>> {
        Ok(self
            .references
            .get(&Self::source_key(harvester, source_identifier))
            .and_then(|versions| versions.last().cloned()))
    }

    async fn insert_reference_version(&self, reference: &Reference) -> StoreResult<Reference> {
        reference.validate().map_err(|e| StoreError::Backend(e.into()))?;
        let key = Self::source_key(&reference.harvester, &reference.source_identifier);
        let mut stored = reference.clone();
        stored.id.get_or_insert_with(Uuid::new_v4);
        self.references.entry(key).or_default().push(stored.clone());
        self.next_version.fetch_add(1, Ordering::Relaxed);
        Ok(stored)
    }

    async fn record_event(&self, event: &ReferenceEvent) -> StoreResult<ReferenceEvent> {
        let mut stored = event.clone();
        let id = stored.id.unwrap_or_else(Uuid::new_v4);
        stored.id = Some(id);
        if let Some(reference) = &stored.reference {
            let key = Self::source_key(&reference.harvester, &reference.source_identifier);
            self.last_event_type.insert(key, stored.event_type);
        }
        self.events.insert(id, stored.clone());
        Ok(stored)
    }

    async fn known_source_identifiers(&self, harvester: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .references
            .iter()
            .filter(|entry| entry.key().0 == harvester)
            .map(|entry| entry.key().1.clone())
            .filter(|source_identifier| {
                !matches!(
                    self.last_event_type.get(&Self::source_key(harvester, source_identifier)).map(|v| *v),
                    Some(ReferenceEventType::Deleted)
                )
            })
            .collect())
    }

    async fn insert_retrieval(&self, retrieval: &Retrieval) -> StoreResult<Retrieval> {
        let mut stored = retrieval.clone();
        let id = stored.id.unwrap_or_else(Uuid::new_v4);
        stored.id = Some(id);
        self.retrievals.insert(id, stored.clone());
        Ok(stored)
    }

    async fn insert_harvesting(&self, harvesting: &Harvesting) -> StoreResult<Harvesting> {
        let mut stored = harvesting.clone();
        let id = stored.id.unwrap_or_else(Uuid::new_v4);
        stored.id = Some(id);
        self.harvestings.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_harvesting(&self, harvesting: &Harvesting) -> StoreResult<()> {
        let id = harvesting
            .id
            .ok_or_else(|| StoreError::NotFound("harvesting has no id".into()))?;
        self.harvestings.insert(id, harvesting.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refharvest_types::{Entity, EntityKind, PersonName};
    use semver::Version;

    fn person(first: &str, last: &str, idref: &str) -> Entity {
        Entity {
            id: None,
            kind: EntityKind::Person,
            name: PersonName {
                first_name: Some(first.into()),
                last_name: Some(last.into()),
            },
            identifiers: vec![Identifier::trusted("idref", idref)],
        }
    }

    #[tokio::test]
    async fn insert_then_find_entity_by_identifier() {
        let store = MemoryStore::new();
        let entity = person("Jane", "Doe", "123");
        store.insert_entity(&entity).await.unwrap();

        let found = store
            .find_entity_by_identifier(&Identifier::trusted("idref", "123"))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn insert_entity_rejects_identifier_clash() {
        let store = MemoryStore::new();
        store.insert_entity(&person("Jane", "Doe", "123")).await.unwrap();
        let result = store.insert_entity(&person("Janet", "Doe", "123")).await;
        assert!(matches!(result, Err(StoreError::UniqueViolation(_))));
    }

    #[tokio::test]
    async fn reference_versions_accumulate_and_latest_wins() {
        let store = MemoryStore::new();
        let mut r = Reference {
            id: None,
            harvester: "hal".into(),
            harvester_version: Version::new(1, 0, 0),
            source_identifier: "doc-1".into(),
            hash: "h1".into(),
            version: 1,
            titles: vec!["T1".into()],
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
        };
        store.insert_reference_version(&r).await.unwrap();
        r.hash = "h2".into();
        r.version = 2;
        store.insert_reference_version(&r).await.unwrap();

        let latest = store.latest_reference("hal", "doc-1").await.unwrap().unwrap();
        assert_eq!(latest.hash, "h2");
    }

    #[tokio::test]
    async fn organization_merging_extends_identifiers() {
        let store = MemoryStore::new();
        let org = Organization {
            id: None,
            source: "hal".into(),
            source_identifier: Some("1".into()),
            name: "Org".into(),
            identifiers: vec![Identifier::trusted("ror", "x")],
        };
        let stored = store.insert_organization(&org).await.unwrap();
        store
            .merge_organization_identifiers(stored.id.unwrap(), &[Identifier::trusted("idref", "y")])
            .await
            .unwrap();

        let found = store
            .find_organization_sharing_identifier(&Organization {
                identifiers: vec![Identifier::trusted("idref", "y")],
                ..org
            })
            .await
            .unwrap();
        assert!(found.is_some());
    }
}
