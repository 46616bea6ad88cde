#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refharvest-store-core** – Core storage abstractions for the reference
//! harvesting orchestrator.
//!
//! This crate defines the persistence contract every storage backend
//! (Postgres, in-memory) must satisfy, without committing to a concrete
//! implementation. It sits at the core layer: concrete drivers depend on it,
//! and every crate that needs to persist or look up bibliographic data
//! depends only on this trait, never on a specific backend crate.

use async_trait::async_trait;
use refharvest_types::{
    Book, Concept, ConceptKey, Contributor, ContributorKey, DocumentTypeRecord, Entity, Harvesting,
    Identifier, Issue, Journal, Organization, Reference, ReferenceEvent, Retrieval,
};

/// Errors raised by a storage backend.
///
/// `UniqueViolation` is distinguished from the generic `Backend` case because
/// `refharvest-reconciliation` relies on it to drive its
/// lookup-then-insert-with-retry loop: a concurrent writer winning the race
/// to insert an entity, contributor, or concept is an expected outcome, not
/// a fault.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected a write because it would violate a uniqueness
    /// constraint (e.g. two concurrent retrievals both creating the same
    /// contributor by `(source, source_identifier)`).
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    /// A requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Any other backend failure (connection loss, malformed row, I/O).
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Convenience alias for fallible storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The full persistence contract for the bibliographic data model.
///
/// Every method here corresponds to one lookup or write the orchestrator,
/// reconciliation, or recorder components need; none of them assume a
/// particular SQL dialect or connection pool shape, so an in-memory
/// implementation (used in tests) and a Postgres-backed one can satisfy the
/// same trait object.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Find the entity (currently always a person) carrying `identifier`,
    /// if one has been persisted.
    async fn find_entity_by_identifier(&self, identifier: &Identifier) -> StoreResult<Option<Entity>>;

    /// Insert a new entity. Returns `StoreError::UniqueViolation` if an
    /// entity with one of its identifiers already exists.
    async fn insert_entity(&self, entity: &Entity) -> StoreResult<Entity>;

    /// Look up a contributor by its reconciliation key.
    async fn find_contributor(&self, key: &ContributorKey) -> StoreResult<Option<Contributor>>;

    /// Insert a new contributor. Returns `StoreError::UniqueViolation` on a
    /// racing insert for the same key.
    async fn insert_contributor(&self, contributor: &Contributor) -> StoreResult<Contributor>;

    /// Persist an update to an already-stored contributor (e.g. after
    /// recording name drift).
    async fn update_contributor(&self, contributor: &Contributor) -> StoreResult<()>;

    /// Look up a concept by its reconciliation key.
    async fn find_concept(&self, key: &ConceptKey) -> StoreResult<Option<Concept>>;

    /// Insert a new concept. Returns `StoreError::UniqueViolation` on a
    /// racing insert for the same key.
    async fn insert_concept(&self, concept: &Concept) -> StoreResult<Concept>;

    /// Find an organization sharing at least one identifier with
    /// `candidate`, the trigger condition for organization merging.
    async fn find_organization_sharing_identifier(
        &self,
        candidate: &Organization,
    ) -> StoreResult<Option<Organization>>;

    /// Insert a new organization.
    async fn insert_organization(&self, organization: &Organization) -> StoreResult<Organization>;

    /// Extend an existing organization's identifier set (organization
    /// merging), leaving its other fields untouched.
    async fn merge_organization_identifiers(
        &self,
        organization_id: uuid::Uuid,
        identifiers: &[Identifier],
    ) -> StoreResult<()>;

    /// Find a journal by `(source, source_identifier)`.
    async fn find_journal(&self, source: &str, source_identifier: &str) -> StoreResult<Option<Journal>>;

    /// Insert a new journal.
    async fn insert_journal(&self, journal: &Journal) -> StoreResult<Journal>;

    /// Find an issue by `(source, source_identifier)`.
    async fn find_issue(&self, source: &str, source_identifier: &str) -> StoreResult<Option<Issue>>;

    /// Insert a new issue.
    async fn insert_issue(&self, issue: &Issue) -> StoreResult<Issue>;

    /// Find a book by `(source, source_identifier)`.
    async fn find_book(&self, source: &str, source_identifier: &str) -> StoreResult<Option<Book>>;

    /// Insert a new book.
    async fn insert_book(&self, book: &Book) -> StoreResult<Book>;

    /// Find a document type by `(source, source_identifier)`.
    async fn find_document_type(
        &self,
        source: &str,
        source_identifier: &str,
    ) -> StoreResult<Option<DocumentTypeRecord>>;

    /// Insert a new document type.
    async fn insert_document_type(&self, document_type: &DocumentTypeRecord) -> StoreResult<DocumentTypeRecord>;

    /// Fetch the latest stored version of the reference keyed by
    /// `(harvester, source_identifier)`, if one exists.
    async fn latest_reference(
        &self,
        harvester: &str,
        source_identifier: &str,
    ) -> StoreResult<Option<Reference>>;

    /// The `source_identifier`s of every reference previously recorded for
    /// `harvester`, most-recent version only, excluding references whose
    /// latest event was already `Deleted`. `refharvest-recorder` uses this
    /// to detect references that vanished from the current harvest.
    async fn known_source_identifiers(&self, harvester: &str) -> StoreResult<Vec<String>>;

    /// Append a new version of a reference. Callers are responsible for
    /// incrementing `Reference::version` relative to the prior version.
    async fn insert_reference_version(&self, reference: &Reference) -> StoreResult<Reference>;

    /// Record a classified reference event.
    async fn record_event(&self, event: &ReferenceEvent) -> StoreResult<ReferenceEvent>;

    /// Persist a newly registered retrieval.
    async fn insert_retrieval(&self, retrieval: &Retrieval) -> StoreResult<Retrieval>;

    /// Persist a newly registered harvesting.
    async fn insert_harvesting(&self, harvesting: &Harvesting) -> StoreResult<Harvesting>;

    /// Persist a harvesting's updated state and counters.
    async fn update_harvesting(&self, harvesting: &Harvesting) -> StoreResult<()>;
}
