#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refharvest-reconciliation** – Resolve-or-create reconciliation of the
//! ancillary entity graph (`Entity`, `Contributor`, `Concept`,
//! `Organization`, `Journal`, `Issue`, `Book`, `DocumentType`) against the
//! unique constraints each carries, with retry-on-conflict.
//!
//! Every reconcile operation follows the same shape: look up by the
//! strongest available key, return the existing row if found, otherwise
//! attempt to insert; on a unique-constraint violation (a concurrent writer
//! won the race) roll back and retry the lookup exactly once. A second
//! conflict on that retry is treated as a programming error - the store
//! guarantees the winning writer is now visible, so it cannot happen absent
//! a bug in this crate or the store.
//!
//! A [`ReconciliationContext`] is handed to each adapter conversion to cache
//! lookups within that one conversion, so a reference with repeated
//! contributors or concepts never issues more than one store round-trip per
//! distinct key.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use refharvest_store_core::{ReferenceStore, StoreError};
use refharvest_types::{Book, Concept, ConceptKey, Contributor, ContributorKey, DocumentTypeRecord, Entity, Identifier, Issue, Journal, Organization};

/// Errors raised while reconciling the entity graph.
#[derive(Debug, thiserror::Error)]
pub enum ReconciliationError {
    /// The underlying store failed in a way that isn't a unique-constraint
    /// race (connection loss, malformed row).
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A second unique-constraint conflict was observed on the retry
    /// lookup. The store promises the winning writer is visible by the time
    /// the retry runs, so this indicates a bug, not a transient race.
    #[error("reconciliation retry still could not find the row that won the insert race for {0}")]
    UnresolvedConflict(String),
    /// `identifiers_safe_mode` forbade merging two distinct existing
    /// entities that the incoming identifiers would otherwise have unified.
    #[error("identifiers safe mode: incoming identifiers match {0} distinct existing entities")]
    AmbiguousEntityMerge(usize),
}

/// Convenience alias for fallible reconciliation operations.
pub type ReconciliationResult<T> = Result<T, ReconciliationError>;

/// Boundary contract for resolving a subject concept against an external
/// vocabulary (JEL, Wikidata, ...). Concrete dereferencers are a
/// collaborator outside this crate's scope; this trait exists only so
/// reconciliation can fall back to a stub concept when dereferencing fails
/// or no dereferencer is configured.
#[async_trait]
pub trait ConceptDereferencer: Send + Sync {
    /// Attempt to resolve `uri` to a fully labelled concept.
    async fn dereference(&self, uri: &str) -> anyhow::Result<Option<Concept>>;
}

/// A dereferencer that never resolves anything, used when no external
/// vocabulary lookup is configured - every URI-only concept becomes a stub.
#[derive(Debug, Default)]
pub struct NoopDereferencer;

#[async_trait]
impl ConceptDereferencer for NoopDereferencer {
    async fn dereference(&self, _uri: &str) -> anyhow::Result<Option<Concept>> {
        Ok(None)
    }
}

/// Per-conversion cache of already-reconciled rows, consulted before any
/// store access. Scoped to one `convert()` call on one adapter - a fresh
/// context is created per converted reference so a busy contributor across
/// many references still gets one store round-trip each, while repeated
/// co-authors *within* one reference are deduplicated for free.
#[derive(Debug, Default)]
pub struct ReconciliationContext {
    contributors: DashMap<ContributorKey, Contributor>,
    concepts: DashMap<ConceptKey, Concept>,
    organizations: DashMap<String, Organization>,
}

impl ReconciliationContext {
    /// Create a fresh, empty context for one conversion.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Reconciles the ancillary entity graph against a [`ReferenceStore`].
pub struct Reconciler {
    store: Arc<dyn ReferenceStore>,
    dereferencer: Arc<dyn ConceptDereferencer>,
}

impl Reconciler {
    /// Build a reconciler backed by `store`, with no concept dereferencer
    /// configured (URI-only concepts always become stubs).
    pub fn new(store: Arc<dyn ReferenceStore>) -> Self {
        Self {
            store,
            dereferencer: Arc::new(NoopDereferencer),
        }
    }

    /// Build a reconciler with an explicit concept dereferencer.
    pub fn with_dereferencer(store: Arc<dyn ReferenceStore>, dereferencer: Arc<dyn ConceptDereferencer>) -> Self {
        Self { store, dereferencer }
    }

    /// Resolve or create the `Entity` matching `candidate`'s identifiers.
    ///
    /// When more than one *distinct* existing entity matches across the
    /// candidate's identifiers, `identifiers_safe_mode` decides the
    /// outcome: `true` rejects the retrieval as ambiguous (§4.6), `false`
    /// merges by returning the first match found, consistent with the
    /// source's permissive default.
    pub async fn reconcile_entity(&self, candidate: &Entity, identifiers_safe_mode: bool) -> ReconciliationResult<Entity> {
        let mut matches: Vec<Entity> = Vec::new();
        for identifier in &candidate.identifiers {
            if let Some(found) = self.store.find_entity_by_identifier(identifier).await? {
                if !matches.iter().any(|e| e.id == found.id) {
                    matches.push(found);
                }
            }
        }

        match matches.len() {
            0 => self.insert_entity_with_retry(candidate).await,
            1 => Ok(matches.into_iter().next().expect("len checked")),
            n if identifiers_safe_mode => Err(ReconciliationError::AmbiguousEntityMerge(n)),
            _ => Ok(matches.into_iter().next().expect("len checked")),
        }
    }

    async fn insert_entity_with_retry(&self, candidate: &Entity) -> ReconciliationResult<Entity> {
        match self.store.insert_entity(candidate).await {
            Ok(inserted) => Ok(inserted),
            Err(StoreError::UniqueViolation(_)) => {
                for identifier in &candidate.identifiers {
                    if let Some(found) = self.store.find_entity_by_identifier(identifier).await? {
                        return Ok(found);
                    }
                }
                Err(ReconciliationError::UnresolvedConflict("entity".into()))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Resolve or create a `Contributor`, applying name-drift tracking
    /// (§4.2) when the incoming name differs from the stored one.
    pub async fn reconcile_contributor(&self, ctx: &ReconciliationContext, candidate: Contributor) -> ReconciliationResult<Contributor> {
        let key = candidate.reconciliation_key();
        if let Some(cached) = ctx.contributors.get(&key) {
            return Ok(cached.clone());
        }

        let reconciled = match self.store.find_contributor(&key).await? {
            Some(mut existing) => {
                existing.record_name_drift(&candidate.name);
                existing.record_structured_name_drift(&candidate.first_name, &candidate.last_name);
                if existing.name != candidate.name
                    || existing.first_name != candidate.first_name
                    || existing.last_name != candidate.last_name
                {
                    existing.name = candidate.name.clone();
                    existing.first_name = candidate.first_name.clone();
                    existing.last_name = candidate.last_name.clone();
                    self.store.update_contributor(&existing).await?;
                }
                existing
            }
            None => match self.store.insert_contributor(&candidate).await {
                Ok(inserted) => inserted,
                Err(StoreError::UniqueViolation(_)) => self
                    .store
                    .find_contributor(&key)
                    .await?
                    .ok_or_else(|| ReconciliationError::UnresolvedConflict("contributor".into()))?,
                Err(other) => return Err(other.into()),
            },
        };

        ctx.contributors.insert(key, reconciled.clone());
        Ok(reconciled)
    }

    /// Resolve or create a `Concept`. URI-bearing concepts with no store
    /// hit are delegated to the configured dereferencer; on dereferencing
    /// failure (or when none is configured) a stub concept is created
    /// instead, carrying the URI and whatever label was already available.
    pub async fn reconcile_concept(&self, ctx: &ReconciliationContext, candidate: Concept) -> ReconciliationResult<Concept> {
        let Some(key) = candidate.reconciliation_key() else {
            // No URI and no labels: nothing to key on: treat as a fresh,
            // unreconciled concept local to this reference.
            return Ok(candidate);
        };
        if let Some(cached) = ctx.concepts.get(&key) {
            return Ok(cached.clone());
        }
        if let Some(existing) = self.store.find_concept(&key).await? {
            ctx.concepts.insert(key, existing.clone());
            return Ok(existing);
        }

        let to_insert = match &key {
            ConceptKey::Uri(uri) => match self.dereferencer.dereference(uri).await {
                Ok(Some(dereferenced)) => dereferenced,
                Ok(None) => candidate,
                Err(error) => {
                    tracing::warn!(uri, %error, "concept dereferencing failed, recording stub concept");
                    let label = candidate.labels.first().cloned();
                    Concept::stub(uri.clone(), label)
                }
            },
            ConceptKey::Label(..) => candidate,
        };

        let reconciled = match self.store.insert_concept(&to_insert).await {
            Ok(inserted) => inserted,
            Err(StoreError::UniqueViolation(_)) => self
                .store
                .find_concept(&key)
                .await?
                .ok_or_else(|| ReconciliationError::UnresolvedConflict("concept".into()))?,
            Err(other) => return Err(other.into()),
        };
        ctx.concepts.insert(key, reconciled.clone());
        Ok(reconciled)
    }

    /// Resolve or create an `Organization`. When an incoming organization
    /// shares any identifier with an existing one but carries more
    /// identifiers, the existing row is extended and kept canonical
    /// (§4.2 organization merging) rather than a second row being created.
    pub async fn reconcile_organization(&self, ctx: &ReconciliationContext, candidate: Organization) -> ReconciliationResult<Organization> {
        let cache_key = organization_cache_key(&candidate);
        if let Some(cached) = ctx.organizations.get(&cache_key) {
            return Ok(cached.clone());
        }

        let reconciled = match self.store.find_organization_sharing_identifier(&candidate).await? {
            Some(existing) => {
                let new_identifiers: Vec<Identifier> = candidate
                    .identifiers
                    .iter()
                    .filter(|id| !existing.identifiers.contains(id))
                    .cloned()
                    .collect();
                if !new_identifiers.is_empty() {
                    if let Some(id) = existing.id {
                        self.store.merge_organization_identifiers(id, &new_identifiers).await?;
                    }
                    let mut merged = existing;
                    merged.identifiers.extend(new_identifiers);
                    merged
                } else {
                    existing
                }
            }
            None => match self.store.insert_organization(&candidate).await {
                Ok(inserted) => inserted,
                Err(StoreError::UniqueViolation(_)) => self
                    .store
                    .find_organization_sharing_identifier(&candidate)
                    .await?
                    .ok_or_else(|| ReconciliationError::UnresolvedConflict("organization".into()))?,
                Err(other) => return Err(other.into()),
            },
        };

        ctx.organizations.insert(cache_key, reconciled.clone());
        Ok(reconciled)
    }

    /// Resolve or create a `Journal` by `(source, source_identifier)`.
    pub async fn reconcile_journal(&self, journal: Journal) -> ReconciliationResult<Journal> {
        let Some(sid) = journal.source_identifier.clone() else {
            return Ok(journal);
        };
        if let Some(existing) = self.store.find_journal(&journal.source, &sid).await? {
            return Ok(existing);
        }
        match self.store.insert_journal(&journal).await {
            Ok(inserted) => Ok(inserted),
            Err(StoreError::UniqueViolation(_)) => self
                .store
                .find_journal(&journal.source, &sid)
                .await?
                .ok_or_else(|| ReconciliationError::UnresolvedConflict("journal".into())),
            Err(other) => Err(other.into()),
        }
    }

    /// Resolve or create an `Issue` by `(source, source_identifier)`.
    pub async fn reconcile_issue(&self, issue: Issue) -> ReconciliationResult<Issue> {
        let Some(sid) = issue.source_identifier.clone() else {
            return Ok(issue);
        };
        if let Some(existing) = self.store.find_issue(&issue.source, &sid).await? {
            return Ok(existing);
        }
        match self.store.insert_issue(&issue).await {
            Ok(inserted) => Ok(inserted),
            Err(StoreError::UniqueViolation(_)) => self
                .store
                .find_issue(&issue.source, &sid)
                .await?
                .ok_or_else(|| ReconciliationError::UnresolvedConflict("issue".into())),
            Err(other) => Err(other.into()),
        }
    }

    /// Resolve or create a `Book` by `(source, source_identifier)`.
    pub async fn reconcile_book(&self, book: Book) -> ReconciliationResult<Book> {
        let Some(sid) = book.source_identifier.clone() else {
            return Ok(book);
        };
        if let Some(existing) = self.store.find_book(&book.source, &sid).await? {
            return Ok(existing);
        }
        match self.store.insert_book(&book).await {
            Ok(inserted) => Ok(inserted),
            Err(StoreError::UniqueViolation(_)) => self
                .store
                .find_book(&book.source, &sid)
                .await?
                .ok_or_else(|| ReconciliationError::UnresolvedConflict("book".into())),
            Err(other) => Err(other.into()),
        }
    }

    /// Resolve or create a `DocumentTypeRecord` by `(source, source_identifier)`.
    pub async fn reconcile_document_type(&self, document_type: DocumentTypeRecord) -> ReconciliationResult<DocumentTypeRecord> {
        let Some(sid) = document_type.source_identifier.clone() else {
            return Ok(document_type);
        };
        if let Some(existing) = self.store.find_document_type(&document_type.source, &sid).await? {
            return Ok(existing);
        }
        match self.store.insert_document_type(&document_type).await {
            Ok(inserted) => Ok(inserted),
            Err(StoreError::UniqueViolation(_)) => self
                .store
                .find_document_type(&document_type.source, &sid)
                .await?
                .ok_or_else(|| ReconciliationError::UnresolvedConflict("document_type".into())),
            Err(other) => Err(other.into()),
        }
    }
}

fn organization_cache_key(organization: &Organization) -> String {
    match &organization.source_identifier {
        Some(sid) => format!("{}\u{0}{sid}", organization.source),
        None => format!("{}\u{0}{}", organization.source, organization.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refharvest_store_memory::MemoryStore;
    use refharvest_types::{EntityKind, Identifier, PersonName};

    fn store() -> Arc<dyn ReferenceStore> {
        Arc::new(MemoryStore::new())
    }

    fn person(identifiers: Vec<Identifier>) -> Entity {
        Entity {
            id: None,
            kind: EntityKind::Person,
            name: PersonName::default(),
            identifiers,
        }
    }

    #[tokio::test]
    async fn reconciling_same_entity_twice_yields_one_row() {
        let reconciler = Reconciler::new(store());
        let candidate = person(vec![Identifier::trusted("idref", "027231313")]);

        let first = reconciler.reconcile_entity(&candidate, false).await.unwrap();
        let second = reconciler.reconcile_entity(&candidate, false).await.unwrap();

        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn contributor_is_cached_within_one_conversion() {
        let reconciler = Reconciler::new(store());
        let ctx = ReconciliationContext::new();
        let mut contributor = Contributor::new("hal", "Jane Doe").unwrap();
        contributor.source_identifier = Some("123".into());

        let first = reconciler.reconcile_contributor(&ctx, contributor.clone()).await.unwrap();
        let second = reconciler.reconcile_contributor(&ctx, contributor).await.unwrap();

        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn contributor_name_drift_is_tracked_across_conversions() {
        let reconciler = Reconciler::new(store());
        let mut first_name = Contributor::new("hal", "J. Doe").unwrap();
        first_name.source_identifier = Some("123".into());
        reconciler
            .reconcile_contributor(&ReconciliationContext::new(), first_name)
            .await
            .unwrap();

        let mut updated_name = Contributor::new("hal", "Jane Doe").unwrap();
        updated_name.source_identifier = Some("123".into());
        let reconciled = reconciler
            .reconcile_contributor(&ReconciliationContext::new(), updated_name)
            .await
            .unwrap();

        assert_eq!(reconciled.name, "Jane Doe");
        assert_eq!(reconciled.name_variants, vec!["J. Doe".to_string()]);
    }

    #[tokio::test]
    async fn organization_merge_extends_identifiers_of_existing_row() {
        let reconciler = Reconciler::new(store());
        let ctx = ReconciliationContext::new();
        let first = Organization {
            id: None,
            source: "hal".into(),
            source_identifier: Some("1".into()),
            name: "Acme Lab".into(),
            identifiers: vec![Identifier::trusted("ror", "x")],
        };
        let reconciled_first = reconciler.reconcile_organization(&ctx, first).await.unwrap();

        let second = Organization {
            id: None,
            source: "scanr".into(),
            source_identifier: Some("2".into()),
            name: "Acme Laboratory".into(),
            identifiers: vec![Identifier::trusted("ror", "x"), Identifier::trusted("idref", "y")],
        };
        let reconciled_second = reconciler
            .reconcile_organization(&ReconciliationContext::new(), second)
            .await
            .unwrap();

        assert_eq!(reconciled_first.id, reconciled_second.id);
        assert_eq!(reconciled_second.identifiers.len(), 2);
    }

    #[tokio::test]
    async fn concept_with_unresolvable_uri_becomes_stub() {
        let reconciler = Reconciler::new(store());
        let ctx = ReconciliationContext::new();
        let candidate = Concept {
            id: None,
            uri: Some("https://example.org/concepts/42".into()),
            labels: vec![],
        };
        let reconciled = reconciler.reconcile_concept(&ctx, candidate).await.unwrap();
        assert_eq!(reconciled.uri.as_deref(), Some("https://example.org/concepts/42"));
    }

    #[tokio::test]
    async fn safe_mode_rejects_ambiguous_merge_across_two_entities() {
        let s = store();
        let reconciler = Reconciler::new(s.clone());
        let a = reconciler
            .reconcile_entity(&person(vec![Identifier::trusted("idref", "1")]), false)
            .await
            .unwrap();
        let _b = reconciler
            .reconcile_entity(&person(vec![Identifier::trusted("orcid", "2")]), false)
            .await
            .unwrap();
        assert!(a.id.is_some());

        let ambiguous = person(vec![Identifier::trusted("idref", "1"), Identifier::trusted("orcid", "2")]);
        let result = reconciler.reconcile_entity(&ambiguous, true).await;
        assert!(matches!(result, Err(ReconciliationError::AmbiguousEntityMerge(2))));
    }
}
