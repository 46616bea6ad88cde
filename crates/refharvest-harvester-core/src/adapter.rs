use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use refharvest_reconciliation::{ReconciliationContext, Reconciler};
use refharvest_types::{Entity, HashKey, Reference, RetrievalOptions};

use crate::HarvesterError;

/// One undigested record as read from an external source, before
/// conversion. Adapters are free to shape this however their source
/// naturally returns data; the orchestrator never inspects it directly.
pub type RawRecord = serde_json::Value;

/// The lazy, finite, non-restartable sequence of raw records `fetch`
/// produces. Boxed and pinned so adapters backed by arbitrarily different
/// concrete stream types (an HTTP page iterator, a paginated API client,
/// a bounded channel receiver) can all implement the same trait method.
pub type RawRecordStream = Pin<Box<dyn Stream<Item = Result<RawRecord, HarvesterError>> + Send>>;

/// The result of converting one raw record: a normalised reference plus
/// whether an ancillary (non-hash-participating) fact changed relative to
/// the version it supersedes. Adapters that cannot tell the difference
/// should conservatively report `enhanced: false`.
#[derive(Debug, Clone)]
pub struct ConvertedReference {
    /// The normalised reference, hash already computed.
    pub reference: Reference,
    /// Whether an ancillary fact (not part of the hash) changed.
    pub enhanced: bool,
}

/// The capability set every external bibliographic source implements:
/// relevance, fetch, and convert, plus the identity (`name`, `version`)
/// and hashing configuration (`hash_keys`) the recorder and hasher need.
///
/// Adapters carry their own [`HashKey`] list and [`semver::Version`];
/// bumping either is how an adapter signals that previously stored
/// references should be treated as candidates for `updated` on the next
/// run, even if the upstream payload itself did not change.
#[async_trait]
pub trait HarvesterAdapter: Send + Sync {
    /// The harvester's stable name, e.g. `"hal"`, `"idref"`.
    fn name(&self) -> &str;

    /// The adapter's own version, independent of the crate version.
    fn version(&self) -> &semver::Version;

    /// The fields (and their ordering sensitivity) that participate in
    /// this adapter's content hash.
    fn hash_keys(&self) -> &[HashKey];

    /// Whether this adapter applies to `entity` at all, e.g. an
    /// identifier-specific harvester that requires a particular
    /// identifier type the entity lacks.
    fn is_relevant(&self, entity: &Entity) -> bool;

    /// Produce the lazy stream of raw records for `entity`. Backpressure
    /// is the consumer's responsibility: the adapter must be able to
    /// suspend between records when the consumer does not poll.
    async fn fetch(&self, entity: &Entity, options: &RetrievalOptions) -> Result<RawRecordStream, HarvesterError>;

    /// Convert one raw record into a normalised, hashed [`Reference`],
    /// reconciling any embedded entities/contributors/concepts/
    /// organizations against the store along the way.
    async fn convert(
        &self,
        raw: RawRecord,
        entity: &Entity,
        reconciler: &Reconciler,
        ctx: &ReconciliationContext,
    ) -> Result<ConvertedReference, HarvesterError>;
}
