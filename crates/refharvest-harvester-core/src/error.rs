use refharvest_reconciliation::ReconciliationError;
use refharvest_store_core::StoreError;
use refharvest_types::TypesError;

/// Failures a [`crate::HarvesterAdapter`] can report from `fetch` or
/// `convert`, pre-classified per the error handling design: transient
/// failures are retried by the pipeline, the other two are not.
#[derive(Debug, thiserror::Error)]
pub enum HarvesterError {
    /// The upstream source could not be reached, or returned a retryable
    /// error (timeout, 5xx, connection reset). The pipeline retries the
    /// whole record up to its configured attempt count with exponential
    /// backoff.
    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),
    /// The raw payload is malformed in a way no retry would fix (missing
    /// required field, unexpected shape). The record is skipped.
    #[error("structural failure: {0}")]
    Structural(String),
    /// The payload converted but the resulting `Reference` failed its own
    /// structural invariants. The record is skipped.
    #[error("invalid reference: {0}")]
    InvalidReference(#[from] TypesError),
    /// Reconciling an entity, contributor, concept, or organization
    /// embedded in the record failed.
    #[error("reconciliation failed: {0}")]
    Reconciliation(#[from] ReconciliationError),
    /// The store rejected a read or write outside of reconciliation's own
    /// retry path (e.g. looking up the prior reference version failed).
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Recording the classified event failed.
    #[error("recorder error: {0}")]
    Recorder(#[from] refharvest_recorder::RecorderError),
}

impl HarvesterError {
    /// Whether the pipeline should retry the record that produced this
    /// error rather than skipping it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HarvesterError::Transient(_))
    }
}
