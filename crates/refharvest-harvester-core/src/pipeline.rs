use std::sync::Arc;

use futures::StreamExt;
use refharvest_reconciliation::{ReconciliationContext, Reconciler};
use refharvest_recorder::Recorder;
use refharvest_types::{Entity, ReferenceEvent, RetrievalOptions};
use tokio::sync::mpsc;

use crate::adapter::HarvesterAdapter;
use crate::retry::{with_retry, RetryPolicy};
use crate::HarvesterError;

/// Caps the number of in-flight [`ReferenceEvent`]s buffered between one
/// harvesting's pipeline and its consumer before the pipeline suspends
/// (the same backpressure contract the broker's result channel uses).
pub const MAX_EXPECTED_RESULTS: usize = 10_000;

/// What a harvesting run produced, independent of storage: the orchestrator
/// uses this to transition the `Harvesting` row's state and counters.
#[derive(Debug, Default)]
pub struct HarvestSummary {
    /// References successfully classified and persisted or confirmed
    /// unchanged.
    pub succeeded: u64,
    /// Raw records skipped due to a structural or validation failure.
    pub skipped: u64,
    /// `deleted` events emitted because a previously known reference was
    /// absent from this run.
    pub deleted: u64,
    /// Human-readable descriptions of skipped records, capped to avoid
    /// unbounded growth on a pathological source.
    pub errors: Vec<String>,
    /// Set when the adapter's `fetch` call itself failed or a retried
    /// `convert` exhausted its attempts against a non-recoverable
    /// transient failure, i.e. the harvesting as a whole did not
    /// complete.
    pub fatal: Option<String>,
}

const MAX_RECORDED_ERRORS: usize = 100;

impl HarvestSummary {
    fn push_error(&mut self, message: String) {
        self.skipped += 1;
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push(message);
        }
    }
}

/// Drive one adapter's `fetch -> convert -> record` pipeline to
/// completion for `entity`, publishing each resulting [`ReferenceEvent`]
/// onto `events_tx` (when present) as it is produced, and emitting
/// `deleted` events for references from previous runs that did not
/// reappear.
///
/// Returns once the adapter's stream is exhausted (or `fetch` itself
/// fails). Never panics on a single bad record: structural and
/// validation failures are skipped and recorded in the returned summary;
/// transient failures are retried per `retry_policy` before being
/// skipped.
pub async fn drive_harvesting(
    adapter: Arc<dyn HarvesterAdapter>,
    entity: Entity,
    options: RetrievalOptions,
    reconciler: Arc<Reconciler>,
    recorder: Recorder,
    retry_policy: RetryPolicy,
    events_tx: Option<mpsc::Sender<ReferenceEvent>>,
) -> HarvestSummary {
    let mut summary = HarvestSummary::default();
    let ctx = ReconciliationContext::new();

    let mut stream = match adapter.fetch(&entity, &options).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(harvester = adapter.name(), error = %err, "fetch failed");
            summary.fatal = Some(err.to_string());
            return summary;
        }
    };

    while let Some(item) = stream.next().await {
        let raw = match item {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!(harvester = adapter.name(), error = %err, "skipping record the adapter could not fetch");
                summary.push_error(err.to_string());
                continue;
            }
        };

        let adapter_ref = adapter.clone();
        let reconciler_ref = reconciler.clone();
        let entity_ref = &entity;
        let ctx_ref = &ctx;
        let converted = with_retry(retry_policy, {
            let raw = raw.clone();
            move || {
                let adapter_ref = adapter_ref.clone();
                let reconciler_ref = reconciler_ref.clone();
                let raw = raw.clone();
                async move { adapter_ref.convert(raw, entity_ref, &reconciler_ref, ctx_ref).await }
            }
        })
        .await;

        let converted = match converted {
            Ok(converted) => converted,
            Err(err) if err.is_retryable() => {
                tracing::warn!(harvester = adapter.name(), error = %err, "exhausted retries, skipping record");
                summary.push_error(err.to_string());
                continue;
            }
            Err(err) => {
                tracing::debug!(harvester = adapter.name(), error = %err, "skipping record");
                summary.push_error(err.to_string());
                continue;
            }
        };

        let event = match recorder.record(converted.reference, converted.enhanced).await {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(harvester = adapter.name(), error = %err, "recording failed");
                summary.push_error(err.to_string());
                continue;
            }
        };

        summary.succeeded += 1;
        if let Some(event) = event {
            publish(&events_tx, event).await;
        }
    }

    match recorder.finish(adapter.name()).await {
        Ok(deletions) => {
            summary.deleted = deletions.len() as u64;
            for event in deletions {
                publish(&events_tx, event).await;
            }
        }
        Err(err) => {
            tracing::warn!(harvester = adapter.name(), error = %err, "deletion detection failed");
            summary.errors.push(err.to_string());
        }
    }

    summary
}

async fn publish(events_tx: &Option<mpsc::Sender<ReferenceEvent>>, event: ReferenceEvent) {
    if let Some(tx) = events_tx {
        if tx.send(event).await.is_err() {
            tracing::debug!("result channel closed, dropping remaining events for this harvesting");
        }
    }
}
