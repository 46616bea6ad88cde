#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refharvest-orchestrator** – Registers retrievals and drives their
//! harvester pipelines to completion.
//!
//! The orchestrator owns two public operations:
//!
//! - [`Orchestrator::register`] resolves or creates the entity a retrieval
//!   concerns and persists a `Retrieval` row. It never fails for lookup
//!   reasons (unresolved entities are simply created).
//! - [`Orchestrator::run`] selects every harvester adapter relevant to the
//!   retrieval's entity, spawns one task per adapter to drive its
//!   fetch→convert→record→publish pipeline, and resolves once every task
//!   has reached a terminal state.
//!
//! Adapters run in parallel; a per-adapter semi-sequential bound on
//! secondary fan-out (e.g. IdRef's SUDOC enrichment) is each adapter's own
//! concern, not this crate's - see `refharvest-harvesters`.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use refharvest_harvester_core::{drive_harvesting, HarvesterAdapter, HarvestSummary, RetryPolicy};
use refharvest_harvesters::HarvesterRegistry;
use refharvest_reconciliation::{ReconciliationError, Reconciler};
use refharvest_recorder::Recorder;
use refharvest_store_core::{ReferenceStore, StoreError};
use refharvest_types::{
    Entity, Harvesting, HarvestingError, HarvestingState, OutboundHarvesting, OutboundMessage, ReferenceEvent, Retrieval,
    RetrievalOptions,
};

/// Errors raised registering or running a retrieval.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Entity resolution failed (ambiguous merge under safe mode, or an
    /// unresolved insert-race conflict).
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),
    /// The store rejected a read or write outside of reconciliation's own
    /// retry handling.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coordinates retrieval registration and parallel harvester execution.
pub struct Orchestrator {
    store: Arc<dyn ReferenceStore>,
    reconciler: Arc<Reconciler>,
    registry: Arc<HarvesterRegistry>,
    retry_policy: RetryPolicy,
    /// Harvesting ids currently being driven, tracked for the duration of
    /// one `run` call. Nothing outside this crate reads it today; it
    /// exists as the hook a future cooperative-cancellation path (§4.6's
    /// "adapters must release DB transactions and external connections
    /// before terminating") would walk, mirroring the tracked live-task
    /// table this crate's ancestor kept for agent processes.
    live: DashMap<Uuid, ()>,
}

impl Orchestrator {
    /// Build an orchestrator backed by `store`, selecting adapters from
    /// `registry` and retrying transient `convert` failures per
    /// `retry_policy`.
    pub fn new(store: Arc<dyn ReferenceStore>, registry: HarvesterRegistry, retry_policy: RetryPolicy) -> Self {
        Self {
            reconciler: Arc::new(Reconciler::new(store.clone())),
            store,
            registry: Arc::new(registry),
            retry_policy,
            live: DashMap::new(),
        }
    }

    /// Resolve or create the entity `candidate` refers to and persist a new
    /// `Retrieval` for it under `options`.
    #[instrument(skip(self, candidate))]
    pub async fn register(&self, candidate: Entity, options: RetrievalOptions) -> Result<Retrieval, OrchestratorError> {
        let lookup_candidate = if options.nullify.is_empty() {
            candidate.clone()
        } else {
            candidate.nullifying(&options.nullify)
        };

        let resolved = self.reconciler.reconcile_entity(&lookup_candidate, options.identifiers_safe_mode).await?;
        let retrieval = Retrieval::new(resolved, options, Utc::now());
        let stored = self.store.insert_retrieval(&retrieval).await?;
        info!(retrieval_id = ?stored.id, "retrieval registered");
        Ok(stored)
    }

    /// Run every harvester adapter relevant to `retrieval`'s entity in
    /// parallel, publishing harvesting state transitions and reference
    /// events onto `result_channel` if given. Resolves once every adapter
    /// task has reached a terminal state, returning each harvesting's
    /// final row.
    #[instrument(skip(self, retrieval, result_channel))]
    pub async fn run(
        &self,
        retrieval: &Retrieval,
        result_channel: Option<mpsc::Sender<OutboundMessage>>,
    ) -> Result<Vec<Harvesting>, OrchestratorError> {
        let retrieval_id = retrieval.id.expect("retrieval must be persisted before run");
        let entity = retrieval.effective_entity();
        let adapters = self.registry.adapters_for(&entity, &retrieval.options.harvesters);

        let mut handles: Vec<(Uuid, JoinHandle<Harvesting>)> = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let harvesting = Harvesting::idle(retrieval_id, adapter.name());
            let harvesting = self.store.insert_harvesting(&harvesting).await?;
            let harvesting_id = harvesting.id.expect("insert_harvesting assigns an id");

            self.live.insert(harvesting_id, ());
            let handle =
                self.spawn_adapter_task(adapter, entity.clone(), retrieval.options.clone(), harvesting, result_channel.clone());
            handles.push((harvesting_id, handle));
        }

        let mut finished = Vec::with_capacity(handles.len());
        for (harvesting_id, handle) in handles {
            match handle.await {
                Ok(harvesting) => finished.push(harvesting),
                Err(join_err) => error!(?join_err, %harvesting_id, "harvester task panicked"),
            }
            self.live.remove(&harvesting_id);
        }

        Ok(finished)
    }

    fn spawn_adapter_task(
        &self,
        adapter: Arc<dyn HarvesterAdapter>,
        entity: Entity,
        options: RetrievalOptions,
        mut harvesting: Harvesting,
        result_channel: Option<mpsc::Sender<OutboundMessage>>,
    ) -> JoinHandle<Harvesting> {
        let store = self.store.clone();
        let reconciler = self.reconciler.clone();
        let retry_policy = self.retry_policy.clone();
        let retrieval_id = harvesting.retrieval_id;
        let harvesting_id = harvesting.id.expect("harvesting persisted before its pipeline is driven");

        tokio::spawn(async move {
            harvesting.transition(HarvestingState::Running, Utc::now());
            if let Err(err) = store.update_harvesting(&harvesting).await {
                error!(?err, %retrieval_id, "failed to persist running state");
            }
            publish_harvesting_state(&result_channel, &harvesting).await;

            let recorder = if options.events.is_empty() {
                Recorder::new(store.clone(), harvesting_id)
            } else {
                Recorder::with_event_filter(store.clone(), harvesting_id, options.events.clone())
            };

            // `drive_harvesting` only knows how to publish `ReferenceEvent`s;
            // bridge them onto the shared `OutboundMessage` result channel so
            // callers see one unified stream per retrieval (§4.8).
            let (reference_tx, mut reference_rx) = mpsc::channel::<ReferenceEvent>(64);
            let forward_channel = result_channel.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(event) = reference_rx.recv().await {
                    if let Some(tx) = &forward_channel {
                        let _ = tx.send(OutboundMessage::ReferenceEvent(event.into())).await;
                    }
                }
            });

            let summary: HarvestSummary =
                drive_harvesting(adapter.clone(), entity, options, reconciler, recorder, retry_policy, Some(reference_tx)).await;
            let _ = forwarder.await;

            harvesting.event_count = summary.succeeded + summary.deleted;
            let next = match &summary.fatal {
                Some(message) => {
                    warn!(%message, harvester = adapter.name(), "harvesting failed");
                    harvesting.error = Some(HarvestingError::SourceUnavailable);
                    HarvestingState::Failed
                }
                None => HarvestingState::Completed,
            };
            harvesting.transition(next, Utc::now());

            if let Err(err) = store.update_harvesting(&harvesting).await {
                error!(?err, %retrieval_id, "failed to persist terminal harvesting state");
            }
            publish_harvesting_state(&result_channel, &harvesting).await;

            harvesting
        })
    }
}

async fn publish_harvesting_state(result_channel: &Option<mpsc::Sender<OutboundMessage>>, harvesting: &Harvesting) {
    let Some(tx) = result_channel else { return };
    let message = OutboundMessage::Harvesting(OutboundHarvesting {
        id: harvesting.id.expect("harvesting persisted before state is published"),
        retrieval_id: harvesting.retrieval_id,
        harvester: harvesting.harvester.clone(),
        state: harvesting.state,
        error: harvesting.error,
    });
    let _ = tx.send(message).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use refharvest_store_memory::MemoryStore;
    use refharvest_types::{Identifier, PersonName};

    fn person(identifiers: Vec<Identifier>) -> Entity {
        Entity::new_person(PersonName::default(), identifiers).unwrap()
    }

    #[tokio::test]
    async fn register_persists_a_retrieval_for_a_new_entity() {
        let store: Arc<dyn ReferenceStore> = Arc::new(MemoryStore::new());
        let registry = HarvesterRegistry::configure(&[], reqwest::Client::new()).unwrap();
        let orchestrator = Orchestrator::new(store, registry, RetryPolicy::default());

        let entity = person(vec![Identifier::trusted("idref", "123")]);
        let retrieval = orchestrator.register(entity, RetrievalOptions::default()).await.unwrap();
        assert!(retrieval.id.is_some());
    }

    #[tokio::test]
    async fn register_reuses_an_already_known_entity() {
        let store: Arc<dyn ReferenceStore> = Arc::new(MemoryStore::new());
        let registry = HarvesterRegistry::configure(&[], reqwest::Client::new()).unwrap();
        let orchestrator = Orchestrator::new(store, registry, RetryPolicy::default());

        let entity = person(vec![Identifier::trusted("idref", "123")]);
        let first = orchestrator.register(entity.clone(), RetrievalOptions::default()).await.unwrap();
        let second = orchestrator.register(entity, RetrievalOptions::default()).await.unwrap();
        assert_eq!(first.entity.id, second.entity.id);
    }

    #[tokio::test]
    async fn run_with_no_relevant_adapters_returns_no_harvestings() {
        let store: Arc<dyn ReferenceStore> = Arc::new(MemoryStore::new());
        let registry = HarvesterRegistry::configure(&[], reqwest::Client::new()).unwrap();
        let orchestrator = Orchestrator::new(store, registry, RetryPolicy::default());

        let entity = person(vec![Identifier::trusted("idref", "123")]);
        let retrieval = orchestrator.register(entity, RetrievalOptions::default()).await.unwrap();
        let harvestings = orchestrator.run(&retrieval, None).await.unwrap();
        assert!(harvestings.is_empty());
    }
}
