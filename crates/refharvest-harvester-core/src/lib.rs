#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refharvest-harvester-core** – The adapter capability set every
//! external bibliographic source implements, and the pipeline that drives
//! one adapter's `fetch -> convert -> record` run to completion.
//!
//! Concrete adapters (HAL, IdRef, OpenAlex, ScanR, Scopus, ...) live in
//! `refharvest-harvesters`; this crate owns only the shape they conform to
//! and the error classification, retry, and backpressure behaviour that
//! applies uniformly to all of them.

mod adapter;
mod error;
mod pipeline;
mod retry;

pub use adapter::{ConvertedReference, HarvesterAdapter, RawRecord, RawRecordStream};
pub use error::HarvesterError;
pub use pipeline::{drive_harvesting, HarvestSummary, MAX_EXPECTED_RESULTS};
pub use retry::{with_retry, RetryPolicy};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use refharvest_reconciliation::{ReconciliationContext, Reconciler};
    use refharvest_store_memory::MemoryStore;
    use refharvest_types::{Entity, HashKey, Identifier, PersonName, Reference, RetrievalOptions};
    use semver::Version;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct StubAdapter {
        name: String,
        version: Version,
        hash_keys: Vec<HashKey>,
        records: Vec<serde_json::Value>,
        convert_calls: AtomicU32,
        fail_first_n: u32,
    }

    #[async_trait]
    impl HarvesterAdapter for StubAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn version(&self) -> &Version {
            &self.version
        }

        fn hash_keys(&self) -> &[HashKey] {
            &self.hash_keys
        }

        fn is_relevant(&self, _entity: &Entity) -> bool {
            true
        }

        async fn fetch(&self, _entity: &Entity, _options: &RetrievalOptions) -> Result<RawRecordStream, HarvesterError> {
            let items: Vec<Result<RawRecord, HarvesterError>> = self.records.iter().cloned().map(Ok).collect();
            Ok(Box::pin(stream::iter(items)))
        }

        async fn convert(
            &self,
            raw: RawRecord,
            _entity: &Entity,
            _reconciler: &Reconciler,
            _ctx: &ReconciliationContext,
        ) -> Result<ConvertedReference, HarvesterError> {
            let attempt = self.convert_calls.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first_n {
                return Err(HarvesterError::Transient(anyhow::anyhow!("simulated upstream hiccup")));
            }
            let source_identifier = raw["id"].as_str().unwrap_or_default().to_string();
            Ok(ConvertedReference {
                reference: Reference {
                    id: None,
                    harvester: self.name.clone(),
                    harvester_version: self.version.clone(),
                    source_identifier,
                    hash: "sha256:deadbeef".into(),
                    version: 1,
                    titles: vec![raw["title"].as_str().unwrap_or("untitled").to_string()],
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
                },
                enhanced: false,
            })
        }
    }

    fn entity() -> Entity {
        Entity::new_person(
            PersonName {
                first_name: Some("Jane".into()),
                last_name: Some("Doe".into()),
            },
            vec![Identifier::trusted("idref", "123")],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn drives_every_record_to_a_created_event() {
        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(StubAdapter {
            name: "hal".into(),
            version: Version::new(1, 0, 0),
            hash_keys: vec![HashKey::unordered("title")],
            records: vec![serde_json::json!({"id": "doc-1", "title": "A"}), serde_json::json!({"id": "doc-2", "title": "B"})],
            convert_calls: AtomicU32::new(0),
            fail_first_n: 0,
        });
        let reconciler = Arc::new(Reconciler::new(store.clone()));
        let harvesting_id = uuid::Uuid::new_v4();
        let recorder = refharvest_recorder::Recorder::new(store.clone(), harvesting_id);

        let summary = drive_harvesting(
            adapter,
            entity(),
            RetrievalOptions::default(),
            reconciler,
            recorder,
            RetryPolicy::default(),
            None,
        )
        .await;

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.skipped, 0);
        assert!(summary.fatal.is_none());
    }

    #[tokio::test]
    async fn transient_convert_failures_are_retried_then_succeed() {
        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(StubAdapter {
            name: "hal".into(),
            version: Version::new(1, 0, 0),
            hash_keys: vec![HashKey::unordered("title")],
            records: vec![serde_json::json!({"id": "doc-1", "title": "A"})],
            convert_calls: AtomicU32::new(0),
            fail_first_n: 2,
        });
        let reconciler = Arc::new(Reconciler::new(store.clone()));
        let recorder = refharvest_recorder::Recorder::new(store.clone(), uuid::Uuid::new_v4());

        let summary = drive_harvesting(
            adapter,
            entity(),
            RetrievalOptions::default(),
            reconciler,
            recorder,
            RetryPolicy { max_attempts: 5, base_delay: std::time::Duration::from_millis(1) },
            None,
        )
        .await;

        assert_eq!(summary.succeeded, 1);
    }

    #[tokio::test]
    async fn missing_reference_from_a_prior_run_is_detected_as_deleted() {
        let store = Arc::new(MemoryStore::new());
        let first_adapter = Arc::new(StubAdapter {
            name: "hal".into(),
            version: Version::new(1, 0, 0),
            hash_keys: vec![HashKey::unordered("title")],
            records: vec![serde_json::json!({"id": "doc-1", "title": "A"})],
            convert_calls: AtomicU32::new(0),
            fail_first_n: 0,
        });
        let reconciler = Arc::new(Reconciler::new(store.clone()));
        drive_harvesting(
            first_adapter,
            entity(),
            RetrievalOptions::default(),
            reconciler.clone(),
            refharvest_recorder::Recorder::new(store.clone(), uuid::Uuid::new_v4()),
            RetryPolicy::default(),
            None,
        )
        .await;

        let second_adapter = Arc::new(StubAdapter {
            name: "hal".into(),
            version: Version::new(1, 0, 0),
            hash_keys: vec![HashKey::unordered("title")],
            records: vec![],
            convert_calls: AtomicU32::new(0),
            fail_first_n: 0,
        });
        let summary = drive_harvesting(
            second_adapter,
            entity(),
            RetrievalOptions::default(),
            reconciler,
            refharvest_recorder::Recorder::new(store.clone(), uuid::Uuid::new_v4()),
            RetryPolicy::default(),
            None,
        )
        .await;

        assert_eq!(summary.deleted, 1);
    }
}
