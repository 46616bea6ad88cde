use async_trait::async_trait;
use futures::{stream, StreamExt};
use refharvest_harvester_core::{ConvertedReference, HarvesterAdapter, HarvesterError, RawRecord, RawRecordStream};
use refharvest_reconciliation::{ReconciliationContext, Reconciler};
use refharvest_types::{Contribution, Contributor, DocumentTypeRecord, Entity, HashKey, Identifier, Reference, RetrievalOptions};

/// HAL's open-access document API, queried by author identifier
/// (`idhal_i` or `idhal_s`). Grounded in the shape of
/// `app/harvesters/hal/hal_tei_interface.py`: one paginated JSON query
/// per author, each hit already flat enough to map directly onto
/// `Reference` without a secondary fan-out.
pub struct HalAdapter {
    client: reqwest::Client,
    base_url: String,
    page_size: usize,
    hash_keys: Vec<HashKey>,
    version: semver::Version,
}

impl HalAdapter {
    /// Build an adapter pointed at HAL's public search API.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: "https://api.archives-ouvertes.fr/search".into(),
            page_size: 100,
            hash_keys: vec![
                HashKey::unordered("title_s"),
                HashKey::unordered("abstract_s"),
                HashKey::unordered("docType_s"),
                HashKey::unordered("authFullName_s"),
            ],
            version: semver::Version::new(1, 0, 0),
        }
    }

    fn identifier_query(entity: &Entity) -> Option<String> {
        entity
            .identifiers
            .iter()
            .find(|id| id.kind == "idhal_i" || id.kind == "idhal_s")
            .map(|id| format!("authIdHal_s:{}", id.value))
    }
}

#[async_trait]
impl HarvesterAdapter for HalAdapter {
    fn name(&self) -> &str {
        "hal"
    }

    fn version(&self) -> &semver::Version {
        &self.version
    }

    fn hash_keys(&self) -> &[HashKey] {
        &self.hash_keys
    }

    fn is_relevant(&self, entity: &Entity) -> bool {
        Self::identifier_query(entity).is_some()
    }

    async fn fetch(&self, entity: &Entity, _options: &RetrievalOptions) -> Result<RawRecordStream, HarvesterError> {
        let query = Self::identifier_query(entity)
            .ok_or_else(|| HarvesterError::Structural("entity carries no idhal identifier".into()))?;

        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let page_size = self.page_size;

        let records = futures::stream::unfold(0usize, move |cursor| {
            let client = client.clone();
            let base_url = base_url.clone();
            let query = query.clone();
            async move {
                let response = client
                    .get(format!("{base_url}/"))
                    .query(&[("q", query.as_str()), ("rows", &page_size.to_string()), ("start", &cursor.to_string())])
                    .send()
                    .await;
                let response = match response {
                    Ok(r) => r,
                    Err(err) => return Some((vec![Err(HarvesterError::Transient(err.into()))], cursor)),
                };
                let body: serde_json::Value = match response.json().await {
                    Ok(b) => b,
                    Err(err) => return Some((vec![Err(HarvesterError::Transient(err.into()))], cursor)),
                };
                let docs = body["response"]["docs"].as_array().cloned().unwrap_or_default();
                if docs.is_empty() {
                    return None;
                }
                let next_cursor = cursor + docs.len();
                Some((docs.into_iter().map(Ok).collect::<Vec<_>>(), next_cursor))
            }
        })
        .flat_map(stream::iter);

        Ok(Box::pin(records))
    }

    async fn convert(
        &self,
        raw: RawRecord,
        _entity: &Entity,
        reconciler: &Reconciler,
        ctx: &ReconciliationContext,
    ) -> Result<ConvertedReference, HarvesterError> {
        let halid = raw["halId_s"]
            .as_str()
            .ok_or_else(|| HarvesterError::Structural("missing halId_s".into()))?
            .to_string();

        let titles: Vec<String> = raw["title_s"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
            .unwrap_or_default();
        if titles.is_empty() {
            return Err(HarvesterError::Structural("no title_s".into()));
        }

        let abstracts = raw["abstract_s"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
            .unwrap_or_default();

        let document_type = raw["docType_s"]
            .as_str()
            .map(|kind| DocumentTypeRecord {
                id: None,
                source: "hal".into(),
                source_identifier: Some(kind.to_string()),
                label: kind.to_string(),
                uri: None,
            })
            .into_iter()
            .collect();

        let mut contributions = Vec::new();
        if let Some(authors) = raw["authFullName_s"].as_array() {
            for (rank, author) in authors.iter().enumerate() {
                let Some(name) = author.as_str() else { continue };
                let candidate = Contributor::new("hal", name).map_err(HarvesterError::InvalidReference)?;
                let contributor = reconciler.reconcile_contributor(ctx, candidate).await?;
                contributions.push(Contribution {
                    contributor,
                    role: Some("author".into()),
                    rank: Some(rank as u32 + 1),
                    affiliations: Vec::new(),
                });
            }
        }

        let mut identifiers = Vec::new();
        if let Some(doi) = raw["doiId_s"].as_str() {
            identifiers.push(Identifier::trusted("doi", doi));
        }

        let mut reference = Reference {
            id: None,
            harvester: self.name().to_string(),
            harvester_version: self.version.clone(),
            source_identifier: halid,
            hash: String::new(),
            version: 1,
            titles,
            subtitles: Vec::new(),
            abstracts,
            subjects: Vec::new(),
            contributions,
            document_type,
            identifiers,
            manifestations: Vec::new(),
            issue: None,
            book: None,
            page: None,
            created: None,
            issued: None,
            raw_issued: raw["producedDateY_i"].as_i64().map(|y| y.to_string()),
        };
        reference.validate().map_err(HarvesterError::InvalidReference)?;
        reference.hash = refharvest_hash::digest(&raw, &self.hash_keys, &self.version);

        Ok(ConvertedReference { reference, enhanced: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refharvest_store_memory::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn is_relevant_requires_an_idhal_identifier() {
        let adapter = HalAdapter::new(reqwest::Client::new());
        let with_idhal = Entity::new_person(Default::default(), vec![Identifier::trusted("idhal_i", "jane-doe")]).unwrap();
        let without = Entity::new_person(Default::default(), vec![Identifier::trusted("idref", "123")]).unwrap();
        assert!(adapter.is_relevant(&with_idhal));
        assert!(!adapter.is_relevant(&without));
    }

    #[tokio::test]
    async fn convert_maps_core_fields() {
        let adapter = HalAdapter::new(reqwest::Client::new());
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store);
        let ctx = ReconciliationContext::new();
        let entity = Entity::new_person(Default::default(), vec![Identifier::trusted("idhal_i", "jane-doe")]).unwrap();
        let raw = serde_json::json!({
            "halId_s": "hal-01234567",
            "title_s": ["A study of things"],
            "abstract_s": ["An abstract."],
            "docType_s": "ART",
            "authFullName_s": ["Jane Doe", "John Smith"],
            "doiId_s": "10.1234/xyz",
        });

        let converted = adapter.convert(raw, &entity, &reconciler, &ctx).await.unwrap();
        assert_eq!(converted.reference.source_identifier, "hal-01234567");
        assert_eq!(converted.reference.titles, vec!["A study of things".to_string()]);
        assert_eq!(converted.reference.contributions.len(), 2);
        assert!(converted.reference.hash.starts_with("sha256:"));
    }

    #[tokio::test]
    async fn convert_rejects_record_without_title() {
        let adapter = HalAdapter::new(reqwest::Client::new());
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store);
        let ctx = ReconciliationContext::new();
        let entity = Entity::new_person(Default::default(), vec![Identifier::trusted("idhal_i", "jane-doe")]).unwrap();
        let raw = serde_json::json!({"halId_s": "hal-01234567"});

        let result = adapter.convert(raw, &entity, &reconciler, &ctx).await;
        assert!(result.is_err());
    }
}
