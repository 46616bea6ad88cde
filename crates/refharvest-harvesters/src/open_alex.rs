use async_trait::async_trait;
use futures::{stream, StreamExt};
use refharvest_harvester_core::{ConvertedReference, HarvesterAdapter, HarvesterError, RawRecord, RawRecordStream};
use refharvest_reconciliation::{ReconciliationContext, Reconciler};
use refharvest_types::{Contribution, Contributor, DocumentTypeRecord, Entity, HashKey, Identifier, Issue, Journal, Reference, RetrievalOptions};

/// OpenAlex's works API, queried by ORCID. Grounded in
/// `app/harvesters/open_alex/open_alex_references_converter.py`: a single
/// flat JSON document per work, author list under `authorships`, a
/// journal-shaped `primary_location.source` when the work type is
/// `"journal"`.
pub struct OpenAlexAdapter {
    client: reqwest::Client,
    base_url: String,
    page_size: usize,
    hash_keys: Vec<HashKey>,
    version: semver::Version,
}

impl OpenAlexAdapter {
    /// Build an adapter pointed at the public OpenAlex works API.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: "https://api.openalex.org/works".into(),
            page_size: 100,
            hash_keys: vec![
                HashKey::unordered("title"),
                HashKey::unordered("authorships"),
                HashKey::unordered("primary_location"),
            ],
            version: semver::Version::new(1, 0, 0),
        }
    }

    fn orcid(entity: &Entity) -> Option<&str> {
        entity.identifiers_of_type("orcid").next().map(|id| id.value.as_str())
    }
}

#[async_trait]
impl HarvesterAdapter for OpenAlexAdapter {
    fn name(&self) -> &str {
        "open_alex"
    }

    fn version(&self) -> &semver::Version {
        &self.version
    }

    fn hash_keys(&self) -> &[HashKey] {
        &self.hash_keys
    }

    fn is_relevant(&self, entity: &Entity) -> bool {
        Self::orcid(entity).is_some()
    }

    async fn fetch(&self, entity: &Entity, _options: &RetrievalOptions) -> Result<RawRecordStream, HarvesterError> {
        let orcid = Self::orcid(entity)
            .ok_or_else(|| HarvesterError::Structural("entity carries no orcid identifier".into()))?
            .to_string();

        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let page_size = self.page_size;
        let filter = format!("authorships.author.orcid:{orcid}");

        let records = futures::stream::unfold(1usize, move |page| {
            let client = client.clone();
            let base_url = base_url.clone();
            let filter = filter.clone();
            async move {
                let response = client
                    .get(&base_url)
                    .query(&[("filter", filter.as_str()), ("per-page", &page_size.to_string()), ("page", &page.to_string())])
                    .send()
                    .await;
                let response = match response {
                    Ok(r) => r,
                    Err(err) => return Some((vec![Err(HarvesterError::Transient(err.into()))], page)),
                };
                let body: serde_json::Value = match response.json().await {
                    Ok(b) => b,
                    Err(err) => return Some((vec![Err(HarvesterError::Transient(err.into()))], page)),
                };
                let results = body["results"].as_array().cloned().unwrap_or_default();
                if results.is_empty() {
                    return None;
                }
                Some((results.into_iter().map(Ok).collect::<Vec<_>>(), page + 1))
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
        let source_identifier = raw["id"]
            .as_str()
            .ok_or_else(|| HarvesterError::Structural("missing id".into()))?
            .to_string();

        let title = raw["title"].as_str().ok_or_else(|| HarvesterError::Structural("missing title".into()))?;

        let document_type = raw["type"]
            .as_str()
            .map(|kind| DocumentTypeRecord {
                id: None,
                source: "open_alex".into(),
                source_identifier: Some(kind.to_string()),
                label: kind.to_string(),
                uri: None,
            })
            .into_iter()
            .collect();

        let mut contributions = Vec::new();
        if let Some(authorships) = raw["authorships"].as_array() {
            for (rank, authorship) in authorships.iter().enumerate() {
                let Some(name) = authorship["author"]["display_name"].as_str() else { continue };
                let mut candidate = Contributor::new("open_alex", name)?;
                if let Some(orcid) = authorship["author"]["orcid"].as_str() {
                    candidate.source_identifier = Some(orcid.trim_start_matches("https://orcid.org/").to_string());
                }
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
        if let Some(doi) = raw["doi"].as_str() {
            identifiers.push(Identifier::trusted("doi", doi.trim_start_matches("https://doi.org/")));
        }

        let issue = if raw["primary_location"]["source"]["type"].as_str() == Some("journal") {
            raw["primary_location"]["source"]["id"].as_str().map(|journal_id| Issue {
                id: None,
                source: "open_alex".into(),
                source_identifier: None,
                volume: raw["biblio"]["volume"].as_str().map(str::to_string),
                number: raw["biblio"]["issue"].as_str().map(str::to_string),
                journal: Some(Journal {
                    id: None,
                    source: "open_alex".into(),
                    source_identifier: Some(journal_id.to_string()),
                    titles: raw["primary_location"]["source"]["display_name"]
                        .as_str()
                        .map(|s| vec![s.to_string()])
                        .unwrap_or_default(),
                    issn: raw["primary_location"]["source"]["issn"]
                        .as_array()
                        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
                        .unwrap_or_default(),
                }),
            })
        } else {
            None
        };

        let page = match (raw["biblio"]["first_page"].as_str(), raw["biblio"]["last_page"].as_str()) {
            (Some(first), Some(last)) => Some(format!("{first}-{last}")),
            _ => None,
        };

        let mut reference = Reference {
            id: None,
            harvester: self.name().to_string(),
            harvester_version: self.version.clone(),
            source_identifier,
            hash: String::new(),
            version: 1,
            titles: vec![title.to_string()],
            subtitles: Vec::new(),
            abstracts: Vec::new(),
            subjects: Vec::new(),
            contributions,
            document_type,
            identifiers,
            manifestations: Vec::new(),
            issue,
            book: None,
            page,
            created: None,
            issued: None,
            raw_issued: raw["publication_date"].as_str().map(str::to_string),
        };
        reference.validate()?;
        reference.hash = refharvest_hash::digest(&raw, &self.hash_keys, &self.version);

        Ok(ConvertedReference { reference, enhanced: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refharvest_store_memory::MemoryStore;
    use std::sync::Arc;

    fn entity_with_orcid() -> Entity {
        Entity::new_person(Default::default(), vec![Identifier::trusted("orcid", "0000-0001-2345-6789")]).unwrap()
    }

    #[test]
    fn is_relevant_requires_an_orcid() {
        let adapter = OpenAlexAdapter::new(reqwest::Client::new());
        assert!(adapter.is_relevant(&entity_with_orcid()));
        let without = Entity::new_person(Default::default(), vec![Identifier::trusted("idref", "1")]).unwrap();
        assert!(!adapter.is_relevant(&without));
    }

    #[tokio::test]
    async fn convert_maps_journal_article() {
        let adapter = OpenAlexAdapter::new(reqwest::Client::new());
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store);
        let ctx = ReconciliationContext::new();
        let raw = serde_json::json!({
            "id": "https://openalex.org/W123",
            "title": "A study of things",
            "type": "article",
            "doi": "https://doi.org/10.1234/xyz",
            "authorships": [
                {"author": {"display_name": "Jane Doe", "orcid": "https://orcid.org/0000-0001-2345-6789"}},
            ],
            "primary_location": {"source": {"type": "journal", "id": "S1", "display_name": "Journal of Things", "issn": ["1234-5678"]}},
            "biblio": {"first_page": "1", "last_page": "10", "volume": "4", "issue": "2"},
            "publication_date": "2024-03-01",
        });

        let converted = adapter.convert(raw, &entity_with_orcid(), &reconciler, &ctx).await.unwrap();
        assert_eq!(converted.reference.source_identifier, "https://openalex.org/W123");
        assert_eq!(converted.reference.identifiers[0].value, "10.1234/xyz");
        assert_eq!(converted.reference.page, Some("1-10".to_string()));
        assert!(converted.reference.issue.is_some());
    }
}
