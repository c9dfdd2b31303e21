//! Paginated query engine over an immutable registry snapshot.
//!
//! Every search resolves its object through the registry, builds a
//! [`Locator`] binding tokens to that object and filter, and then either
//! drives a shard [`scan`](scan::scan) (variants, annotations, reads) or
//! pages an in-memory listing (catalog searches, call sets, bases).

mod bases;
mod catalog;
mod reads;
pub mod scan;
mod variants;

use crate::config::QueryConfig;
use crate::formats::{Backends, OntologyMap};
use crate::locator::{IntraShardCursor, Locator, ScanPosition};
use crate::registry::{ObjectType, REFERENCE_NAMES, RegistryEntry, RegistryStore};
use crate::types::SearchResponse;
use crate::{Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

pub use scan::{ScanOutcome, ScanRequest, estimated_size};

/// A genomic window: `[start, end)` on one reference, 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub reference_name: String,
    pub start: u64,
    pub end: Option<u64>,
}

impl Region {
    /// Build the region for a record search against `entry`.
    ///
    /// Without a reference name the whole object is scanned; strict mode
    /// rejects a start or end given alone. A reference name the object does
    /// not know is `NotFound`.
    pub fn for_search(
        entry: &RegistryEntry,
        reference_name: Option<&str>,
        start: Option<u64>,
        end: Option<u64>,
        strict: bool,
    ) -> Result<Option<Region>> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end && strict {
                return Err(Error::InvalidInput(format!(
                    "start {} is after end {}",
                    start, end
                )));
            }
        }
        let Some(reference_name) = reference_name.filter(|n| !n.is_empty()) else {
            if strict && (start.is_some() || end.is_some()) {
                return Err(Error::InvalidInput(
                    "start and end require a reference name".to_string(),
                ));
            }
            return Ok(None);
        };

        let known = entry.metadata_strings(REFERENCE_NAMES);
        if !known.is_empty() && !known.iter().any(|n| n == reference_name) {
            return Err(Error::NotFound(format!(
                "{} {:?} has no reference {:?}",
                entry.object_type, entry.name, reference_name
            )));
        }
        Ok(Some(Region {
            reference_name: reference_name.to_string(),
            start: start.unwrap_or(0),
            end,
        }))
    }
}

pub struct QueryEngine {
    registry: Arc<RegistryStore>,
    backends: Backends,
    config: QueryConfig,
    ontologies: HashMap<String, Arc<OntologyMap>>,
}

impl QueryEngine {
    pub fn new(registry: Arc<RegistryStore>, backends: Backends, config: QueryConfig) -> Self {
        Self {
            registry,
            backends,
            config,
            ontologies: HashMap::new(),
        }
    }

    /// Build an engine and load every registered ontology map. A map that
    /// fails to load is left out and logged; `check` reports it.
    pub async fn load(
        registry: Arc<RegistryStore>,
        backends: Backends,
        config: QueryConfig,
    ) -> Result<Self> {
        let mut engine = Self::new(registry, backends, config);
        let maps: Vec<(String, String)> = engine
            .registry
            .list_objects(ObjectType::OntologyMap, None)
            .into_iter()
            .filter_map(|e| {
                e.shards
                    .first()
                    .map(|s| (e.name.clone(), s.relative_path.clone()))
            })
            .collect();
        for (name, relative) in maps {
            let path = engine.registry.resolve(&relative)?;
            match OntologyMap::load(&name, &path).await {
                Ok(map) => {
                    tracing::info!("loaded ontology map {} ({} terms)", name, map.len());
                    engine.ontologies.insert(name, Arc::new(map));
                }
                Err(e) => tracing::warn!("skipping ontology map {}: {}", name, e),
            }
        }
        Ok(engine)
    }

    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn ontology(&self, name: &str) -> Option<&OntologyMap> {
        self.ontologies.get(name).map(Arc::as_ref)
    }

    /// Run a query under the configured deadline. Dropping the returned
    /// future drops every reader the query holds.
    async fn with_deadline<T>(&self, query: impl Future<Output = Result<T>>) -> Result<T> {
        match self.config.query_timeout {
            Some(limit) => tokio::time::timeout(limit, query)
                .await
                .map_err(|_| Error::DeadlineExceeded(limit.as_millis() as u64))?,
            None => query.await,
        }
    }

    /// Re-check a finished page against the paging invariants.
    fn validate_page(&self, len: usize, bytes: usize, page_size: usize) -> Result<()> {
        if !self.config.response_validation {
            return Ok(());
        }
        if len > page_size {
            return Err(Error::Internal(format!(
                "page holds {} records, over the page size {}",
                len, page_size
            )));
        }
        if len > 1 && bytes > self.config.max_response_length {
            return Err(Error::Internal(format!(
                "page of {} bytes exceeds the response limit {}",
                bytes, self.config.max_response_length
            )));
        }
        Ok(())
    }

    /// Turn a scan outcome into a response page.
    fn finish_scan<T>(
        &self,
        locator: &Locator,
        outcome: ScanOutcome<T>,
        page_size: usize,
    ) -> Result<SearchResponse<T>> {
        self.validate_page(outcome.records.len(), outcome.bytes, page_size)?;
        if !outcome.unavailable_shards.is_empty() {
            tracing::warn!(
                "partial page: shards {:?} unavailable",
                outcome.unavailable_shards
            );
        }
        Ok(SearchResponse {
            results: outcome.records,
            next_page_token: outcome
                .next
                .map(|position| locator.token_for(&position))
                .transpose()?,
            unavailable_shards: outcome.unavailable_shards,
        })
    }

    /// Page through an already materialized, stably ordered list. The
    /// token's shard index is the offset of the next item.
    fn page_items<T: Serialize>(
        &self,
        locator: &Locator,
        items: Vec<T>,
        page_size: Option<i64>,
        page_token: Option<&str>,
    ) -> Result<SearchResponse<T>> {
        let page_size = self.config.effective_page_size(page_size)?;
        let offset = locator.resume(page_token)?.shard_index;
        if offset > items.len() {
            return Err(Error::InvalidToken(format!(
                "offset {} is past the end of the listing",
                offset
            )));
        }

        let mut results = Vec::new();
        let mut bytes = 0;
        let mut next = None;
        for (position, item) in items.into_iter().enumerate().skip(offset) {
            let size = estimated_size(&item)?;
            let full = results.len() >= page_size || bytes >= self.config.max_response_length;
            let fits = results.is_empty() || bytes + size <= self.config.max_response_length;
            if full || !fits {
                next = Some(position);
                break;
            }
            bytes += size;
            results.push(item);
        }
        self.validate_page(results.len(), bytes, page_size)?;

        Ok(SearchResponse {
            results,
            next_page_token: next
                .map(|position| locator.token_for(&ScanPosition::at_shard(position)))
                .transpose()?,
            unavailable_shards: Vec::new(),
        })
    }
}

/// Short stable digest used inside record ids.
pub(crate) fn record_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Cursor pointing at a byte offset of a sequence.
pub(crate) fn offset_cursor(reference_name: &str, offset: u64) -> ScanPosition {
    ScanPosition {
        shard_index: 0,
        cursor: Some(IntraShardCursor {
            reference_name: reference_name.to_string(),
            start: offset,
            skip: 0,
        }),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SearchDatasetsRequest;
    use std::time::Duration;

    #[test]
    fn test_region_rules() {
        let fixture = fixtures::build(QueryConfig::default());
        let entry = fixture.engine.registry().get(&fixture.variant_set_id).unwrap();

        assert_eq!(Region::for_search(entry, None, None, None, true).unwrap(), None);
        assert!(matches!(
            Region::for_search(entry, None, Some(5), None, true),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Region::for_search(entry, Some("chr1"), Some(9), Some(3), true),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Region::for_search(entry, Some("chrX"), None, None, false),
            Err(Error::NotFound(_))
        ));
        let region = Region::for_search(entry, Some("chr2"), Some(7), None, false)
            .unwrap()
            .unwrap();
        assert_eq!(region.start, 7);
    }

    #[tokio::test]
    async fn test_load_reads_registered_ontologies() {
        let fixture = fixtures::build(QueryConfig::default());
        let engine = QueryEngine::load(
            fixture.engine.registry.clone(),
            fixture.engine.backends.clone(),
            QueryConfig::default(),
        )
        .await
        .unwrap();
        let map = engine.ontology("so").unwrap();
        assert_eq!(map.len(), 2);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let config = QueryConfig {
            query_timeout: Some(Duration::from_millis(5)),
            ..QueryConfig::default()
        };
        let fixture = fixtures::build(config);
        let err = fixture
            .engine
            .with_deadline(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(5)));
    }

    #[test]
    fn test_listing_token_rejected_after_membership_change() {
        let fixture = fixtures::build(QueryConfig::default());
        let request = SearchDatasetsRequest {
            page_size: Some(1),
            ..Default::default()
        };
        let page = fixture.engine.search_datasets(request).unwrap();
        assert_eq!(page.results.len(), 1);
        assert!(page.next_page_token.is_none());

        let stale = Locator::new("datasets", "other", "q")
            .token_for(&ScanPosition::at_shard(0))
            .unwrap();
        let err = fixture
            .engine
            .search_datasets(SearchDatasetsRequest {
                page_token: Some(stale),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)));
    }

    #[test]
    fn test_response_validation_flags_oversized_page() {
        let config = QueryConfig {
            response_validation: true,
            max_response_length: 10,
            ..QueryConfig::default()
        };
        let fixture = fixtures::build(config);
        assert!(fixture.engine.validate_page(1, 500, 5).is_ok());
        assert!(matches!(
            fixture.engine.validate_page(2, 500, 5),
            Err(Error::Internal(_))
        ));
        assert!(matches!(
            fixture.engine.validate_page(6, 6, 5),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_record_digest_is_stable() {
        assert_eq!(record_digest(&["chr1", "10"]), record_digest(&["chr1", "10"]));
        assert_ne!(record_digest(&["chr1", "10"]), record_digest(&["chr11", "0"]));
        assert_eq!(record_digest(&["x"]).len(), 16);
    }
}
