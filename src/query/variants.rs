use super::scan::{ScanRequest, scan};
use super::{QueryEngine, Region, record_digest};
use crate::formats::{OntologyMap, VariantRecord};
use crate::locator::{Locator, ScanPosition};
use crate::registry::{
    ANNOTATION_FIELD, ONTOLOGY_MAP, ObjectType, RegistryEntry, SAMPLE_NAMES, compound_id,
};
use crate::types::{
    Call, OntologyTerm, SearchResponse, SearchVariantAnnotationsRequest, SearchVariantsRequest,
    TranscriptEffect, Variant, VariantAnnotation,
};
use crate::{Error, Result};
use std::collections::HashSet;

pub(crate) const CALL_SET_TAG: &str = "cs";
const VARIANT_TAG: &str = "var";
const ANNOTATION_TAG: &str = "va";

impl QueryEngine {
    pub async fn search_variants(
        &self,
        request: SearchVariantsRequest,
    ) -> Result<SearchResponse<Variant>> {
        self.with_deadline(self.run_variant_search(request)).await
    }

    async fn run_variant_search(
        &self,
        request: SearchVariantsRequest,
    ) -> Result<SearchResponse<Variant>> {
        let entry = self
            .registry
            .get_typed(&request.variant_set_id, ObjectType::VariantSet)?;
        let page_size = self.config.effective_page_size(request.page_size)?;
        let region = Region::for_search(
            entry,
            request.reference_name.as_deref(),
            request.start,
            request.end,
            self.config.request_validation,
        )?;
        let selected = match &request.call_set_ids {
            Some(ids) => Some(resolve_call_sets(entry, ids)?),
            None => None,
        };

        let mut selected_names: Option<Vec<&String>> =
            selected.as_ref().map(|s| s.iter().collect());
        if let Some(names) = selected_names.as_mut() {
            names.sort();
        }
        let locator = Locator::for_entry(entry, &("variants", &region, &selected_names))?;
        let start = locator.resume(request.page_token.as_deref())?;

        let shards = self.registry.shard_locations(entry)?;
        let references: Vec<Vec<String>> =
            entry.shards.iter().map(|s| s.reference_names.clone()).collect();
        let outcome = scan(
            self.backends.variants.as_ref(),
            ScanRequest {
                shards: &shards,
                shard_references: &references,
                region: region.as_ref(),
                page_size,
                max_response_length: self.config.max_response_length,
                start,
            },
            |record: &VariantRecord| Some(variant_view(entry, record, selected.as_ref())),
        )
        .await?;

        tracing::debug!(
            "variant set {}: {} variants, more: {}",
            entry.name,
            outcome.records.len(),
            outcome.next.is_some()
        );
        self.finish_scan(&locator, outcome, page_size)
    }

    /// Resolve a variant id: seek its shard to the recorded position and
    /// return the record there whose alleles match the id's digest.
    pub async fn get_variant(&self, id: &str) -> Result<Variant> {
        self.with_deadline(self.find_variant(id)).await
    }

    async fn find_variant(&self, id: &str) -> Result<Variant> {
        let not_found = || Error::NotFound(format!("no variant with id {:?}", id));
        let (variant_set_id, names) =
            compound_id::split_child_names(id, VARIANT_TAG, ObjectType::VariantSet.tag(), 3)?;
        let [reference_name, start, digest] =
            <[String; 3]>::try_from(names).map_err(|_| not_found())?;
        let start: u64 = start.parse().map_err(|_| not_found())?;
        let entry = self
            .registry
            .get_typed(&variant_set_id, ObjectType::VariantSet)
            .map_err(|_| not_found())?;
        let region = Region {
            reference_name,
            start,
            end: Some(start.saturating_add(1)),
        };

        let shards = self.registry.shard_locations(entry)?;
        let references: Vec<Vec<String>> =
            entry.shards.iter().map(|s| s.reference_names.clone()).collect();
        let outcome = scan(
            self.backends.variants.as_ref(),
            ScanRequest {
                shards: &shards,
                shard_references: &references,
                region: Some(&region),
                page_size: 1,
                max_response_length: self.config.max_response_length,
                start: ScanPosition::at_shard(0),
            },
            |record: &VariantRecord| {
                (record.start == start && allele_digest(record) == digest)
                    .then(|| variant_view(entry, record, None))
            },
        )
        .await?;

        match outcome.records.into_iter().next() {
            Some(variant) => Ok(variant),
            // the record may sit in a shard that could not be read
            None if !outcome.unavailable_shards.is_empty() => Err(Error::BackendUnavailable(
                format!(
                    "variant {:?} not found; shards {:?} unavailable",
                    id, outcome.unavailable_shards
                ),
            )),
            None => Err(not_found()),
        }
    }

    pub async fn search_variant_annotations(
        &self,
        request: SearchVariantAnnotationsRequest,
    ) -> Result<SearchResponse<VariantAnnotation>> {
        self.with_deadline(self.run_annotation_search(request)).await
    }

    async fn run_annotation_search(
        &self,
        request: SearchVariantAnnotationsRequest,
    ) -> Result<SearchResponse<VariantAnnotation>> {
        let entry = self.registry.get_typed(
            &request.variant_annotation_set_id,
            ObjectType::VariantAnnotationSet,
        )?;
        let variant_set = entry
            .parent_id
            .as_deref()
            .map(|id| self.registry.get_typed(id, ObjectType::VariantSet))
            .transpose()?
            .ok_or_else(|| Error::Internal(format!("{} has no variant set", entry.name)))?;
        let page_size = self.config.effective_page_size(request.page_size)?;
        let region = Region::for_search(
            variant_set,
            request.reference_name.as_deref(),
            request.start,
            request.end,
            self.config.request_validation,
        )?;

        let ontology = entry
            .metadata_str(ONTOLOGY_MAP)
            .and_then(|name| self.ontology(name));
        let mut effects: Vec<String> = Vec::with_capacity(request.effects.len());
        for id in &request.effects {
            match ontology.and_then(|map| map.term(id)) {
                Some(term) => effects.push(term.id.clone()),
                None => {
                    return Err(Error::NotFound(format!("unknown ontology term {:?}", id)));
                }
            }
        }
        effects.sort();
        effects.dedup();

        let field = entry.metadata_str(ANNOTATION_FIELD).unwrap_or("ANN");
        let locator = Locator::for_entry(entry, &("annotations", &region, &effects))?;
        let start = locator.resume(request.page_token.as_deref())?;

        let shards = self.registry.shard_locations(entry)?;
        let references: Vec<Vec<String>> =
            entry.shards.iter().map(|s| s.reference_names.clone()).collect();
        let outcome = scan(
            self.backends.variants.as_ref(),
            ScanRequest {
                shards: &shards,
                shard_references: &references,
                region: region.as_ref(),
                page_size,
                max_response_length: self.config.max_response_length,
                start,
            },
            |record: &VariantRecord| {
                let annotation =
                    annotation_view(entry, variant_set, record, field, ontology)?;
                let wanted = effects.is_empty()
                    || annotation.transcript_effects.iter().any(|effect| {
                        effect
                            .effects
                            .iter()
                            .any(|term| effects.contains(&term.term_id))
                    });
                wanted.then_some(annotation)
            },
        )
        .await?;

        self.finish_scan(&locator, outcome, page_size)
    }
}

/// Map call set ids onto sample names of `entry`; any id that does not
/// name one of its samples is `NotFound`.
fn resolve_call_sets(entry: &RegistryEntry, ids: &[String]) -> Result<HashSet<String>> {
    let samples = entry.metadata_strings(SAMPLE_NAMES);
    let mut selected = HashSet::new();
    for id in ids {
        let found = compound_id::split_child(id, CALL_SET_TAG, ObjectType::VariantSet.tag())
            .ok()
            .filter(|(parent, name)| *parent == entry.id && samples.contains(name));
        match found {
            Some((_, name)) => {
                selected.insert(name);
            }
            None => return Err(Error::NotFound(format!("unknown call set {:?}", id))),
        }
    }
    Ok(selected)
}

pub(crate) fn call_set_id(variant_set_id: &str, sample: &str) -> String {
    compound_id::child(CALL_SET_TAG, variant_set_id, &[sample])
        .unwrap_or_else(|_| compound_id::encode(&[CALL_SET_TAG, sample]))
}

fn allele_digest(record: &VariantRecord) -> String {
    let mut alleles = vec![record.reference_bases.as_str()];
    alleles.extend(record.alternate_bases.iter().map(String::as_str));
    record_digest(&alleles)
}

fn variant_id(entry: &RegistryEntry, tag: &str, record: &VariantRecord) -> String {
    let start = record.start.to_string();
    let digest = allele_digest(record);
    compound_id::child(tag, &entry.id, &[&record.reference_name, &start, &digest])
        .unwrap_or_else(|_| compound_id::encode(&[tag, &record.reference_name, &start, &digest]))
}

fn variant_view(
    entry: &RegistryEntry,
    record: &VariantRecord,
    selected: Option<&HashSet<String>>,
) -> Variant {
    let calls = record
        .calls
        .iter()
        .filter(|call| selected.is_none_or(|s| s.contains(&call.sample)))
        .map(|call| Call {
            call_set_id: call_set_id(&entry.id, &call.sample),
            call_set_name: call.sample.clone(),
            genotype: call.genotype.clone(),
            phaseset: call.phased.then(|| "*".to_string()),
        })
        .collect();

    let filters_failed: Vec<String> = record
        .filters
        .iter()
        .filter(|f| f.as_str() != "PASS")
        .cloned()
        .collect();

    Variant {
        id: variant_id(entry, VARIANT_TAG, record),
        variant_set_id: entry.id.clone(),
        reference_name: record.reference_name.clone(),
        start: record.start,
        end: record.end,
        names: record.ids.clone(),
        reference_bases: record.reference_bases.clone(),
        alternate_bases: record.alternate_bases.clone(),
        quality: record.quality,
        filters_applied: !record.filters.is_empty(),
        filters_passed: !record.filters.is_empty() && filters_failed.is_empty(),
        filters_failed,
        info: record.info.clone(),
        calls,
    }
}

/// Build the annotation for a record, or `None` when it carries no
/// annotation field.
fn annotation_view(
    entry: &RegistryEntry,
    variant_set: &RegistryEntry,
    record: &VariantRecord,
    field: &str,
    ontology: Option<&OntologyMap>,
) -> Option<VariantAnnotation> {
    let values = record.info.get(field)?;
    let transcript_effects: Vec<TranscriptEffect> = values
        .iter()
        .flat_map(|value| value.split(','))
        .filter(|value| !value.is_empty())
        .map(|value| parse_transcript_effect(value, ontology))
        .collect();
    if transcript_effects.is_empty() {
        return None;
    }
    Some(VariantAnnotation {
        id: variant_id(entry, ANNOTATION_TAG, record),
        variant_id: variant_id(variant_set, VARIANT_TAG, record),
        variant_annotation_set_id: entry.id.clone(),
        reference_name: record.reference_name.clone(),
        start: record.start,
        end: record.end,
        transcript_effects,
    })
}

/// Parse one `ANN`/`CSQ` entry. Both put allele, consequences, impact,
/// gene name, gene id, feature type and feature id in the first seven
/// `|`-separated slots; consequences are `&`-separated.
fn parse_transcript_effect(value: &str, ontology: Option<&OntologyMap>) -> TranscriptEffect {
    let fields: Vec<&str> = value.split('|').collect();
    let slot = |i: usize| {
        fields
            .get(i)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let effects = fields
        .get(1)
        .map(|s| {
            s.split('&')
                .filter(|term| !term.is_empty())
                .map(|term| match ontology.and_then(|map| map.id_for_term(term)) {
                    Some(found) => OntologyTerm {
                        term_id: found.id.clone(),
                        term: found.term.clone(),
                    },
                    None => OntologyTerm {
                        term_id: String::new(),
                        term: term.to_string(),
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    TranscriptEffect {
        alternate_bases: slot(0).unwrap_or_default(),
        effects,
        impact: slot(2),
        gene_name: slot(3),
        gene_id: slot(4),
        feature_type: slot(5),
        feature_id: slot(6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryConfig;
    use crate::query::fixtures;

    fn request(fixture: &fixtures::Fixture) -> SearchVariantsRequest {
        SearchVariantsRequest {
            variant_set_id: fixture.variant_set_id.clone(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pages_cross_shards() {
        let fixture = fixtures::build(QueryConfig::default());
        let mut req = request(&fixture);
        req.page_size = Some(40);

        let mut sizes = Vec::new();
        let mut starts = Vec::new();
        loop {
            let page = fixture.engine.search_variants(req.clone()).await.unwrap();
            sizes.push(page.results.len());
            starts.extend(page.results.iter().map(|v| (v.reference_name.clone(), v.start)));
            match page.next_page_token {
                Some(token) => req.page_token = Some(token),
                None => break,
            }
        }
        assert_eq!(sizes, vec![40, 40, 40, 30]);
        assert_eq!(starts.len(), 150);
        assert_eq!(starts[99], ("chr1".to_string(), 990));
        assert_eq!(starts[100], ("chr2".to_string(), 0));
    }

    #[tokio::test]
    async fn test_call_set_restriction() {
        let fixture = fixtures::build(QueryConfig::default());
        let mut req = request(&fixture);
        req.page_size = Some(1);
        req.call_set_ids = Some(vec![call_set_id(&fixture.variant_set_id, "s2")]);
        let page = fixture.engine.search_variants(req.clone()).await.unwrap();
        let calls = &page.results[0].calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call_set_name, "s2");
        assert_eq!(calls[0].phaseset.as_deref(), Some("*"));

        req.call_set_ids = Some(vec![]);
        let page = fixture.engine.search_variants(req.clone()).await.unwrap();
        assert!(page.results[0].calls.is_empty());

        req.call_set_ids = Some(vec![call_set_id(&fixture.variant_set_id, "nobody")]);
        let err = fixture.engine.search_variants(req).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_region_search_skips_other_shard() {
        let fixture = fixtures::build(QueryConfig::default());
        let mut req = request(&fixture);
        req.reference_name = Some("chr2".to_string());
        req.start = Some(100);
        req.end = Some(150);
        let page = fixture.engine.search_variants(req).await.unwrap();
        let starts: Vec<u64> = page.results.iter().map(|v| v.start).collect();
        assert_eq!(starts, vec![100, 110, 120, 130, 140]);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_token_bound_to_filter() {
        let fixture = fixtures::build(QueryConfig::default());
        let mut req = request(&fixture);
        req.page_size = Some(5);
        let page = fixture.engine.search_variants(req.clone()).await.unwrap();

        req.reference_name = Some("chr1".to_string());
        req.page_token = page.next_page_token;
        let err = fixture.engine.search_variants(req).await.unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_filters_summarised() {
        let fixture = fixtures::build(QueryConfig::default());
        let mut req = request(&fixture);
        req.page_size = Some(1);
        let variant = &fixture.engine.search_variants(req).await.unwrap().results[0];
        assert!(variant.filters_applied);
        assert!(variant.filters_passed);
        assert!(variant.filters_failed.is_empty());
        assert_eq!(variant.variant_set_id, fixture.variant_set_id);
    }

    #[tokio::test]
    async fn test_annotations_filtered_by_effect() {
        let fixture = fixtures::build(QueryConfig::default());
        let req = SearchVariantAnnotationsRequest {
            variant_annotation_set_id: fixture.annotation_set_id.clone(),
            reference_name: Some("chr1".to_string()),
            start: Some(0),
            end: Some(60),
            effects: vec!["SO:0001819".to_string()],
            ..Default::default()
        };
        let page = fixture.engine.search_variant_annotations(req.clone()).await.unwrap();
        let starts: Vec<u64> = page.results.iter().map(|a| a.start).collect();
        assert_eq!(starts, vec![10, 40]);
        let effect = &page.results[0].transcript_effects[0];
        assert_eq!(effect.gene_name.as_deref(), Some("GENE2"));
        assert_eq!(effect.effects[0].term_id, "SO:0001819");
        assert_eq!(effect.effects[1].term, "missense_variant");

        let mut unknown = req;
        unknown.effects = vec!["SO:9999999".to_string()];
        let err = fixture.engine.search_variant_annotations(unknown).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unannotated_records_skipped() {
        let fixture = fixtures::build(QueryConfig::default());
        let req = SearchVariantAnnotationsRequest {
            variant_annotation_set_id: fixture.annotation_set_id.clone(),
            reference_name: Some("chr1".to_string()),
            end: Some(60),
            ..Default::default()
        };
        let page = fixture.engine.search_variant_annotations(req).await.unwrap();
        let starts: Vec<u64> = page.results.iter().map(|a| a.start).collect();
        assert_eq!(starts, vec![0, 10, 30, 40]);
    }

    #[tokio::test]
    async fn test_get_variant_resolves_search_ids() {
        let fixture = fixtures::build(QueryConfig::default());
        let mut req = request(&fixture);
        req.reference_name = Some("chr2".to_string());
        req.start = Some(100);
        req.end = Some(150);
        let page = fixture.engine.search_variants(req).await.unwrap();
        for variant in &page.results {
            assert_eq!(&fixture.engine.get_variant(&variant.id).await.unwrap(), variant);
        }

        let req = SearchVariantAnnotationsRequest {
            variant_annotation_set_id: fixture.annotation_set_id.clone(),
            page_size: Some(3),
            ..Default::default()
        };
        let page = fixture.engine.search_variant_annotations(req).await.unwrap();
        for annotation in &page.results {
            let variant = fixture.engine.get_variant(&annotation.variant_id).await.unwrap();
            assert_eq!(variant.start, annotation.start);
            assert_eq!(variant.reference_name, annotation.reference_name);
        }
    }

    #[tokio::test]
    async fn test_get_variant_requires_matching_alleles() {
        let fixture = fixtures::build(QueryConfig::default());
        let vs = &fixture.variant_set_id;
        let digest = record_digest(&["A", "T"]);
        let found = compound_id::child(VARIANT_TAG, vs, &["chr1", "20", &digest]).unwrap();
        assert_eq!(fixture.engine.get_variant(&found).await.unwrap().start, 20);

        let other_alleles = record_digest(&["A", "C"]);
        let between_records = compound_id::child(VARIANT_TAG, vs, &["chr1", "25", &digest]).unwrap();
        let bad_start = compound_id::child(VARIANT_TAG, vs, &["chr1", "x", &digest]).unwrap();
        let unknown_set = compound_id::child(VARIANT_TAG, &fixture.dataset_id, &["chr1", "20", &digest]).unwrap();
        for id in [
            compound_id::child(VARIANT_TAG, vs, &["chr1", "20", &other_alleles]).unwrap(),
            between_records,
            bad_start,
            unknown_set,
            call_set_id(vs, "s1"),
            "garbage".to_string(),
        ] {
            let err = fixture.engine.get_variant(&id).await.unwrap_err();
            assert!(matches!(err, Error::NotFound(_)), "{id}: {err:?}");
        }
    }

    #[test]
    fn test_parse_csq_slots() {
        let effect = parse_transcript_effect("G|stop_gained|HIGH|BRCA2|ENSG1|Transcript|ENST1|x", None);
        assert_eq!(effect.alternate_bases, "G");
        assert_eq!(effect.impact.as_deref(), Some("HIGH"));
        assert_eq!(effect.feature_id.as_deref(), Some("ENST1"));
        assert_eq!(effect.effects[0].term, "stop_gained");
        assert!(effect.effects[0].term_id.is_empty());
    }
}
