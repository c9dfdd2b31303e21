//! Catalog searches and lookups. Listings come straight from the registry
//! snapshot in registration order and page by offset.

use super::QueryEngine;
use super::reads::{READ_GROUP_TAG, read_group_id, read_groups};
use super::variants::{CALL_SET_TAG, call_set_id};
use crate::locator::{Locator, listing_fingerprint, query_digest};
use crate::registry::{
    ANNOTATION_FIELD, ASSEMBLY_ID, IS_DERIVED, LENGTH, MD5_CHECKSUM, NCBI_TAXON_ID, ONTOLOGY_MAP,
    ObjectType, REFERENCE_NAMES, REFERENCE_SET_ID, RegistryEntry, SAMPLE_NAMES, SOURCE_ACCESSIONS,
    SOURCE_URI, compound_id,
};
use crate::types::{
    CallSet, Dataset, ReadGroup, ReadGroupSet, Reference, ReferenceSet, SearchCallSetsRequest,
    SearchDatasetsRequest, SearchReadGroupSetsRequest, SearchReferenceSetsRequest,
    SearchReferencesRequest, SearchResponse, SearchVariantAnnotationSetsRequest,
    SearchVariantSetsRequest, VariantAnnotationSet, VariantSet,
};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;

impl QueryEngine {
    /// Page a filtered registry listing. The token is bound to the listing
    /// scope, the filter and every listed entry's fingerprint.
    fn page_entries<T, Q>(
        &self,
        scope: &str,
        entries: Vec<&RegistryEntry>,
        filter: &Q,
        page_size: Option<i64>,
        page_token: Option<&str>,
        view: impl Fn(&RegistryEntry) -> T,
    ) -> Result<SearchResponse<T>>
    where
        T: Serialize,
        Q: Serialize,
    {
        let locator = Locator::new(scope, listing_fingerprint(&entries), query_digest(filter)?);
        let items = entries.into_iter().map(view).collect();
        self.page_items(&locator, items, page_size, page_token)
    }

    pub fn search_datasets(&self, request: SearchDatasetsRequest) -> Result<SearchResponse<Dataset>> {
        let entries = self.registry.list_objects(ObjectType::Dataset, None);
        self.page_entries(
            "datasets",
            entries,
            &(),
            request.page_size,
            request.page_token.as_deref(),
            dataset_view,
        )
    }

    pub fn search_reference_sets(
        &self,
        request: SearchReferenceSetsRequest,
    ) -> Result<SearchResponse<ReferenceSet>> {
        let entries = self
            .registry
            .list_objects(ObjectType::ReferenceSet, None)
            .into_iter()
            .filter(|e| matches_metadata(e, MD5_CHECKSUM, request.md5checksum.as_deref()))
            .filter(|e| matches_metadata(e, ASSEMBLY_ID, request.assembly_id.as_deref()))
            .filter(|e| matches_accession(e, request.accession.as_deref()))
            .collect();
        let filter = (&request.md5checksum, &request.accession, &request.assembly_id);
        self.page_entries(
            "referenceSets",
            entries,
            &filter,
            request.page_size,
            request.page_token.as_deref(),
            reference_set_view,
        )
    }

    pub fn search_references(
        &self,
        request: SearchReferencesRequest,
    ) -> Result<SearchResponse<Reference>> {
        let parent = self
            .registry
            .get_typed(&request.reference_set_id, ObjectType::ReferenceSet)?;
        let entries = self
            .registry
            .list_objects(ObjectType::Reference, Some(&parent.id))
            .into_iter()
            .filter(|e| matches_metadata(e, MD5_CHECKSUM, request.md5checksum.as_deref()))
            .filter(|e| matches_accession(e, request.accession.as_deref()))
            .collect();
        let filter = (&request.md5checksum, &request.accession);
        self.page_entries(
            &parent.id,
            entries,
            &filter,
            request.page_size,
            request.page_token.as_deref(),
            reference_view,
        )
    }

    pub fn search_variant_sets(
        &self,
        request: SearchVariantSetsRequest,
    ) -> Result<SearchResponse<VariantSet>> {
        let dataset = self
            .registry
            .get_typed(&request.dataset_id, ObjectType::Dataset)?;
        let entries = self
            .registry
            .list_objects(ObjectType::VariantSet, Some(&dataset.id));
        self.page_entries(
            &format!("{}/variantSets", dataset.id),
            entries,
            &(),
            request.page_size,
            request.page_token.as_deref(),
            variant_set_view,
        )
    }

    pub fn search_variant_annotation_sets(
        &self,
        request: SearchVariantAnnotationSetsRequest,
    ) -> Result<SearchResponse<VariantAnnotationSet>> {
        let variant_set = self
            .registry
            .get_typed(&request.variant_set_id, ObjectType::VariantSet)?;
        let entries = self
            .registry
            .list_objects(ObjectType::VariantAnnotationSet, Some(&variant_set.id));
        self.page_entries(
            &variant_set.id,
            entries,
            &(),
            request.page_size,
            request.page_token.as_deref(),
            annotation_set_view,
        )
    }

    pub fn search_read_group_sets(
        &self,
        request: SearchReadGroupSetsRequest,
    ) -> Result<SearchResponse<ReadGroupSet>> {
        let dataset = self
            .registry
            .get_typed(&request.dataset_id, ObjectType::Dataset)?;
        let entries = self
            .registry
            .list_objects(ObjectType::ReadGroupSet, Some(&dataset.id))
            .into_iter()
            .filter(|e| request.name.as_deref().is_none_or(|name| e.name == name))
            .collect();
        self.page_entries(
            &format!("{}/readGroupSets", dataset.id),
            entries,
            &request.name,
            request.page_size,
            request.page_token.as_deref(),
            read_group_set_view,
        )
    }

    /// Call sets are the samples of a variant set, in header order.
    pub fn search_call_sets(
        &self,
        request: SearchCallSetsRequest,
    ) -> Result<SearchResponse<CallSet>> {
        let variant_set = self
            .registry
            .get_typed(&request.variant_set_id, ObjectType::VariantSet)?;
        let items = variant_set
            .metadata_strings(SAMPLE_NAMES)
            .into_iter()
            .filter(|sample| request.name.as_deref().is_none_or(|name| sample == name))
            .map(|sample| call_set_view(variant_set, &sample))
            .collect();
        let locator = Locator::for_entry(variant_set, &("callSets", &request.name))?;
        self.page_items(
            &locator,
            items,
            request.page_size,
            request.page_token.as_deref(),
        )
    }

    pub fn get_dataset(&self, id: &str) -> Result<Dataset> {
        self.registry
            .get_typed(id, ObjectType::Dataset)
            .map(dataset_view)
    }

    pub fn get_reference_set(&self, id: &str) -> Result<ReferenceSet> {
        self.registry
            .get_typed(id, ObjectType::ReferenceSet)
            .map(reference_set_view)
    }

    pub fn get_reference(&self, id: &str) -> Result<Reference> {
        self.registry
            .get_typed(id, ObjectType::Reference)
            .map(reference_view)
    }

    pub fn get_variant_set(&self, id: &str) -> Result<VariantSet> {
        self.registry
            .get_typed(id, ObjectType::VariantSet)
            .map(variant_set_view)
    }

    pub fn get_variant_annotation_set(&self, id: &str) -> Result<VariantAnnotationSet> {
        self.registry
            .get_typed(id, ObjectType::VariantAnnotationSet)
            .map(annotation_set_view)
    }

    pub fn get_read_group_set(&self, id: &str) -> Result<ReadGroupSet> {
        self.registry
            .get_typed(id, ObjectType::ReadGroupSet)
            .map(read_group_set_view)
    }

    pub fn get_call_set(&self, id: &str) -> Result<CallSet> {
        let (parent_id, sample) =
            compound_id::split_child(id, CALL_SET_TAG, ObjectType::VariantSet.tag())?;
        let variant_set = self
            .registry
            .get_typed(&parent_id, ObjectType::VariantSet)?;
        if !variant_set.metadata_strings(SAMPLE_NAMES).contains(&sample) {
            return Err(Error::NotFound(format!("no call set with id {:?}", id)));
        }
        Ok(call_set_view(variant_set, &sample))
    }

    pub fn get_read_group(&self, id: &str) -> Result<ReadGroup> {
        let (parent_id, name) =
            compound_id::split_child(id, READ_GROUP_TAG, ObjectType::ReadGroupSet.tag())?;
        let read_group_set = self
            .registry
            .get_typed(&parent_id, ObjectType::ReadGroupSet)?;
        read_group_set_view(read_group_set)
            .read_groups
            .into_iter()
            .find(|rg| rg.name == name)
            .ok_or_else(|| Error::NotFound(format!("no read group with id {:?}", id)))
    }
}

fn matches_metadata(entry: &RegistryEntry, key: &str, wanted: Option<&str>) -> bool {
    wanted.is_none_or(|wanted| entry.metadata_str(key) == Some(wanted))
}

fn matches_accession(entry: &RegistryEntry, wanted: Option<&str>) -> bool {
    wanted.is_none_or(|wanted| {
        entry
            .metadata_strings(SOURCE_ACCESSIONS)
            .iter()
            .any(|a| a == wanted)
    })
}

fn taxon(entry: &RegistryEntry) -> Option<i64> {
    entry.metadata.get(NCBI_TAXON_ID).and_then(Value::as_i64)
}

fn dataset_view(entry: &RegistryEntry) -> Dataset {
    Dataset {
        id: entry.id.clone(),
        name: entry.name.clone(),
        description: entry.description().map(str::to_string),
    }
}

fn reference_set_view(entry: &RegistryEntry) -> ReferenceSet {
    ReferenceSet {
        id: entry.id.clone(),
        name: entry.name.clone(),
        md5checksum: entry.metadata_str(MD5_CHECKSUM).map(str::to_string),
        ncbi_taxon_id: taxon(entry),
        description: entry.description().map(str::to_string),
        assembly_id: entry.metadata_str(ASSEMBLY_ID).map(str::to_string),
        source_uri: entry.metadata_str(SOURCE_URI).map(str::to_string),
        source_accessions: entry.metadata_strings(SOURCE_ACCESSIONS),
        is_derived: entry.metadata_bool(IS_DERIVED).unwrap_or(false),
    }
}

fn reference_view(entry: &RegistryEntry) -> Reference {
    Reference {
        id: entry.id.clone(),
        name: entry.name.clone(),
        length: entry.metadata_u64(LENGTH).unwrap_or(0),
        md5checksum: entry.metadata_str(MD5_CHECKSUM).map(str::to_string),
        ncbi_taxon_id: taxon(entry),
        source_uri: entry.metadata_str(SOURCE_URI).map(str::to_string),
        source_accessions: entry.metadata_strings(SOURCE_ACCESSIONS),
        is_derived: entry.metadata_bool(IS_DERIVED).unwrap_or(false),
        reference_set_id: entry.parent_id.clone().unwrap_or_default(),
    }
}

fn variant_set_view(entry: &RegistryEntry) -> VariantSet {
    VariantSet {
        id: entry.id.clone(),
        name: entry.name.clone(),
        dataset_id: entry.parent_id.clone().unwrap_or_default(),
        reference_set_id: entry.metadata_str(REFERENCE_SET_ID).map(str::to_string),
        reference_names: entry.metadata_strings(REFERENCE_NAMES),
    }
}

fn annotation_set_view(entry: &RegistryEntry) -> VariantAnnotationSet {
    VariantAnnotationSet {
        id: entry.id.clone(),
        name: entry.name.clone(),
        variant_set_id: entry.parent_id.clone().unwrap_or_default(),
        annotation_field: entry
            .metadata_str(ANNOTATION_FIELD)
            .unwrap_or("ANN")
            .to_string(),
        ontology_map: entry.metadata_str(ONTOLOGY_MAP).map(str::to_string),
    }
}

fn call_set_view(variant_set: &RegistryEntry, sample: &str) -> CallSet {
    CallSet {
        id: call_set_id(&variant_set.id, sample),
        name: sample.to_string(),
        sample_id: sample.to_string(),
        variant_set_ids: vec![variant_set.id.clone()],
    }
}

fn read_group_set_view(entry: &RegistryEntry) -> ReadGroupSet {
    let dataset_id = entry.parent_id.clone().unwrap_or_default();
    let read_groups = read_groups(entry)
        .into_iter()
        .map(|rg| ReadGroup {
            id: read_group_id(&entry.id, &rg.id),
            name: rg.id,
            dataset_id: dataset_id.clone(),
            read_group_set_id: entry.id.clone(),
            sample_name: rg.sample,
        })
        .collect();
    ReadGroupSet {
        id: entry.id.clone(),
        name: entry.name.clone(),
        dataset_id,
        reference_set_id: entry.metadata_str(REFERENCE_SET_ID).map(str::to_string),
        read_groups,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryConfig;
    use crate::query::fixtures;

    #[test]
    fn test_lookups_by_id() {
        let fixture = fixtures::build(QueryConfig::default());
        let engine = &fixture.engine;
        assert_eq!(engine.get_dataset(&fixture.dataset_id).unwrap().name, "d1");
        assert_eq!(
            engine.get_variant_set(&fixture.variant_set_id).unwrap().reference_names,
            vec!["chr1", "chr2"]
        );
        assert!(matches!(
            engine.get_dataset(&fixture.variant_set_id),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(engine.get_reference_set("garbage"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_references_of_set() {
        let fixture = fixtures::build(QueryConfig::default());
        let page = fixture
            .engine
            .search_references(SearchReferencesRequest {
                reference_set_id: fixture.reference_set_id.clone(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].name, "chr1");
        assert_eq!(page.results[0].length, 25);
        assert_eq!(page.results[0].reference_set_id, fixture.reference_set_id);

        let filtered = fixture
            .engine
            .search_references(SearchReferencesRequest {
                reference_set_id: fixture.reference_set_id.clone(),
                md5checksum: Some("nope".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(filtered.results.is_empty());
    }

    #[test]
    fn test_reference_sets_by_accession() {
        let fixture = fixtures::build(QueryConfig::default());
        let found = fixture
            .engine
            .search_reference_sets(SearchReferenceSetsRequest {
                accession: Some("GCA_1".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(found.results.len(), 1);
        assert_eq!(found.results[0].assembly_id.as_deref(), Some("GRCh38"));
    }

    #[test]
    fn test_call_sets_page_and_resolve() {
        let fixture = fixtures::build(QueryConfig::default());
        let mut request = SearchCallSetsRequest {
            variant_set_id: fixture.variant_set_id.clone(),
            page_size: Some(1),
            ..Default::default()
        };
        let first = fixture.engine.search_call_sets(request.clone()).unwrap();
        assert_eq!(first.results[0].name, "s1");
        request.page_token = first.next_page_token;
        let second = fixture.engine.search_call_sets(request).unwrap();
        assert_eq!(second.results[0].name, "s2");
        assert!(second.next_page_token.is_none());

        let call_set = fixture.engine.get_call_set(&second.results[0].id).unwrap();
        assert_eq!(call_set.variant_set_ids, vec![fixture.variant_set_id.clone()]);
    }

    #[test]
    fn test_read_group_sets_carry_read_groups() {
        let fixture = fixtures::build(QueryConfig::default());
        let page = fixture
            .engine
            .search_read_group_sets(SearchReadGroupSetsRequest {
                dataset_id: fixture.dataset_id.clone(),
                ..Default::default()
            })
            .unwrap();
        let read_groups = &page.results[0].read_groups;
        assert_eq!(read_groups.len(), 2);
        assert_eq!(read_groups[0].sample_name.as_deref(), Some("s1"));

        let fetched = fixture.engine.get_read_group(&read_groups[1].id).unwrap();
        assert_eq!(fetched.name, "rgB");
    }

    #[test]
    fn test_annotation_sets_of_variant_set() {
        let fixture = fixtures::build(QueryConfig::default());
        let page = fixture
            .engine
            .search_variant_annotation_sets(SearchVariantAnnotationSetsRequest {
                variant_set_id: fixture.variant_set_id.clone(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].id, fixture.annotation_set_id);
        assert_eq!(page.results[0].ontology_map.as_deref(), Some("so"));
    }
}
