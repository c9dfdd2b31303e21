use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Paged search response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse<T> {
    pub results: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    /// Shards that could not be read; present only for partial results.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable_shards: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSet {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ncbi_taxon_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assembly_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    pub source_accessions: Vec<String>,
    pub is_derived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub id: String,
    pub name: String,
    pub length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ncbi_taxon_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    pub source_accessions: Vec<String>,
    pub is_derived: bool,
    pub reference_set_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSet {
    pub id: String,
    pub name: String,
    pub dataset_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_set_id: Option<String>,
    pub reference_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantAnnotationSet {
    pub id: String,
    pub name: String,
    pub variant_set_id: String,
    pub annotation_field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ontology_map: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSet {
    pub id: String,
    pub name: String,
    pub sample_id: String,
    pub variant_set_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadGroup {
    pub id: String,
    pub name: String,
    pub dataset_id: String,
    pub read_group_set_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadGroupSet {
    pub id: String,
    pub name: String,
    pub dataset_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_set_id: Option<String>,
    pub read_groups: Vec<ReadGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub call_set_id: String,
    pub call_set_name: String,
    pub genotype: Vec<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phaseset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub variant_set_id: String,
    pub reference_name: String,
    pub start: u64,
    pub end: u64,
    pub names: Vec<String>,
    pub reference_bases: String,
    pub alternate_bases: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f32>,
    pub filters_applied: bool,
    pub filters_passed: bool,
    pub filters_failed: Vec<String>,
    pub info: BTreeMap<String, Vec<String>>,
    pub calls: Vec<Call>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OntologyTerm {
    pub term_id: String,
    pub term: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEffect {
    pub alternate_bases: String,
    pub effects: Vec<OntologyTerm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gene_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gene_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantAnnotation {
    pub id: String,
    pub variant_id: String,
    pub variant_annotation_set_id: String,
    pub reference_name: String,
    pub start: u64,
    pub end: u64,
    pub transcript_effects: Vec<TranscriptEffect>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadAlignment {
    pub id: String,
    pub read_group_id: String,
    pub fragment_name: String,
    pub reference_name: String,
    pub start: u64,
    pub end: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_quality: Option<u8>,
    pub flags: u16,
    pub aligned_sequence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListReferenceBasesResponse {
    pub offset: u64,
    pub sequence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Field names a request type accepts, for strict validation.
pub trait RequestFields {
    const FIELDS: &'static [&'static str];
}

/// Deserialize a request body. In strict mode unknown fields are rejected;
/// otherwise they are ignored.
pub fn parse_request<T>(body: Value, strict: bool) -> Result<T>
where
    T: DeserializeOwned + RequestFields,
{
    if strict {
        if let Value::Object(fields) = &body {
            if let Some(unknown) = fields.keys().find(|k| !T::FIELDS.contains(&k.as_str())) {
                return Err(Error::InvalidInput(format!("unknown request field {:?}", unknown)));
            }
        }
    }
    serde_json::from_value(body).map_err(|e| Error::InvalidInput(format!("invalid request: {}", e)))
}

macro_rules! request {
    (
        $(#[$meta:meta])*
        pub struct $name:ident { $($field:ident : $ty:ty => $json:literal),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase", default)]
        pub struct $name {
            $(pub $field: $ty,)*
            pub page_size: Option<i64>,
            pub page_token: Option<String>,
        }

        impl RequestFields for $name {
            const FIELDS: &'static [&'static str] = &[$($json,)* "pageSize", "pageToken"];
        }
    };
}

request! {
    pub struct SearchDatasetsRequest {}
}

request! {
    pub struct SearchReferenceSetsRequest {
        md5checksum: Option<String> => "md5checksum",
        accession: Option<String> => "accession",
        assembly_id: Option<String> => "assemblyId",
    }
}

request! {
    pub struct SearchReferencesRequest {
        reference_set_id: String => "referenceSetId",
        md5checksum: Option<String> => "md5checksum",
        accession: Option<String> => "accession",
    }
}

request! {
    pub struct SearchVariantSetsRequest {
        dataset_id: String => "datasetId",
    }
}

request! {
    pub struct SearchVariantAnnotationSetsRequest {
        variant_set_id: String => "variantSetId",
    }
}

request! {
    pub struct SearchCallSetsRequest {
        variant_set_id: String => "variantSetId",
        name: Option<String> => "name",
    }
}

request! {
    pub struct SearchReadGroupSetsRequest {
        dataset_id: String => "datasetId",
        name: Option<String> => "name",
    }
}

request! {
    /// `callSetIds` absent means every call set; an empty list means none.
    pub struct SearchVariantsRequest {
        variant_set_id: String => "variantSetId",
        reference_name: Option<String> => "referenceName",
        start: Option<u64> => "start",
        end: Option<u64> => "end",
        call_set_ids: Option<Vec<String>> => "callSetIds",
    }
}

request! {
    /// `effects` are ontology term ids; an annotation matches if any of its
    /// transcript effects carries one of them.
    pub struct SearchVariantAnnotationsRequest {
        variant_annotation_set_id: String => "variantAnnotationSetId",
        reference_name: Option<String> => "referenceName",
        start: Option<u64> => "start",
        end: Option<u64> => "end",
        effects: Vec<String> => "effects",
    }
}

request! {
    pub struct SearchReadsRequest {
        read_group_set_id: String => "readGroupSetId",
        read_group_ids: Vec<String> => "readGroupIds",
        reference_name: Option<String> => "referenceName",
        start: Option<u64> => "start",
        end: Option<u64> => "end",
    }
}

/// Query parameters for listing reference bases
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListReferenceBasesRequest {
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub page_token: Option<String>,
}

impl RequestFields for ListReferenceBasesRequest {
    const FIELDS: &'static [&'static str] = &["start", "end", "pageToken"];
}

/// Service info response (GA4GH service-info spec)
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub r#type: ServiceType,
    pub description: Option<String>,
    pub organization: Organization,
    pub version: String,
    pub capabilities: Capabilities,
}

#[derive(Debug, Serialize)]
pub struct ServiceType {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct Organization {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub max_response_length: usize,
    pub strict_request_validation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strict_rejects_unknown_fields() {
        let body = json!({"variantSetId": "x", "bogus": 1});
        let err = parse_request::<SearchVariantsRequest>(body.clone(), true).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let request: SearchVariantsRequest = parse_request(body, false).unwrap();
        assert_eq!(request.variant_set_id, "x");
    }

    #[test]
    fn test_call_set_ids_absent_vs_empty() {
        let all: SearchVariantsRequest =
            parse_request(json!({"variantSetId": "x"}), true).unwrap();
        assert!(all.call_set_ids.is_none());
        let none: SearchVariantsRequest =
            parse_request(json!({"variantSetId": "x", "callSetIds": []}), true).unwrap();
        assert_eq!(none.call_set_ids, Some(vec![]));
    }

    #[test]
    fn test_response_omits_empty_marker() {
        let response = SearchResponse::<Dataset> {
            results: vec![],
            next_page_token: None,
            unavailable_shards: vec![],
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({"results": []}));
    }
}
