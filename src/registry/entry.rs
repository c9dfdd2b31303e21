use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Structured key/value metadata attached to a registry entry.
pub type Metadata = BTreeMap<String, Value>;

pub const DESCRIPTION: &str = "description";
pub const SAMPLE_NAMES: &str = "sampleNames";
pub const REFERENCE_NAMES: &str = "referenceNames";
pub const READ_GROUPS: &str = "readGroups";
pub const REFERENCE_SET_ID: &str = "referenceSetId";
pub const ONTOLOGY_MAP: &str = "ontologyMap";
pub const ANNOTATION_FIELD: &str = "annotationField";
pub const LENGTH: &str = "length";
pub const MD5_CHECKSUM: &str = "md5checksum";
pub const ASSEMBLY_ID: &str = "assemblyId";
pub const SOURCE_URI: &str = "sourceUri";
pub const SOURCE_ACCESSIONS: &str = "sourceAccessions";
pub const NCBI_TAXON_ID: &str = "ncbiTaxonId";
pub const IS_DERIVED: &str = "isDerived";

/// Kinds of object the registry knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Dataset,
    ReferenceSet,
    Reference,
    VariantSet,
    VariantAnnotationSet,
    ReadGroupSet,
    OntologyMap,
}

impl ObjectType {
    pub const ALL: [ObjectType; 7] = [
        ObjectType::OntologyMap,
        ObjectType::ReferenceSet,
        ObjectType::Reference,
        ObjectType::Dataset,
        ObjectType::VariantSet,
        ObjectType::VariantAnnotationSet,
        ObjectType::ReadGroupSet,
    ];

    /// Short tag folded into compound ids so that objects of different
    /// types with the same name never share an id.
    pub fn tag(&self) -> &'static str {
        match self {
            ObjectType::Dataset => "ds",
            ObjectType::ReferenceSet => "rs",
            ObjectType::Reference => "ref",
            ObjectType::VariantSet => "vs",
            ObjectType::VariantAnnotationSet => "vas",
            ObjectType::ReadGroupSet => "rgs",
            ObjectType::OntologyMap => "om",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ObjectType::Dataset => "dataset",
            ObjectType::ReferenceSet => "reference set",
            ObjectType::Reference => "reference",
            ObjectType::VariantSet => "variant set",
            ObjectType::VariantAnnotationSet => "variant annotation set",
            ObjectType::ReadGroupSet => "read group set",
            ObjectType::OntologyMap => "ontology map",
        }
    }

    /// The type an entry of this type must hang off, if any.
    pub fn parent_type(&self) -> Option<ObjectType> {
        match self {
            ObjectType::Dataset | ObjectType::ReferenceSet | ObjectType::OntologyMap => None,
            ObjectType::Reference => Some(ObjectType::ReferenceSet),
            ObjectType::VariantSet | ObjectType::ReadGroupSet => Some(ObjectType::Dataset),
            ObjectType::VariantAnnotationSet => Some(ObjectType::VariantSet),
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How source files are brought under the repository root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MoveMode {
    /// Relocate the source, copying then deleting across filesystems
    Move,
    /// Duplicate the bytes, leaving the source untouched
    #[default]
    Copy,
    /// Symlink to the source; breaks if the source is deleted
    Link,
}

/// One physical indexed file contributing records to an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardEntry {
    pub relative_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_relative_path: Option<String>,
    /// Reference sequences known to have records in this shard. Empty means
    /// unknown, in which case the shard is never skipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    pub relative_path: String,
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_mode: Option<MoveMode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shards: Vec<ShardEntry>,
    /// Paths under the root owned by this entry, deleted on removal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_paths: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RegistryEntry {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(Value::as_u64)
    }

    pub fn metadata_bool(&self, key: &str) -> Option<bool> {
        self.metadata.get(key).and_then(Value::as_bool)
    }

    pub fn metadata_strings(&self, key: &str) -> Vec<String> {
        self.metadata
            .get(key)
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn description(&self) -> Option<&str> {
        self.metadata_str(DESCRIPTION)
    }
}
