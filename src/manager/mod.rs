//! Repository manager: the offline, single-writer operations that build and
//! maintain a repository.
//!
//! Every add-* operation inspects its sources first, so nothing is
//! transferred until the files are known to be well formed, then hands one
//! [`AddRequest`] to the store, which applies it all-or-nothing.

use crate::formats::{FormatInspector, NoodlesInspector, OntologyMap, VariantShardSummary};
use crate::registry::{
    ANNOTATION_FIELD, AddRequest, ChildSpec, DESCRIPTION, Document, FileKind, LENGTH, Layout,
    Metadata, MoveMode, ONTOLOGY_MAP, ObjectType, Problem, READ_GROUPS, REFERENCE_NAMES,
    REFERENCE_SET_ID, RegistryEntry, RegistryStore, SAMPLE_NAMES, ShardSource, ValidatedSource,
    natural_cmp,
};
use crate::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Key of the per-reference section in a reference set sidecar.
const SIDECAR_REFERENCES: &str = "references";

/// One line of `list` output.
#[derive(Debug, Clone, PartialEq)]
pub struct ListedObject {
    pub depth: usize,
    pub entry: RegistryEntry,
}

/// Optional knobs shared by the add-* operations.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Name to register under; derived from the source file name if unset.
    pub name: Option<String>,
    pub move_mode: MoveMode,
    pub description: Option<String>,
    /// Reference set the data was aligned or called against.
    pub reference_set: Option<String>,
    /// Ontology map used to resolve annotation effect terms.
    pub ontology_map: Option<String>,
}

pub struct RepoManager {
    root: PathBuf,
    inspector: Arc<dyn FormatInspector>,
}

impl RepoManager {
    pub fn new(root: impl Into<PathBuf>, inspector: Arc<dyn FormatInspector>) -> Self {
        Self {
            root: root.into(),
            inspector,
        }
    }

    /// Manager reading real files through noodles.
    pub fn noodles(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Arc::new(NoodlesInspector))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn open(&self) -> Result<RegistryStore> {
        RegistryStore::open(&self.root)
    }

    pub fn init(&self) -> Result<()> {
        RegistryStore::initialize(&self.root).map(|_| ())
    }

    pub async fn check(&self) -> Result<Vec<Problem>> {
        let store = self.open()?;
        Ok(store.check_consistency(self.inspector.as_ref()).await)
    }

    /// Every object, parents before children, top-level types in a fixed
    /// order and siblings in registration order.
    pub fn list(&self) -> Result<Vec<ListedObject>> {
        let store = self.open()?;
        let mut listed = Vec::new();
        for object_type in ObjectType::ALL {
            if object_type.parent_type().is_some() {
                continue;
            }
            for entry in store.list_objects(object_type, None) {
                push_tree(&store, entry, 0, &mut listed);
            }
        }
        Ok(listed)
    }

    pub fn destroy(&self) -> Result<()> {
        self.open()?.destroy()
    }

    pub fn add_dataset(&self, name: &str, description: Option<&str>) -> Result<RegistryEntry> {
        let mut store = self.open()?;
        let mut request = AddRequest::new(ObjectType::Dataset, name, Layout::dataset_dir(name));
        if let Some(description) = description {
            request
                .metadata
                .insert(DESCRIPTION.to_string(), Value::from(description));
        }
        store.add_object(request)
    }

    /// Remove a dataset with all its variant and read group sets.
    pub fn remove_dataset(&self, name: &str) -> Result<Vec<RegistryEntry>> {
        self.open()?.remove_object(ObjectType::Dataset, None, name)
    }

    /// Register a FASTA as a reference set with one reference per sequence.
    ///
    /// The sidecar `<stem>.json` supplies set metadata; its optional
    /// `references` object maps sequence names to per-reference metadata.
    pub async fn add_reference_set(
        &self,
        fasta: &Path,
        options: AddOptions,
    ) -> Result<RegistryEntry> {
        let mut store = self.open()?;
        let source = store.validate_source(fasta, FileKind::Fasta)?;
        let name = match options.name {
            Some(name) => name,
            None => default_name(fasta, FileKind::Fasta)?,
        };
        let index = required_index(&source.path, source.index.as_deref())?;
        let sequences = self.inspector.sequences(&source.path, index).await?;

        let sidecar = read_sidecar(&source).await?;
        let mut metadata: Metadata = sidecar
            .iter()
            .filter(|(key, _)| key.as_str() != SIDECAR_REFERENCES)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if let Some(description) = options.description {
            metadata.insert(DESCRIPTION.to_string(), Value::from(description));
        }
        let per_reference = sidecar
            .get(SIDECAR_REFERENCES)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut request = AddRequest::new(
            ObjectType::ReferenceSet,
            name.clone(),
            Layout::reference_set_dir(&name),
        );
        request.move_mode = options.move_mode;
        request.metadata = metadata.clone();
        request.documents.push(Document {
            relative_path: Layout::reference_set_document(&name),
            contents: Value::Object(metadata.into_iter().collect()),
        });
        for sequence in &sequences {
            let mut child: Metadata = per_reference
                .get(&sequence.name)
                .and_then(Value::as_object)
                .map(|fields| fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            child.insert(LENGTH.to_string(), Value::from(sequence.length));
            request.children.push(ChildSpec {
                object_type: ObjectType::Reference,
                name: sequence.name.clone(),
                metadata: child,
                share_shards: true,
            });
        }
        request.shards.push(ShardSource {
            source,
            reference_names: sequences.iter().map(|s| s.name.clone()).collect(),
        });
        store.add_object(request)
    }

    pub fn remove_reference_set(&self, name: &str) -> Result<Vec<RegistryEntry>> {
        self.open()?
            .remove_object(ObjectType::ReferenceSet, None, name)
    }

    pub async fn add_ontology_map(&self, path: &Path, options: AddOptions) -> Result<RegistryEntry> {
        let mut store = self.open()?;
        let source = store.validate_source(path, FileKind::Ontology)?;
        let name = match options.name {
            Some(name) => name,
            None => default_name(path, FileKind::Ontology)?,
        };
        let map = OntologyMap::load(&name, path).await?;
        tracing::debug!("ontology map {} has {} terms", name, map.len());

        let mut request = AddRequest::new(ObjectType::OntologyMap, name, Layout::ontologies_dir());
        request.move_mode = options.move_mode;
        request.shards.push(ShardSource {
            source,
            reference_names: Vec::new(),
        });
        store.add_object(request)
    }

    pub fn remove_ontology_map(&self, name: &str) -> Result<Vec<RegistryEntry>> {
        self.open()?
            .remove_object(ObjectType::OntologyMap, None, name)
    }

    /// Register an indexed BAM; its read groups come from the header.
    pub async fn add_read_group_set(
        &self,
        dataset: &str,
        bam: &Path,
        options: AddOptions,
    ) -> Result<RegistryEntry> {
        let mut store = self.open()?;
        let dataset_id = store.lookup(ObjectType::Dataset, None, dataset)?.id.clone();
        let source = store.validate_source(bam, FileKind::Bam)?;
        let name = match options.name {
            Some(name) => name,
            None => default_name(bam, FileKind::Bam)?,
        };
        let index = required_index(&source.path, source.index.as_deref())?;
        let summary = self.inspector.alignments(&source.path, index).await?;

        let mut request = AddRequest::new(
            ObjectType::ReadGroupSet,
            name.clone(),
            Layout::read_group_set_dir(dataset, &name),
        );
        request.parent_id = Some(dataset_id);
        request.move_mode = options.move_mode;
        request.metadata.insert(
            READ_GROUPS.to_string(),
            serde_json::to_value(&summary.read_groups)
                .map_err(|e| Error::Internal(format!("failed to encode read groups: {}", e)))?,
        );
        request.metadata.insert(
            REFERENCE_NAMES.to_string(),
            Value::from(summary.reference_names.clone()),
        );
        if let Some(reference_set) = &options.reference_set {
            let id = store.lookup(ObjectType::ReferenceSet, None, reference_set)?.id.clone();
            request.metadata.insert(REFERENCE_SET_ID.to_string(), Value::from(id));
        }
        request.shards.push(ShardSource {
            source,
            reference_names: summary.reference_names,
        });
        store.add_object(request)
    }

    pub fn remove_read_group_set(&self, dataset: &str, name: &str) -> Result<Vec<RegistryEntry>> {
        let mut store = self.open()?;
        let dataset_id = store.lookup(ObjectType::Dataset, None, dataset)?.id.clone();
        store.remove_object(ObjectType::ReadGroupSet, Some(&dataset_id), name)
    }

    /// Register a directory of indexed VCF/BCF shards as one variant set.
    ///
    /// Shards are ordered by the natural order of their file names and must
    /// all carry the same samples. If the headers declare `ANN` or `CSQ`, a
    /// variant annotation set sharing the shards is registered too.
    pub async fn add_variant_set(
        &self,
        dataset: &str,
        directory: &Path,
        options: AddOptions,
    ) -> Result<RegistryEntry> {
        let mut store = self.open()?;
        let dataset_id = store.lookup(ObjectType::Dataset, None, dataset)?.id.clone();
        let name = match options.name {
            Some(name) => name,
            None => directory
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::InvalidInput(format!("cannot name a set after {}", directory.display()))
                })?,
        };

        let shard_files = variant_shard_files(directory)?;
        let mut shards = Vec::with_capacity(shard_files.len());
        let mut summaries: Vec<VariantShardSummary> = Vec::with_capacity(shard_files.len());
        for (path, kind) in shard_files {
            let source = store.validate_source(&path, kind)?;
            let index = required_index(&source.path, source.index.as_deref())?;
            let summary = self.inspector.variant_shard(&source.path, index).await?;
            if let Some(first) = summaries.first() {
                if first.sample_names != summary.sample_names {
                    return Err(Error::InvalidFormat(format!(
                        "{} has samples {:?}, but the first shard has {:?}",
                        path.display(),
                        summary.sample_names,
                        first.sample_names
                    )));
                }
            }
            shards.push(ShardSource {
                source,
                reference_names: summary.reference_names.clone(),
            });
            summaries.push(summary);
        }

        let mut reference_names: Vec<String> = Vec::new();
        for summary in &summaries {
            for reference in &summary.reference_names {
                if !reference_names.contains(reference) {
                    reference_names.push(reference.clone());
                }
            }
        }
        let samples = summaries
            .first()
            .map(|s| s.sample_names.clone())
            .unwrap_or_default();

        let mut request = AddRequest::new(
            ObjectType::VariantSet,
            name.clone(),
            Layout::variant_set_dir(dataset, &name),
        );
        request.parent_id = Some(dataset_id);
        request.move_mode = options.move_mode;
        request.shards = shards;
        request
            .metadata
            .insert(SAMPLE_NAMES.to_string(), Value::from(samples));
        request
            .metadata
            .insert(REFERENCE_NAMES.to_string(), Value::from(reference_names));
        if let Some(reference_set) = &options.reference_set {
            let id = store.lookup(ObjectType::ReferenceSet, None, reference_set)?.id.clone();
            request.metadata.insert(REFERENCE_SET_ID.to_string(), Value::from(id));
        }

        if let Some(field) = summaries.iter().find_map(|s| s.annotation_field.clone()) {
            let mut metadata = Metadata::new();
            metadata.insert(ANNOTATION_FIELD.to_string(), Value::from(field));
            if let Some(ontology_map) = &options.ontology_map {
                store.lookup(ObjectType::OntologyMap, None, ontology_map)?;
                metadata.insert(ONTOLOGY_MAP.to_string(), Value::from(ontology_map.clone()));
            }
            request.children.push(ChildSpec {
                object_type: ObjectType::VariantAnnotationSet,
                name: name.clone(),
                metadata,
                share_shards: true,
            });
        }

        store.add_object(request)
    }

    /// Remove a variant set and the annotation set registered with it.
    pub fn remove_variant_set(&self, dataset: &str, name: &str) -> Result<Vec<RegistryEntry>> {
        let mut store = self.open()?;
        let dataset_id = store.lookup(ObjectType::Dataset, None, dataset)?.id.clone();
        store.remove_object(ObjectType::VariantSet, Some(&dataset_id), name)
    }
}

fn push_tree(store: &RegistryStore, entry: &RegistryEntry, depth: usize, out: &mut Vec<ListedObject>) {
    out.push(ListedObject {
        depth,
        entry: entry.clone(),
    });
    for child in store.children(&entry.id) {
        push_tree(store, child, depth + 1, out);
    }
}

fn default_name(path: &Path, kind: FileKind) -> Result<String> {
    kind.stem(path).ok_or_else(|| {
        Error::InvalidInput(format!("cannot derive a name from {}", path.display()))
    })
}

fn required_index<'a>(path: &Path, index: Option<&'a Path>) -> Result<&'a Path> {
    index.ok_or_else(|| Error::InvalidFormat(format!("{} has no index", path.display())))
}

/// The `<stem>.json` metadata validated alongside a FASTA.
async fn read_sidecar(source: &ValidatedSource) -> Result<serde_json::Map<String, Value>> {
    let path = source
        .companions
        .iter()
        .find(|p| p.extension().is_some_and(|ext| ext == "json"))
        .ok_or_else(|| {
            Error::InvalidFormat(format!(
                "{} has no sidecar metadata JSON",
                source.path.display()
            ))
        })?;
    let text = tokio::fs::read_to_string(path).await?;
    match serde_json::from_str(&text) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(Error::InvalidFormat(format!(
            "{} is not a JSON object",
            path.display()
        ))),
        Err(e) => Err(Error::InvalidFormat(format!("{}: {}", path.display(), e))),
    }
}

/// VCF/BCF files directly inside `directory`, in natural file name order.
fn variant_shard_files(directory: &Path) -> Result<Vec<(PathBuf, FileKind)>> {
    if !directory.is_dir() {
        return Err(Error::NotFound(format!(
            "{} is not a directory",
            directory.display()
        )));
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        if let Some(kind) = FileKind::variant_shard(&path) {
            files.push((path, kind));
        }
    }
    if files.is_empty() {
        return Err(Error::InvalidFormat(format!(
            "{} holds no .vcf.gz or .bcf shards",
            directory.display()
        )));
    }
    files.sort_by(|(a, _), (b, _)| {
        let a = a.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let b = b.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        natural_cmp(a, b)
    });
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::memory::MemoryInspector;
    use crate::formats::{AlignmentSummary, ReadGroupSummary, SequenceSummary};
    use crate::registry::ProblemKind;
    use std::fs;

    struct Sandbox {
        dir: tempfile::TempDir,
        manager: RepoManager,
    }

    impl Sandbox {
        fn new(inspector: MemoryInspector) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let manager = RepoManager::new(dir.path().join("repo"), Arc::new(inspector));
            manager.init().unwrap();
            Self { dir, manager }
        }

        fn source(&self, relative: &str) -> PathBuf {
            let path = self.dir.path().join("src").join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"x").unwrap();
            path
        }

        fn entry_ids(&self) -> Vec<String> {
            self.manager
                .open()
                .unwrap()
                .entries()
                .iter()
                .map(|e| e.id.clone())
                .collect()
        }
    }

    fn variant_summary(samples: &[&str], reference: &str, annotated: bool) -> VariantShardSummary {
        VariantShardSummary {
            sample_names: samples.iter().map(|s| s.to_string()).collect(),
            reference_names: vec![reference.to_string()],
            annotation_field: annotated.then(|| "ANN".to_string()),
        }
    }

    fn inspector() -> MemoryInspector {
        let mut inspector = MemoryInspector::default();
        for (file, reference) in [
            ("chr1.vcf.gz", "chr1"),
            ("chr2.vcf.gz", "chr2"),
            ("chr10.vcf.gz", "chr10"),
        ] {
            inspector.variant_shards.insert(
                file.to_string(),
                variant_summary(&["s1", "s2"], reference, file == "chr1.vcf.gz"),
            );
        }
        for (file, sequence) in [("hg.fa.gz", "chr1"), ("mm.fa.gz", "chrM")] {
            inspector.sequences.insert(
                file.to_string(),
                vec![SequenceSummary {
                    name: sequence.to_string(),
                    length: 100,
                }],
            );
        }
        inspector.alignments.insert(
            "sample.bam".to_string(),
            AlignmentSummary {
                read_groups: vec![ReadGroupSummary {
                    id: "rg1".to_string(),
                    sample: Some("s1".to_string()),
                }],
                reference_names: vec!["chr1".to_string()],
            },
        );
        inspector
    }

    fn fasta(sandbox: &Sandbox, stem: &str, sidecar: &str) -> PathBuf {
        let fasta = sandbox.source(&format!("{}.fa.gz", stem));
        sandbox.source(&format!("{}.fa.gz.fai", stem));
        sandbox.source(&format!("{}.fa.gz.gzi", stem));
        fs::write(sandbox.dir.path().join(format!("src/{}.json", stem)), sidecar).unwrap();
        fasta
    }

    #[tokio::test]
    async fn test_add_then_remove_restores_entries() {
        let sandbox = Sandbox::new(inspector());
        sandbox.manager.add_dataset("d0", None).unwrap();
        let before = sandbox.entry_ids();

        sandbox.manager.add_dataset("d1", Some("first")).unwrap();
        for name in ["chr1.vcf.gz", "chr1.vcf.gz.tbi"] {
            sandbox.source(&format!("vs1/{}", name));
        }
        sandbox
            .manager
            .add_variant_set("d1", &sandbox.dir.path().join("src/vs1"), AddOptions::default())
            .await
            .unwrap();
        sandbox.manager.remove_dataset("d1").unwrap();

        assert_eq!(sandbox.entry_ids(), before);
    }

    #[tokio::test]
    async fn test_variant_set_shards_in_natural_order() {
        let sandbox = Sandbox::new(inspector());
        sandbox.manager.add_dataset("d1", None).unwrap();
        for stem in ["chr10", "chr2", "chr1"] {
            sandbox.source(&format!("vs1/{}.vcf.gz", stem));
            sandbox.source(&format!("vs1/{}.vcf.gz.tbi", stem));
        }
        let entry = sandbox
            .manager
            .add_variant_set("d1", &sandbox.dir.path().join("src/vs1"), AddOptions::default())
            .await
            .unwrap();

        let names: Vec<&str> = entry
            .shards
            .iter()
            .map(|s| s.relative_path.rsplit('/').next().unwrap())
            .collect();
        assert_eq!(names, vec!["chr1.vcf.gz", "chr2.vcf.gz", "chr10.vcf.gz"]);
        assert_eq!(
            entry.metadata_strings(REFERENCE_NAMES),
            vec!["chr1", "chr2", "chr10"]
        );

        let store = sandbox.manager.open().unwrap();
        let children = store.children(&entry.id);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].object_type, ObjectType::VariantAnnotationSet);
        assert_eq!(children[0].shards, entry.shards);
    }

    #[tokio::test]
    async fn test_inconsistent_samples_rejected() {
        let mut inspector = inspector();
        inspector
            .variant_shards
            .insert("chr2.vcf.gz".to_string(), variant_summary(&["s9"], "chr2", false));
        let sandbox = Sandbox::new(inspector);
        sandbox.manager.add_dataset("d1", None).unwrap();
        for stem in ["chr1", "chr2"] {
            sandbox.source(&format!("vs1/{}.vcf.gz", stem));
            sandbox.source(&format!("vs1/{}.vcf.gz.tbi", stem));
        }
        let before = sandbox.entry_ids();

        let err = sandbox
            .manager
            .add_variant_set("d1", &sandbox.dir.path().join("src/vs1"), AddOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
        assert_eq!(sandbox.entry_ids(), before);
        assert!(!sandbox.manager.root().join("datasets/d1/variants/vs1").exists());
    }

    #[tokio::test]
    async fn test_reference_set_from_sidecar() {
        let sandbox = Sandbox::new(inspector());
        let path = fasta(
            &sandbox,
            "hg",
            r#"{"assemblyId": "GRCh38", "references": {"chr1": {"md5checksum": "abc"}}}"#,
        );
        let entry = sandbox
            .manager
            .add_reference_set(&path, AddOptions::default())
            .await
            .unwrap();
        assert_eq!(entry.name, "hg");
        assert_eq!(entry.metadata_str("assemblyId"), Some("GRCh38"));
        assert!(sandbox.manager.root().join("referenceSets/hg.json").is_file());
        assert!(sandbox.manager.root().join("referenceSets/hg/hg.json").is_file());

        let store = sandbox.manager.open().unwrap();
        let references = store.children(&entry.id);
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].metadata_u64(LENGTH), Some(100));
        assert_eq!(references[0].metadata_str("md5checksum"), Some("abc"));
    }

    #[tokio::test]
    async fn test_missing_fai_then_disappearing_fai() {
        let sandbox = Sandbox::new(inspector());
        let bare = sandbox.source("bare/hg.fa.gz");
        fs::write(sandbox.dir.path().join("src/bare/hg.json"), "{}").unwrap();
        let err = sandbox
            .manager
            .add_reference_set(&bare, AddOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));

        sandbox.source("bare/hg.fa.gz.fai");
        let err = sandbox
            .manager
            .add_reference_set(&bare, AddOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(ref m) if m.contains(".gzi")));
        assert!(sandbox.manager.list().unwrap().is_empty());

        let hg = fasta(&sandbox, "hg", "{}");
        let mm = fasta(&sandbox, "mm", "{}");
        let hg = sandbox.manager.add_reference_set(&hg, AddOptions::default()).await.unwrap();
        sandbox.manager.add_reference_set(&mm, AddOptions::default()).await.unwrap();
        assert!(sandbox.manager.check().await.unwrap().is_empty());

        fs::remove_file(sandbox.manager.root().join("referenceSets/hg/hg.fa.gz.fai")).unwrap();
        let problems = sandbox.manager.check().await.unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].entry_id, hg.id);
        assert_eq!(problems[0].kind, ProblemKind::MissingIndex);
    }

    #[tokio::test]
    async fn test_remove_dataset_cascades_to_files() {
        let sandbox = Sandbox::new(inspector());
        sandbox.manager.add_dataset("d1", None).unwrap();
        sandbox.manager.add_dataset("d2", None).unwrap();
        for name in ["chr1.vcf.gz", "chr1.vcf.gz.tbi"] {
            sandbox.source(&format!("vs1/{}", name));
        }
        let bam = sandbox.source("sample.bam");
        sandbox.source("sample.bam.bai");
        sandbox
            .manager
            .add_variant_set("d1", &sandbox.dir.path().join("src/vs1"), AddOptions::default())
            .await
            .unwrap();
        sandbox
            .manager
            .add_read_group_set("d1", &bam, AddOptions::default())
            .await
            .unwrap();
        let kept = sandbox
            .manager
            .add_read_group_set("d2", &bam, AddOptions::default())
            .await
            .unwrap();
        assert_eq!(
            kept.metadata.get(READ_GROUPS),
            Some(&serde_json::json!([{"id": "rg1", "sample": "s1"}]))
        );

        let removed = sandbox.manager.remove_dataset("d1").unwrap();
        let types: Vec<ObjectType> = removed.iter().map(|e| e.object_type).collect();
        assert_eq!(
            types,
            vec![
                ObjectType::Dataset,
                ObjectType::VariantSet,
                ObjectType::VariantAnnotationSet,
                ObjectType::ReadGroupSet,
            ]
        );
        let root = sandbox.manager.root();
        assert!(!root.join("datasets/d1").exists());
        assert!(root.join("datasets/d2/reads/sample/sample.bam").is_file());
        assert!(sandbox.manager.check().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ontology_map_duplicates_rejected() {
        let sandbox = Sandbox::new(inspector());
        let path = sandbox.dir.path().join("so.txt");
        fs::write(&path, "SO:1\ta\nSO:1\tb\n").unwrap();
        let err = sandbox
            .manager
            .add_ontology_map(&path, AddOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));

        fs::write(&path, "# header\n\nSO:1\ta\nSO:2\tb\n").unwrap();
        let entry = sandbox
            .manager
            .add_ontology_map(&path, AddOptions::default())
            .await
            .unwrap();
        assert_eq!(entry.name, "so");
        sandbox.manager.remove_ontology_map("so").unwrap();
        assert!(!sandbox.manager.root().join("ontologies/so.txt").exists());
        assert!(sandbox.manager.root().join("ontologies").is_dir());
    }

    #[tokio::test]
    async fn test_list_is_hierarchical() {
        let sandbox = Sandbox::new(inspector());
        sandbox.manager.add_dataset("d1", None).unwrap();
        let bam = sandbox.source("sample.bam");
        sandbox.source("sample.bam.bai");
        sandbox
            .manager
            .add_read_group_set("d1", &bam, AddOptions::default())
            .await
            .unwrap();
        let listed: Vec<(usize, String)> = sandbox
            .manager
            .list()
            .unwrap()
            .into_iter()
            .map(|l| (l.depth, l.entry.name))
            .collect();
        assert_eq!(listed, vec![(0, "d1".to_string()), (1, "sample".to_string())]);
    }

    #[tokio::test]
    async fn test_destroy() {
        let sandbox = Sandbox::new(inspector());
        sandbox.manager.destroy().unwrap();
        assert!(!sandbox.manager.root().exists());
        assert!(matches!(sandbox.manager.destroy(), Err(Error::NotFound(_))));
    }
}
