use super::entry::{ObjectType, RegistryEntry, SAMPLE_NAMES};
use super::store::RegistryStore;
use crate::formats::{FormatInspector, OntologyMap};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProblemKind {
    MissingParent,
    MissingFile,
    MissingIndex,
    Corrupt,
    Inconsistent,
}

/// One finding of a consistency check, attributed to a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub entry_id: String,
    pub object_type: ObjectType,
    pub name: String,
    pub kind: ProblemKind,
    pub message: String,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?}: {:?}: {}",
            self.object_type, self.name, self.kind, self.message
        )
    }
}

struct Findings<'a> {
    entry: &'a RegistryEntry,
    problems: &'a mut Vec<Problem>,
}

impl Findings<'_> {
    fn report(&mut self, kind: ProblemKind, message: String) {
        self.problems.push(Problem {
            entry_id: self.entry.id.clone(),
            object_type: self.entry.object_type,
            name: self.entry.name.clone(),
            kind,
            message,
        });
    }
}

impl RegistryStore {
    /// Walk every entry and collect every problem found, in catalog order.
    /// Problems are attributed to the entry that owns the broken file, so
    /// a damaged object never implicates its siblings.
    pub async fn check_consistency(&self, inspector: &dyn FormatInspector) -> Vec<Problem> {
        let mut problems = Vec::new();
        for entry in self.entries() {
            let mut findings = Findings {
                entry,
                problems: &mut problems,
            };
            self.check_entry(entry, inspector, &mut findings).await;
        }
        tracing::info!(
            "checked {} entries, {} problems",
            self.entries().len(),
            problems.len()
        );
        problems
    }

    async fn check_entry(
        &self,
        entry: &RegistryEntry,
        inspector: &dyn FormatInspector,
        findings: &mut Findings<'_>,
    ) {
        let parent = match &entry.parent_id {
            Some(parent_id) => match self.get(parent_id) {
                Ok(parent) => Some(parent),
                Err(_) => {
                    findings.report(
                        ProblemKind::MissingParent,
                        format!("parent {} is not in the catalog", parent_id),
                    );
                    None
                }
            },
            None => None,
        };

        // Children sharing their parent's shards are checked through the parent.
        let shares_parent_shards = parent.is_some_and(|p| !p.shards.is_empty() && p.shards == entry.shards);

        let mut shard_paths: HashSet<String> = entry
            .shards
            .iter()
            .flat_map(|s| std::iter::once(s.relative_path.clone()).chain(s.index_relative_path.clone()))
            .collect();
        if entry.object_type == ObjectType::ReferenceSet {
            shard_paths.extend(entry.shards.iter().map(|s| gzi_path(&s.relative_path)));
        }
        for relative in &entry.managed_paths {
            if shard_paths.contains(relative) {
                continue;
            }
            if !self.exists(relative) {
                findings.report(
                    ProblemKind::MissingFile,
                    format!("managed path {} is missing", relative),
                );
            }
        }

        match entry.object_type {
            ObjectType::Dataset => {}
            ObjectType::Reference => {
                if let Some(parent) = parent {
                    self.check_reference(entry, parent, inspector, findings).await;
                }
            }
            ObjectType::VariantAnnotationSet => {
                if let Some(parent) = parent {
                    if parent.shards != entry.shards {
                        findings.report(
                            ProblemKind::Inconsistent,
                            format!("shards differ from variant set {}", parent.name),
                        );
                    }
                }
            }
            _ if shares_parent_shards => {}
            ObjectType::ReferenceSet
            | ObjectType::VariantSet
            | ObjectType::ReadGroupSet
            | ObjectType::OntologyMap => {
                self.check_shards(entry, inspector, findings).await;
            }
        }
    }

    async fn check_shards(
        &self,
        entry: &RegistryEntry,
        inspector: &dyn FormatInspector,
        findings: &mut Findings<'_>,
    ) {
        let expected_samples = entry.metadata_strings(SAMPLE_NAMES);

        for shard in &entry.shards {
            let Ok(path) = self.resolve(&shard.relative_path) else {
                findings.report(
                    ProblemKind::Corrupt,
                    format!("shard path {} escapes the root", shard.relative_path),
                );
                continue;
            };
            if !path.exists() {
                findings.report(
                    ProblemKind::MissingFile,
                    format!("{} is missing", shard.relative_path),
                );
                continue;
            }

            if entry.object_type == ObjectType::OntologyMap {
                if let Err(e) = OntologyMap::load(&entry.name, &path).await {
                    findings.report(ProblemKind::Corrupt, e.to_string());
                }
                continue;
            }

            let index = match shard.index_relative_path.as_deref() {
                Some(relative) if self.exists(relative) => match self.resolve(relative) {
                    Ok(index) => index,
                    Err(e) => {
                        findings.report(ProblemKind::Corrupt, e.to_string());
                        continue;
                    }
                },
                Some(relative) => {
                    findings.report(
                        ProblemKind::MissingIndex,
                        format!("index {} is missing", relative),
                    );
                    continue;
                }
                None => {
                    findings.report(
                        ProblemKind::MissingIndex,
                        format!("{} has no recorded index", shard.relative_path),
                    );
                    continue;
                }
            };

            match entry.object_type {
                ObjectType::ReferenceSet => {
                    let gzi = gzi_path(&shard.relative_path);
                    if !self.exists(&gzi) {
                        findings.report(
                            ProblemKind::MissingIndex,
                            format!("index {} is missing", gzi),
                        );
                        continue;
                    }
                    if let Err(e) = inspector.sequences(&path, &index).await {
                        findings.report(ProblemKind::Corrupt, e.to_string());
                    }
                }
                ObjectType::VariantSet => match inspector.variant_shard(&path, &index).await {
                    Ok(summary) => {
                        if summary.sample_names != expected_samples {
                            findings.report(
                                ProblemKind::Inconsistent,
                                format!(
                                    "{} has samples {:?}, expected {:?}",
                                    shard.relative_path, summary.sample_names, expected_samples
                                ),
                            );
                        }
                    }
                    Err(e) => findings.report(ProblemKind::Corrupt, e.to_string()),
                },
                ObjectType::ReadGroupSet => {
                    if let Err(e) = inspector.alignments(&path, &index).await {
                        findings.report(ProblemKind::Corrupt, e.to_string());
                    }
                }
                _ => {}
            }
        }
    }

    async fn check_reference(
        &self,
        entry: &RegistryEntry,
        parent: &RegistryEntry,
        inspector: &dyn FormatInspector,
        findings: &mut Findings<'_>,
    ) {
        // A broken FASTA or index is the reference set's problem, not ours.
        let Some(shard) = parent.shards.first() else {
            return;
        };
        let (Ok(path), Some(Ok(index))) = (
            self.resolve(&shard.relative_path),
            shard.index_relative_path.as_deref().map(|p| self.resolve(p)),
        ) else {
            return;
        };
        if !path.exists() || !index.exists() {
            return;
        }
        if let Ok(sequences) = inspector.sequences(&path, &index).await {
            if !sequences.iter().any(|s| s.name == entry.name) {
                findings.report(
                    ProblemKind::Inconsistent,
                    format!("sequence {} is not in {}", entry.name, shard.relative_path),
                );
            }
        }
    }

    /// Whether a catalog path exists; a dangling symlink counts as missing.
    fn exists(&self, relative: &str) -> bool {
        self.resolve(relative).is_ok_and(|p| p.exists())
    }
}

/// BGZF block index stored next to a reference FASTA.
fn gzi_path(fasta: &str) -> String {
    format!("{}.gzi", fasta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::memory::MemoryInspector;
    use crate::registry::{AddRequest, Layout, ShardSource};
    use crate::registry::{FileKind, Metadata, MoveMode};
    use std::fs;

    #[tokio::test]
    async fn test_clean_repository_has_no_problems() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RegistryStore::initialize(dir.path()).unwrap();
        store
            .add_object(AddRequest::new(
                ObjectType::Dataset,
                "d1",
                Layout::dataset_dir("d1"),
            ))
            .unwrap();
        let problems = store
            .check_consistency(&MemoryInspector::default())
            .await;
        assert!(problems.is_empty(), "{problems:?}");
    }

    #[tokio::test]
    async fn test_missing_index_scoped_to_owner() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let mut store = RegistryStore::initialize(dir.path().join("repo")).unwrap();

        let mut ids = Vec::new();
        for name in ["a", "b"] {
            let bam = src.join(format!("{}.bam", name));
            fs::write(&bam, b"BAM").unwrap();
            fs::write(src.join(format!("{}.bam.bai", name)), b"BAI").unwrap();
            let ds = store
                .add_object(AddRequest::new(
                    ObjectType::Dataset,
                    name,
                    Layout::dataset_dir(name),
                ))
                .unwrap();
            let source = store.validate_source(&bam, FileKind::Bam).unwrap();
            let mut request = AddRequest::new(
                ObjectType::ReadGroupSet,
                name,
                Layout::read_group_set_dir(name, name),
            );
            request.parent_id = Some(ds.id);
            request.move_mode = MoveMode::Copy;
            request.metadata = Metadata::new();
            request.shards.push(ShardSource {
                source,
                reference_names: Vec::new(),
            });
            ids.push(store.add_object(request).unwrap().id);
        }

        fs::remove_file(dir.path().join("repo/datasets/a/reads/a/a.bam.bai")).unwrap();
        let problems = store
            .check_consistency(&MemoryInspector::default())
            .await;
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].entry_id, ids[0]);
        assert_eq!(problems[0].kind, ProblemKind::MissingIndex);
    }

    #[tokio::test]
    async fn test_missing_gzi_reported_for_reference_set() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let fa = src.join("hg.fa.gz");
        fs::write(&fa, b"").unwrap();
        fs::write(src.join("hg.fa.gz.fai"), b"").unwrap();
        fs::write(src.join("hg.fa.gz.gzi"), 0u64.to_le_bytes()).unwrap();
        fs::write(src.join("hg.json"), b"{}").unwrap();

        let mut store = RegistryStore::initialize(dir.path().join("repo")).unwrap();
        let source = store.validate_source(&fa, FileKind::Fasta).unwrap();
        let mut request = AddRequest::new(
            ObjectType::ReferenceSet,
            "hg",
            Layout::reference_set_dir("hg"),
        );
        request.move_mode = MoveMode::Copy;
        request.shards.push(ShardSource {
            source,
            reference_names: Vec::new(),
        });
        let entry = store.add_object(request).unwrap();

        fs::remove_file(dir.path().join("repo/referenceSets/hg/hg.fa.gz.gzi")).unwrap();
        let problems = store
            .check_consistency(&MemoryInspector::default())
            .await;
        assert_eq!(problems.len(), 1, "{problems:?}");
        assert_eq!(problems[0].entry_id, entry.id);
        assert_eq!(problems[0].kind, ProblemKind::MissingIndex);
        assert!(problems[0].message.contains(".gzi"));
    }
}
