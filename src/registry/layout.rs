use crate::{Error, Result};
use std::path::{Component, Path, PathBuf};

pub const CATALOG_FILE: &str = "registry.json";
pub const REFERENCE_SETS_DIR: &str = "referenceSets";
pub const DATASETS_DIR: &str = "datasets";
pub const ONTOLOGIES_DIR: &str = "ontologies";

/// File families the repository accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Fasta,
    Vcf,
    Bcf,
    Bam,
    Ontology,
}

impl FileKind {
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            FileKind::Fasta => &["fa.gz", "fasta.gz"],
            FileKind::Vcf => &["vcf.gz"],
            FileKind::Bcf => &["bcf"],
            FileKind::Bam => &["bam"],
            FileKind::Ontology => &["txt", "tsv"],
        }
    }

    pub fn index_extensions(&self) -> &'static [&'static str] {
        match self {
            FileKind::Fasta => &["fai"],
            FileKind::Vcf => &["tbi", "csi"],
            FileKind::Bcf => &["csi"],
            FileKind::Bam => &["bai"],
            FileKind::Ontology => &[],
        }
    }

    /// Whether a sidecar `<stem>.json` must accompany the file.
    pub fn requires_sidecar(&self) -> bool {
        matches!(self, FileKind::Fasta)
    }

    /// Variant shards may be either VCF or BCF; anything else is not a shard.
    pub fn variant_shard(path: &Path) -> Option<FileKind> {
        [FileKind::Vcf, FileKind::Bcf]
            .into_iter()
            .find(|kind| kind.stem(path).is_some())
    }

    /// File name with the recognised extension stripped.
    pub fn stem(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        self.extensions().iter().find_map(|ext| {
            name.strip_suffix(ext)
                .and_then(|s| s.strip_suffix('.'))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }
}

/// Locate the index of `path`, trying the appended (`file.bam.bai`) and then
/// replaced (`file.bai`) conventions for each accepted extension.
pub fn find_index(path: &Path, kind: FileKind) -> Option<PathBuf> {
    for ext in kind.index_extensions() {
        let appended = PathBuf::from(format!("{}.{}", path.display(), ext));
        if appended.exists() {
            return Some(appended);
        }

        let replaced = path.with_extension(ext);
        if replaced.exists() {
            return Some(replaced);
        }
    }
    None
}

/// BGZF-compressed FASTA carries an extra `.gzi` block index.
pub fn find_gzi(path: &Path) -> Option<PathBuf> {
    let gzi = PathBuf::from(format!("{}.gzi", path.display()));
    gzi.exists().then_some(gzi)
}

/// Sidecar metadata file `<stem>.json` next to `path`.
pub fn sidecar_path(path: &Path, kind: FileKind) -> Option<PathBuf> {
    let stem = kind.stem(path)?;
    Some(path.with_file_name(format!("{}.json", stem)))
}

/// Directory structure of a repository rooted at one path.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    pub fn dataset_dir(name: &str) -> String {
        format!("{}/{}", DATASETS_DIR, name)
    }

    pub fn variant_set_dir(dataset: &str, variant_set: &str) -> String {
        format!("{}/{}/variants/{}", DATASETS_DIR, dataset, variant_set)
    }

    pub fn read_group_set_dir(dataset: &str, read_group_set: &str) -> String {
        format!("{}/{}/reads/{}", DATASETS_DIR, dataset, read_group_set)
    }

    pub fn reference_set_dir(name: &str) -> String {
        format!("{}/{}", REFERENCE_SETS_DIR, name)
    }

    pub fn reference_set_document(name: &str) -> String {
        format!("{}/{}.json", REFERENCE_SETS_DIR, name)
    }

    pub fn ontologies_dir() -> String {
        ONTOLOGIES_DIR.to_string()
    }

    /// Resolve a catalog-relative path, refusing anything that would escape
    /// the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        if relative.is_empty() {
            return Err(Error::InvalidFormat("empty relative path".to_string()));
        }
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(Error::InvalidFormat(format!(
                        "path {:?} does not resolve under the repository root",
                        relative
                    )));
                }
            }
        }
        Ok(self.root.join(path))
    }
}

/// Validate a user-supplied object name: it becomes a path component.
pub fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid object name: {:?}", name)))
    }
}

/// Compare file names so that embedded numbers sort numerically
/// (`chr2` before `chr10`).
pub fn natural_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let (mut a, mut b) = (a.as_bytes(), b.as_bytes());
    loop {
        match (a.first(), b.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let da = a.iter().take_while(|c| c.is_ascii_digit()).count();
                let db = b.iter().take_while(|c| c.is_ascii_digit()).count();
                let na = trim_zeros(&a[..da]);
                let nb = trim_zeros(&b[..db]);
                let ord = na.len().cmp(&nb.len()).then_with(|| na.cmp(nb));
                if ord != Ordering::Equal {
                    return ord;
                }
                a = &a[da..];
                b = &b[db..];
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(y);
                }
                a = &a[1..];
                b = &b[1..];
            }
        }
    }
}

fn trim_zeros(digits: &[u8]) -> &[u8] {
    let zeros = digits.iter().take_while(|&&c| c == b'0').count();
    &digits[zeros..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_resolve_rejects_escapes() {
        let layout = Layout::new("/repo");
        assert_eq!(
            layout.resolve("datasets/d1").unwrap(),
            PathBuf::from("/repo/datasets/d1")
        );
        assert!(layout.resolve("../etc/passwd").is_err());
        assert!(layout.resolve("/etc/passwd").is_err());
        assert!(layout.resolve("datasets/../../x").is_err());
        assert!(layout.resolve("").is_err());
    }

    #[test]
    fn test_stems() {
        assert_eq!(
            FileKind::Vcf.stem(Path::new("/x/chr1.vcf.gz")).as_deref(),
            Some("chr1")
        );
        assert_eq!(FileKind::Vcf.stem(Path::new("/x/chr1.vcf")), None);
        assert_eq!(
            FileKind::Fasta.stem(Path::new("GRCh38.fa.gz")).as_deref(),
            Some("GRCh38")
        );
        assert_eq!(FileKind::Bam.stem(Path::new(".bam")), None);
        assert_eq!(
            FileKind::variant_shard(Path::new("a.bcf")),
            Some(FileKind::Bcf)
        );
    }

    #[test]
    fn test_find_index_conventions() {
        let dir = tempfile::tempdir().unwrap();
        let bam = dir.path().join("sample.bam");
        std::fs::write(&bam, b"").unwrap();
        assert_eq!(find_index(&bam, FileKind::Bam), None);

        let replaced = dir.path().join("sample.bai");
        std::fs::write(&replaced, b"").unwrap();
        assert_eq!(find_index(&bam, FileKind::Bam), Some(replaced));

        let appended = dir.path().join("sample.bam.bai");
        std::fs::write(&appended, b"").unwrap();
        assert_eq!(find_index(&bam, FileKind::Bam), Some(appended));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("NA12878").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(".hidden").is_err());
    }

    #[test]
    fn test_natural_order() {
        assert_eq!(natural_cmp("chr2.vcf.gz", "chr10.vcf.gz"), Ordering::Less);
        assert_eq!(natural_cmp("chr10", "chr9"), Ordering::Greater);
        assert_eq!(natural_cmp("chrX", "chr1"), Ordering::Greater);
        assert_eq!(natural_cmp("chr01", "chr1"), Ordering::Equal);
        let mut names = vec!["chr10", "chrX", "chr2", "chr1"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["chr1", "chr2", "chr10", "chrX"]);
    }
}
