//! Backing store adapters over indexed genomic files using noodles.
//!
//! Each record family (variants, alignments, sequence) is reached through a
//! trait so the query engine never inspects file types itself:
//!
//! - [`RecordSource`] opens one shard and hands back a [`ShardReader`] that
//!   can `seek` to a genomic position and then stream records in the file's
//!   native (coordinate) order.
//! - [`SequenceSource`] reads a window of reference bases.
//! - [`FormatInspector`] summarises files at registration and check time.
//!
//! The noodles-backed implementations live in [`vcf`], [`bcf`], [`bam`] and
//! [`fasta`]; [`memory`] provides in-process sources for tests and embedding.

mod bam;
mod bcf;
mod fasta;
mod inspect;
pub mod memory;
pub mod ontology;
#[cfg(test)]
pub(crate) mod testdata;
mod vcf;

pub use bam::BamSource;
pub use bcf::BcfReader;
pub use fasta::FastaSource;
pub use inspect::NoodlesInspector;
pub use ontology::OntologyMap;
pub use vcf::VcfReader;

use crate::registry::FileKind;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// INFO keys carrying functional annotations, in preference order.
pub const ANNOTATION_FIELDS: [&str; 2] = ["ANN", "CSQ"];

/// Resolved on-disk location of one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLocation {
    /// Position of the shard in its object's shard order.
    pub index: usize,
    pub path: PathBuf,
    pub index_path: Option<PathBuf>,
}

/// Genomic extent of a record: 0-based start, exclusive end.
pub trait ShardRecord {
    fn reference_name(&self) -> &str;
    fn start(&self) -> u64;
    fn end(&self) -> u64;
}

/// One sample's genotype at a variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub sample: String,
    /// Allele indices; `-1` marks a missing allele.
    pub genotype: Vec<i32>,
    pub phased: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub reference_name: String,
    pub start: u64,
    pub end: u64,
    pub ids: Vec<String>,
    pub reference_bases: String,
    pub alternate_bases: Vec<String>,
    pub quality: Option<f32>,
    pub filters: Vec<String>,
    pub info: BTreeMap<String, Vec<String>>,
    pub calls: Vec<CallRecord>,
}

impl ShardRecord for VariantRecord {
    fn reference_name(&self) -> &str {
        &self.reference_name
    }

    fn start(&self) -> u64 {
        self.start
    }

    fn end(&self) -> u64 {
        self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    pub fragment_name: String,
    pub reference_name: String,
    pub start: u64,
    pub end: u64,
    pub mapping_quality: Option<u8>,
    pub flags: u16,
    pub sequence: String,
    pub read_group: Option<String>,
}

impl ShardRecord for AlignmentRecord {
    fn reference_name(&self) -> &str {
        &self.reference_name
    }

    fn start(&self) -> u64 {
        self.start
    }

    fn end(&self) -> u64 {
        self.end
    }
}

/// Streaming cursor over one open shard.
#[async_trait]
pub trait ShardReader<R>: Send {
    /// Position at the first record on `reference_name` ending after
    /// `start`. Records on later references follow in native order. If the
    /// reference has no records in this shard, the reader is exhausted.
    async fn seek(&mut self, reference_name: &str, start: u64) -> Result<()>;

    /// Next record in native order, `None` at end of shard.
    async fn next_record(&mut self) -> Result<Option<R>>;
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    type Record: ShardRecord + Send + 'static;

    /// Open a shard. Missing or corrupt files and indices are reported as
    /// `BackendUnavailable`.
    async fn open(&self, shard: &ShardLocation) -> Result<Box<dyn ShardReader<Self::Record>>>;
}

#[async_trait]
pub trait SequenceSource: Send + Sync {
    /// Bases `[start, end)` of `name`.
    async fn read_bases(
        &self,
        shard: &ShardLocation,
        name: &str,
        start: u64,
        end: u64,
    ) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSummary {
    pub name: String,
    pub length: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantShardSummary {
    pub sample_names: Vec<String>,
    /// References the shard's index knows about.
    pub reference_names: Vec<String>,
    /// `ANN` or `CSQ` when the header declares an annotation field.
    pub annotation_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadGroupSummary {
    pub id: String,
    pub sample: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentSummary {
    pub read_groups: Vec<ReadGroupSummary>,
    pub reference_names: Vec<String>,
}

/// Header and index level inspection used when registering and checking.
/// Unreadable or malformed input is `InvalidFormat`.
#[async_trait]
pub trait FormatInspector: Send + Sync {
    async fn sequences(&self, fasta: &Path, index: &Path) -> Result<Vec<SequenceSummary>>;
    async fn variant_shard(&self, path: &Path, index: &Path) -> Result<VariantShardSummary>;
    async fn alignments(&self, path: &Path, index: &Path) -> Result<AlignmentSummary>;
}

/// The adapters a query engine reads through.
#[derive(Clone)]
pub struct Backends {
    pub variants: Arc<dyn RecordSource<Record = VariantRecord>>,
    pub alignments: Arc<dyn RecordSource<Record = AlignmentRecord>>,
    pub sequences: Arc<dyn SequenceSource>,
}

impl Backends {
    pub fn noodles() -> Self {
        Self {
            variants: Arc::new(VariantSource),
            alignments: Arc::new(BamSource),
            sequences: Arc::new(FastaSource),
        }
    }
}

/// Dispatches variant shards to the VCF or BCF reader by extension.
pub struct VariantSource;

#[async_trait]
impl RecordSource for VariantSource {
    type Record = VariantRecord;

    async fn open(&self, shard: &ShardLocation) -> Result<Box<dyn ShardReader<VariantRecord>>> {
        match FileKind::variant_shard(&shard.path) {
            Some(FileKind::Vcf) => Ok(Box::new(VcfReader::open(shard).await?)),
            Some(FileKind::Bcf) => Ok(Box::new(BcfReader::open(shard).await?)),
            _ => Err(Error::BackendUnavailable(format!(
                "{} is not a variant shard",
                shard.path.display()
            ))),
        }
    }
}

/// Positioning state shared by readers: after a seek, records are withheld
/// until the first one on the target reference that ends after the target
/// start, or the first one on any later reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SeekState {
    Streaming,
    Seeking {
        reference_name: String,
        start: u64,
        seen_target: bool,
    },
    Exhausted,
}

impl SeekState {
    pub(crate) fn seeking(reference_name: &str, start: u64) -> Self {
        SeekState::Seeking {
            reference_name: reference_name.to_string(),
            start,
            seen_target: false,
        }
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        matches!(self, SeekState::Exhausted)
    }

    pub(crate) fn admit(&mut self, reference_name: &str, end: u64) -> bool {
        let (admit, stream) = match self {
            SeekState::Streaming => return true,
            SeekState::Exhausted => return false,
            SeekState::Seeking {
                reference_name: target,
                start,
                seen_target,
            } => {
                if target == reference_name {
                    *seen_target = true;
                    let overlaps = end > *start;
                    (overlaps, overlaps)
                } else if *seen_target {
                    (true, true)
                } else {
                    (false, false)
                }
            }
        };
        if stream {
            *self = SeekState::Streaming;
        }
        admit
    }
}

/// Parse a textual VCF genotype such as `0|1` or `./1`.
pub fn parse_genotype(text: &str) -> (Vec<i32>, bool) {
    let phased = text.contains('|');
    let alleles = text
        .split(['/', '|'])
        .map(|allele| allele.parse::<i32>().unwrap_or(-1))
        .collect();
    (alleles, phased)
}

pub(crate) fn unavailable(path: &Path, what: &str, e: impl std::fmt::Display) -> Error {
    Error::BackendUnavailable(format!("{}: {} ({})", path.display(), what, e))
}

pub(crate) fn index_path(shard: &ShardLocation) -> Result<&Path> {
    shard.index_path.as_deref().ok_or_else(|| {
        Error::BackendUnavailable(format!("{} has no index", shard.path.display()))
    })
}
