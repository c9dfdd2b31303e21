//! In-process backends keyed by shard path.
//!
//! Useful for embedding the engine over records that are already in memory
//! and for exercising the engine without real BGZF files.

use super::{
    AlignmentSummary, FormatInspector, RecordSource, SeekState, SequenceSource, SequenceSummary,
    ShardLocation, ShardReader, ShardRecord, VariantShardSummary,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Records per shard path, each shard already in native order.
pub struct MemorySource<R> {
    shards: RwLock<HashMap<PathBuf, Vec<R>>>,
    /// Shards whose reader fails after yielding this many records.
    fail_after: RwLock<HashMap<PathBuf, usize>>,
}

impl<R> Default for MemorySource<R> {
    fn default() -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            fail_after: RwLock::new(HashMap::new()),
        }
    }
}

impl<R: Clone> MemorySource<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, records: Vec<R>) {
        if let Ok(mut shards) = self.shards.write() {
            shards.insert(path.into(), records);
        }
    }

    pub fn fail_after(&self, path: impl Into<PathBuf>, records: usize) {
        if let Ok(mut fail_after) = self.fail_after.write() {
            fail_after.insert(path.into(), records);
        }
    }
}

#[async_trait]
impl<R> RecordSource for MemorySource<R>
where
    R: ShardRecord + Clone + Send + Sync + 'static,
{
    type Record = R;

    async fn open(&self, shard: &ShardLocation) -> Result<Box<dyn ShardReader<R>>> {
        let records = self
            .shards
            .read()
            .map_err(|_| Error::Internal("memory source lock poisoned".to_string()))?
            .get(&shard.path)
            .cloned()
            .ok_or_else(|| {
                Error::BackendUnavailable(format!("{} is not loaded", shard.path.display()))
            })?;
        let fail_after = self
            .fail_after
            .read()
            .map_err(|_| Error::Internal("memory source lock poisoned".to_string()))?
            .get(&shard.path)
            .copied();

        Ok(Box::new(MemoryReader {
            path: shard.path.clone(),
            records,
            position: 0,
            fail_after,
            state: SeekState::Streaming,
        }))
    }
}

struct MemoryReader<R> {
    path: PathBuf,
    records: Vec<R>,
    position: usize,
    fail_after: Option<usize>,
    state: SeekState,
}

#[async_trait]
impl<R> ShardReader<R> for MemoryReader<R>
where
    R: ShardRecord + Clone + Send + Sync + 'static,
{
    async fn seek(&mut self, reference_name: &str, start: u64) -> Result<()> {
        let first = self
            .records
            .iter()
            .position(|r| r.reference_name() == reference_name);
        match first {
            Some(position) => {
                self.position = position;
                self.state = SeekState::seeking(reference_name, start);
            }
            None => self.state = SeekState::Exhausted,
        }
        Ok(())
    }

    async fn next_record(&mut self) -> Result<Option<R>> {
        while !self.state.is_exhausted() {
            if self.fail_after.is_some_and(|limit| self.position >= limit) {
                return Err(Error::BackendUnavailable(format!(
                    "{}: read failed at record {}",
                    self.path.display(),
                    self.position
                )));
            }
            let Some(record) = self.records.get(self.position) else {
                return Ok(None);
            };
            self.position += 1;
            if self.state.admit(record.reference_name(), record.end()) {
                return Ok(Some(record.clone()));
            }
        }
        Ok(None)
    }
}

/// Reference bases per FASTA path and sequence name.
#[derive(Default)]
pub struct MemorySequences {
    sequences: RwLock<HashMap<PathBuf, HashMap<String, String>>>,
}

impl MemorySequences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, name: &str, bases: &str) {
        if let Ok(mut sequences) = self.sequences.write() {
            sequences
                .entry(path.into())
                .or_default()
                .insert(name.to_string(), bases.to_string());
        }
    }
}

#[async_trait]
impl SequenceSource for MemorySequences {
    async fn read_bases(
        &self,
        shard: &ShardLocation,
        name: &str,
        start: u64,
        end: u64,
    ) -> Result<String> {
        let sequences = self
            .sequences
            .read()
            .map_err(|_| Error::Internal("memory source lock poisoned".to_string()))?;
        let bases = sequences
            .get(&shard.path)
            .and_then(|by_name| by_name.get(name))
            .ok_or_else(|| {
                Error::BackendUnavailable(format!("{}: no sequence {}", shard.path.display(), name))
            })?;
        let end = (end as usize).min(bases.len());
        let start = (start as usize).min(end);
        Ok(bases[start..end].to_string())
    }
}

/// Inspector answering from canned summaries keyed by file name, while
/// still checking that the files and indices exist on disk.
#[derive(Default)]
pub struct MemoryInspector {
    pub sequences: HashMap<String, Vec<SequenceSummary>>,
    pub variant_shards: HashMap<String, VariantShardSummary>,
    pub alignments: HashMap<String, AlignmentSummary>,
    /// File names whose inspection reports `InvalidFormat`.
    pub corrupt: HashSet<String>,
}

impl MemoryInspector {
    fn key(&self, path: &Path, index: &Path) -> Result<String> {
        for file in [path, index] {
            if !file.exists() {
                return Err(Error::InvalidFormat(format!(
                    "{} is missing",
                    file.display()
                )));
            }
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if self.corrupt.contains(&name) {
            return Err(Error::InvalidFormat(format!("{} is corrupt", path.display())));
        }
        Ok(name)
    }
}

#[async_trait]
impl FormatInspector for MemoryInspector {
    async fn sequences(&self, fasta: &Path, index: &Path) -> Result<Vec<SequenceSummary>> {
        let key = self.key(fasta, index)?;
        Ok(self.sequences.get(&key).cloned().unwrap_or_default())
    }

    async fn variant_shard(&self, path: &Path, index: &Path) -> Result<VariantShardSummary> {
        let key = self.key(path, index)?;
        Ok(self.variant_shards.get(&key).cloned().unwrap_or_default())
    }

    async fn alignments(&self, path: &Path, index: &Path) -> Result<AlignmentSummary> {
        let key = self.key(path, index)?;
        Ok(self.alignments.get(&key).cloned().unwrap_or_default())
    }
}
