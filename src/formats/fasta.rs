use super::{SequenceSource, SequenceSummary, ShardLocation, index_path, unavailable};
use crate::{Error, Result};
use async_trait::async_trait;
use noodles::core::{Position, Region};
use noodles::fasta;
use noodles::fasta::fai;
use std::path::{Path, PathBuf};

/// Indexed (optionally bgzipped) FASTA. noodles' FASTA reader is blocking,
/// so every access runs on the blocking pool.
pub struct FastaSource;

#[async_trait]
impl SequenceSource for FastaSource {
    async fn read_bases(
        &self,
        shard: &ShardLocation,
        name: &str,
        start: u64,
        end: u64,
    ) -> Result<String> {
        if start >= end {
            return Ok(String::new());
        }
        let path = shard.path.clone();
        let index = index_path(shard)?.to_path_buf();
        let name = name.to_string();

        tokio::task::spawn_blocking(move || read_window(&path, &index, &name, start, end))
            .await
            .map_err(|e| Error::Internal(format!("FASTA read task failed: {}", e)))?
    }
}

fn read_window(path: &Path, index: &Path, name: &str, start: u64, end: u64) -> Result<String> {
    let index = fai::read(index).map_err(|e| unavailable(index, "failed to read FAI index", e))?;
    let mut reader = fasta::io::indexed_reader::Builder::default()
        .set_index(index)
        .build_from_path(path)
        .map_err(|e| unavailable(path, "failed to open FASTA", e))?;

    // 0-based half-open to 1-based closed
    let begin = Position::try_from(start as usize + 1)
        .map_err(|e| Error::InvalidInput(format!("invalid start position: {}", e)))?;
    let last = Position::try_from(end as usize)
        .map_err(|e| Error::InvalidInput(format!("invalid end position: {}", e)))?;
    let region = Region::new(name, begin..=last);

    let record = reader
        .query(&region)
        .map_err(|e| unavailable(path, "sequence query failed", e))?;
    Ok(String::from_utf8_lossy(record.sequence().as_ref()).into_owned())
}

/// Sequence names and lengths from a FAI index.
pub(super) async fn read_summaries(index: &Path) -> Result<Vec<SequenceSummary>> {
    let path: PathBuf = index.to_path_buf();
    let index = tokio::task::spawn_blocking(move || fai::read(&path))
        .await
        .map_err(|e| Error::Internal(format!("failed to read FAI index: {}", e)))?
        .map_err(|e| Error::InvalidFormat(format!("failed to read FAI index: {}", e)))?;

    // FAI Index wraps Vec<Record>, access via as_ref()
    Ok(index
        .as_ref()
        .iter()
        .map(|record| SequenceSummary {
            name: String::from_utf8_lossy(record.name()).into_owned(),
            length: record.length() as u64,
        })
        .collect())
}
