use super::{
    AlignmentRecord, RecordSource, SeekState, ShardLocation, ShardReader, index_path, unavailable,
};
use crate::Result;
use async_trait::async_trait;
use noodles::bam;
use noodles::bam::bai;
use noodles::bgzf;
use noodles::core::Position;
use noodles::core::region::Interval;
use noodles::csi::binning_index::BinningIndex;
use noodles::sam;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value;
use std::path::{Path, PathBuf};
use tokio::fs::File;

/// BAM alignments with a BAI index.
pub struct BamSource;

#[async_trait]
impl RecordSource for BamSource {
    type Record = AlignmentRecord;

    async fn open(&self, shard: &ShardLocation) -> Result<Box<dyn ShardReader<AlignmentRecord>>> {
        Ok(Box::new(BamReader::open(shard).await?))
    }
}

pub struct BamReader {
    path: PathBuf,
    // bam::r#async::io::Reader::new wraps the file in BGZF internally - don't double-wrap
    reader: bam::r#async::io::Reader<bgzf::r#async::Reader<File>>,
    header: sam::Header,
    index: bai::Index,
    record: RecordBuf,
    state: SeekState,
}

impl BamReader {
    pub async fn open(shard: &ShardLocation) -> Result<Self> {
        let index_path = index_path(shard)?;
        let index = bai::r#async::read(index_path)
            .await
            .map_err(|e| unavailable(index_path, "failed to read BAI index", e))?;

        let file = File::open(&shard.path)
            .await
            .map_err(|e| unavailable(&shard.path, "failed to open BAM", e))?;
        let mut reader = bam::r#async::io::Reader::new(file);
        let header = reader
            .read_header()
            .await
            .map_err(|e| unavailable(&shard.path, "failed to read BAM header", e))?;

        Ok(Self {
            path: shard.path.clone(),
            reader,
            header,
            index,
            record: RecordBuf::default(),
            state: SeekState::Streaming,
        })
    }

    fn convert(&self) -> Option<AlignmentRecord> {
        let record = &self.record;
        let id = record.reference_sequence_id()?;
        let (name, _) = self.header.reference_sequences().get_index(id)?;
        let start = usize::from(record.alignment_start()?) as u64 - 1;
        let end = record
            .alignment_end()
            .map(|position| usize::from(position) as u64)
            .unwrap_or(start + 1)
            .max(start + 1);

        let read_group = match record.data().get(&Tag::READ_GROUP) {
            Some(Value::String(id)) => Some(id.to_string()),
            _ => None,
        };

        Some(AlignmentRecord {
            fragment_name: record.name().map(|n| n.to_string()).unwrap_or_default(),
            reference_name: name.to_string(),
            start,
            end,
            mapping_quality: record.mapping_quality().map(|q| q.get()),
            flags: record.flags().bits(),
            sequence: String::from_utf8_lossy(record.sequence().as_ref()).into_owned(),
            read_group,
        })
    }
}

#[async_trait]
impl ShardReader<AlignmentRecord> for BamReader {
    async fn seek(&mut self, reference_name: &str, start: u64) -> Result<()> {
        let Some(id) = self
            .header
            .reference_sequences()
            .get_index_of(reference_name.as_bytes())
        else {
            self.state = SeekState::Exhausted;
            return Ok(());
        };

        // Alignment coordinates are 0-based half-open, noodles uses 1-based closed
        let begin = Position::try_from(start as usize + 1)
            .map_err(|e| unavailable(&self.path, "invalid start position", e))?;
        let chunks = self
            .index
            .query(id, Interval::from(begin..))
            .map_err(|e| unavailable(&self.path, "index query failed", e))?;

        match chunks.iter().map(|chunk| chunk.start()).min() {
            Some(position) => {
                self.reader
                    .get_mut()
                    .seek(position)
                    .await
                    .map_err(|e| unavailable(&self.path, "seek failed", e))?;
                self.state = SeekState::seeking(reference_name, start);
            }
            None => self.state = SeekState::Exhausted,
        }
        Ok(())
    }

    async fn next_record(&mut self) -> Result<Option<AlignmentRecord>> {
        loop {
            if self.state.is_exhausted() {
                return Ok(None);
            }
            let read = self
                .reader
                .read_record_buf(&self.header, &mut self.record)
                .await
                .map_err(|e| unavailable(&self.path, "failed to read BAM record", e))?;
            if read == 0 {
                return Ok(None);
            }
            // Unplaced reads sort last and are never part of a region query.
            let Some(record) = self.convert() else {
                continue;
            };
            if self.state.admit(&record.reference_name, record.end) {
                return Ok(Some(record));
            }
        }
    }
}

/// Read the BAM header from a file
pub(super) async fn read_header(bam_path: &Path) -> Result<sam::Header> {
    let file = File::open(bam_path)
        .await
        .map_err(|e| unavailable(bam_path, "failed to open BAM", e))?;

    let mut reader = bam::r#async::io::Reader::new(file);

    reader
        .read_header()
        .await
        .map_err(|e| unavailable(bam_path, "failed to read BAM header", e))
}
