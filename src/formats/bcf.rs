use super::vcf::{DynIndex, first_chunk, index_reference_names, read_binning_index, variant_from_buf};
use super::{SeekState, ShardLocation, ShardReader, VariantRecord, index_path, unavailable};
use crate::Result;
use async_trait::async_trait;
use noodles::{bcf, bgzf, vcf};
use std::path::PathBuf;
use tokio::fs::File;

/// BCF with a CSI index.
pub struct BcfReader {
    path: PathBuf,
    // bcf::r#async::io::Reader::new wraps the file in BGZF itself
    reader: bcf::r#async::io::Reader<bgzf::r#async::Reader<File>>,
    header: vcf::Header,
    index: DynIndex,
    record: bcf::Record,
    state: SeekState,
}

impl BcfReader {
    pub async fn open(shard: &ShardLocation) -> Result<Self> {
        let index = read_binning_index(index_path(shard)?).await?;

        let file = File::open(&shard.path)
            .await
            .map_err(|e| unavailable(&shard.path, "failed to open BCF", e))?;
        let mut reader = bcf::r#async::io::Reader::new(file);
        let header = reader
            .read_header()
            .await
            .map_err(|e| unavailable(&shard.path, "failed to read BCF header", e))?;

        Ok(Self {
            path: shard.path.clone(),
            reader,
            header,
            index,
            record: bcf::Record::default(),
            state: SeekState::Streaming,
        })
    }

    fn reference_id(&self, name: &str) -> Option<usize> {
        // CSI indices for BCF usually carry no names; ids follow the contig
        // dictionary.
        match index_reference_names(self.index.as_ref()) {
            Some(names) => names.iter().position(|n| n == name),
            None => self.header.contigs().get_index_of(name),
        }
    }
}

#[async_trait]
impl ShardReader<VariantRecord> for BcfReader {
    async fn seek(&mut self, reference_name: &str, start: u64) -> Result<()> {
        let chunk = match self.reference_id(reference_name) {
            Some(id) => first_chunk(self.index.as_ref(), id, start)?,
            None => None,
        };
        match chunk {
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

    async fn next_record(&mut self) -> Result<Option<VariantRecord>> {
        loop {
            if self.state.is_exhausted() {
                return Ok(None);
            }
            let read = self
                .reader
                .read_record(&mut self.record)
                .await
                .map_err(|e| unavailable(&self.path, "failed to read BCF record", e))?;
            if read == 0 {
                return Ok(None);
            }
            let buf = vcf::variant::RecordBuf::try_from_variant_record(&self.header, &self.record)
                .map_err(|e| unavailable(&self.path, "failed to decode BCF record", e))?;
            let record = variant_from_buf(&self.header, &buf)?;
            if self.state.admit(&record.reference_name, record.end) {
                return Ok(Some(record));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn test_shard_without_index_is_unavailable() {
        let shard = ShardLocation {
            index: 0,
            path: PathBuf::from("/nonexistent/chr1.bcf"),
            index_path: None,
        };
        let err = BcfReader::open(&shard).await.err().unwrap();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }
}
