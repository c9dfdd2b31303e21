use super::{
    CallRecord, SeekState, ShardLocation, ShardReader, VariantRecord, index_path, parse_genotype,
    unavailable,
};
use crate::{Error, Result};
use async_trait::async_trait;
use noodles::bgzf;
use noodles::core::Position;
use noodles::core::region::Interval;
use noodles::csi::binning_index::BinningIndex;
use noodles::vcf::variant::RecordBuf;
use noodles::vcf::variant::record::samples::series::value::genotype::Phasing;
use noodles::vcf::variant::record_buf::info::field::Value as InfoValue;
use noodles::vcf::variant::record_buf::info::field::value::Array;
use noodles::vcf::variant::record_buf::samples::sample::Value as SampleValue;
use noodles::{csi, tabix, vcf};
use std::path::{Path, PathBuf};
use tokio::fs::File;

const GENOTYPE_KEY: &str = "GT";

pub(super) type DynIndex = Box<dyn BinningIndex + Send + Sync>;

/// Load a tabix or CSI index, chosen by extension.
pub(super) async fn read_binning_index(path: &Path) -> Result<DynIndex> {
    let is_csi = path.extension().and_then(|e| e.to_str()) == Some("csi");
    if is_csi {
        let index = csi::r#async::read(path)
            .await
            .map_err(|e| unavailable(path, "failed to read CSI index", e))?;
        Ok(Box::new(index))
    } else {
        let index = tabix::r#async::read(path)
            .await
            .map_err(|e| unavailable(path, "failed to read tabix index", e))?;
        Ok(Box::new(index))
    }
}

/// Reference names an index header records, in id order.
pub(super) fn index_reference_names(index: &dyn BinningIndex) -> Option<Vec<String>> {
    index.header().map(|header| {
        header
            .reference_sequence_names()
            .iter()
            .map(|name| name.to_string())
            .collect()
    })
}

/// Seek a BGZF stream to the first chunk overlapping `start..` on `reference_id`.
pub(super) fn first_chunk(
    index: &dyn BinningIndex,
    reference_id: usize,
    start: u64,
) -> Result<Option<bgzf::VirtualPosition>> {
    let begin = Position::try_from(start as usize + 1)
        .map_err(|e| Error::InvalidInput(format!("invalid start position: {}", e)))?;
    let interval = Interval::from(begin..);
    let chunks = index
        .query(reference_id, interval)
        .map_err(|e| Error::BackendUnavailable(format!("index query failed: {}", e)))?;
    Ok(chunks.iter().map(|chunk| chunk.start()).min())
}

/// bgzip-compressed VCF with a tabix (or CSI) index.
pub struct VcfReader {
    path: PathBuf,
    reader: vcf::r#async::io::Reader<bgzf::r#async::Reader<File>>,
    header: vcf::Header,
    index: DynIndex,
    record: RecordBuf,
    state: SeekState,
}

impl VcfReader {
    pub async fn open(shard: &ShardLocation) -> Result<Self> {
        let index = read_binning_index(index_path(shard)?).await?;

        let file = File::open(&shard.path)
            .await
            .map_err(|e| unavailable(&shard.path, "failed to open VCF", e))?;
        let mut reader = vcf::r#async::io::Reader::new(bgzf::r#async::Reader::new(file));
        let header = reader
            .read_header()
            .await
            .map_err(|e| unavailable(&shard.path, "failed to read VCF header", e))?;

        Ok(Self {
            path: shard.path.clone(),
            reader,
            header,
            index,
            record: RecordBuf::default(),
            state: SeekState::Streaming,
        })
    }

    fn reference_id(&self, name: &str) -> Option<usize> {
        match index_reference_names(self.index.as_ref()) {
            Some(names) => names.iter().position(|n| n == name),
            None => self.header.contigs().get_index_of(name),
        }
    }
}

#[async_trait]
impl ShardReader<VariantRecord> for VcfReader {
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
                .read_record_buf(&self.header, &mut self.record)
                .await
                .map_err(|e| unavailable(&self.path, "failed to read VCF record", e))?;
            if read == 0 {
                return Ok(None);
            }
            let record = variant_from_buf(&self.header, &self.record)?;
            if self.state.admit(&record.reference_name, record.end) {
                return Ok(Some(record));
            }
        }
    }
}

/// Convert a decoded VCF/BCF record to the engine's representation.
pub(super) fn variant_from_buf(header: &vcf::Header, record: &RecordBuf) -> Result<VariantRecord> {
    let start = record
        .variant_start()
        .map(|position| usize::from(position) as u64 - 1)
        .ok_or_else(|| {
            Error::BackendUnavailable(format!(
                "variant on {} has no position",
                record.reference_sequence_name()
            ))
        })?;
    let reference_bases = record.reference_bases().to_string();
    let end = start + reference_bases.len().max(1) as u64;

    let info = record
        .info()
        .as_ref()
        .iter()
        .map(|(key, value)| {
            let values = value.as_ref().map(info_strings).unwrap_or_default();
            (key.clone(), values)
        })
        .collect();

    let calls = match record.samples().select(GENOTYPE_KEY) {
        Some(values) => header
            .sample_names()
            .iter()
            .enumerate()
            .map(|(i, sample)| call_from(sample, values.get(i).flatten()))
            .collect(),
        None => Vec::new(),
    };

    Ok(VariantRecord {
        reference_name: record.reference_sequence_name().to_string(),
        start,
        end,
        ids: record.ids().as_ref().iter().cloned().collect(),
        reference_bases,
        alternate_bases: record.alternate_bases().as_ref().to_vec(),
        quality: record.quality_score(),
        filters: record.filters().as_ref().iter().cloned().collect(),
        info,
        calls,
    })
}

fn call_from(sample: &str, value: Option<&SampleValue>) -> CallRecord {
    let (genotype, phased) = match value {
        Some(SampleValue::Genotype(genotype)) => {
            let alleles = genotype.as_ref();
            let indices = alleles
                .iter()
                .map(|allele| allele.position().map(|p| p as i32).unwrap_or(-1))
                .collect();
            // The first allele's phasing carries no meaning.
            let phased = alleles
                .iter()
                .skip(1)
                .any(|allele| allele.phasing() == Phasing::Phased);
            (indices, phased)
        }
        Some(SampleValue::String(text)) => parse_genotype(text),
        _ => (Vec::new(), false),
    };
    CallRecord {
        sample: sample.to_string(),
        genotype,
        phased,
    }
}

fn info_strings(value: &InfoValue) -> Vec<String> {
    fn each<T: ToString>(values: &[Option<T>]) -> Vec<String> {
        values
            .iter()
            .map(|v| v.as_ref().map_or_else(|| ".".to_string(), ToString::to_string))
            .collect()
    }

    match value {
        InfoValue::Integer(n) => vec![n.to_string()],
        InfoValue::Float(n) => vec![n.to_string()],
        InfoValue::Flag => Vec::new(),
        InfoValue::Character(c) => vec![c.to_string()],
        InfoValue::String(s) => vec![s.clone()],
        InfoValue::Array(Array::Integer(values)) => each(values),
        InfoValue::Array(Array::Float(values)) => each(values),
        InfoValue::Array(Array::Character(values)) => each(values),
        InfoValue::Array(Array::String(values)) => each(values),
    }
}
