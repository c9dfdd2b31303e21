use super::vcf::{index_reference_names, read_binning_index};
use super::{
    ANNOTATION_FIELDS, AlignmentSummary, FormatInspector, ReadGroupSummary, SequenceSummary,
    VariantShardSummary, bam, fasta,
};
use crate::registry::FileKind;
use crate::{Error, Result};
use async_trait::async_trait;
use noodles::bam::bai;
use noodles::sam::header::record::value::map::tag::Other;
use noodles::{bcf, bgzf, vcf};
use std::path::Path;
use tokio::fs::File;

/// Inspects real files through noodles.
pub struct NoodlesInspector;

#[async_trait]
impl FormatInspector for NoodlesInspector {
    async fn sequences(&self, fasta: &Path, index: &Path) -> Result<Vec<SequenceSummary>> {
        require_file(fasta).await?;
        let sequences = fasta::read_summaries(index).await?;
        if sequences.is_empty() {
            return Err(Error::InvalidFormat(format!(
                "{} lists no sequences",
                index.display()
            )));
        }
        Ok(sequences)
    }

    async fn variant_shard(&self, path: &Path, index: &Path) -> Result<VariantShardSummary> {
        let header = match FileKind::variant_shard(path) {
            Some(FileKind::Vcf) => read_vcf_header(path).await?,
            Some(FileKind::Bcf) => read_bcf_header(path).await?,
            _ => {
                return Err(Error::InvalidFormat(format!(
                    "{} is not a VCF or BCF file",
                    path.display()
                )));
            }
        };
        let index = read_binning_index(index).await.map_err(as_invalid)?;

        let reference_names = index_reference_names(index.as_ref())
            .unwrap_or_else(|| header.contigs().keys().cloned().collect());
        let annotation_field = ANNOTATION_FIELDS
            .iter()
            .find(|field| header.infos().contains_key(**field))
            .map(|field| field.to_string());

        Ok(VariantShardSummary {
            sample_names: header.sample_names().iter().cloned().collect(),
            reference_names,
            annotation_field,
        })
    }

    async fn alignments(&self, path: &Path, index: &Path) -> Result<AlignmentSummary> {
        bai::r#async::read(index)
            .await
            .map_err(|e| Error::InvalidFormat(format!("{}: {}", index.display(), e)))?;
        let header = bam::read_header(path).await.map_err(as_invalid)?;

        let read_groups = header
            .read_groups()
            .iter()
            .map(|(id, map)| {
                let sample = Other::try_from(*b"SM")
                    .ok()
                    .and_then(|tag| map.other_fields().get(&tag))
                    .map(|value| value.to_string());
                ReadGroupSummary {
                    id: id.to_string(),
                    sample,
                }
            })
            .collect();

        Ok(AlignmentSummary {
            read_groups,
            reference_names: header
                .reference_sequences()
                .keys()
                .map(|name| name.to_string())
                .collect(),
        })
    }
}

async fn require_file(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(()),
        _ => Err(Error::InvalidFormat(format!(
            "{} is missing or not a file",
            path.display()
        ))),
    }
}

async fn read_vcf_header(path: &Path) -> Result<vcf::Header> {
    let file = File::open(path)
        .await
        .map_err(|e| Error::InvalidFormat(format!("{}: {}", path.display(), e)))?;
    let mut reader = vcf::r#async::io::Reader::new(bgzf::r#async::Reader::new(file));
    reader
        .read_header()
        .await
        .map_err(|e| Error::InvalidFormat(format!("{}: bad VCF header: {}", path.display(), e)))
}

async fn read_bcf_header(path: &Path) -> Result<vcf::Header> {
    let file = File::open(path)
        .await
        .map_err(|e| Error::InvalidFormat(format!("{}: {}", path.display(), e)))?;
    let mut reader = bcf::r#async::io::Reader::new(file);
    reader
        .read_header()
        .await
        .map_err(|e| Error::InvalidFormat(format!("{}: bad BCF header: {}", path.display(), e)))
}

fn as_invalid(e: Error) -> Error {
    match e {
        Error::BackendUnavailable(message) => Error::InvalidFormat(message),
        other => other,
    }
}
