//! Small indexed files written on the fly for the noodles readers.

use super::ShardLocation;
use noodles::bam::{self, bai};
use noodles::csi::binning_index::Indexer;
use noodles::csi::binning_index::index::reference_sequence::bin::Chunk;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::io::Write as _;
use noodles::{bgzf, sam, tabix, vcf};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const VCF_HEADER: &str = "\
##fileformat=VCFv4.3
##INFO=<ID=ANN,Number=.,Type=String,Description=\"Functional annotations\">
##FILTER=<ID=PASS,Description=\"All filters passed\">
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
##contig=<ID=chr1,length=10000>
##contig=<ID=chr2,length=10000>
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts1\ts2
";

/// `count` SNVs on `reference`, the i-th at 0-based position `i * 10`.
/// Every third record carries a missense annotation.
pub fn vcf_text(reference: &str, count: u64) -> String {
    let mut text = VCF_HEADER.to_string();
    for i in 0..count {
        let info = if i % 3 == 0 {
            "ANN=G|missense_variant|MODERATE|GENE1|G1|transcript|T1"
        } else {
            "."
        };
        text.push_str(&format!(
            "{}\t{}\t.\tA\tG\t50\tPASS\t{}\tGT\t0|1\t1/1\n",
            reference,
            i * 10 + 1,
            info
        ));
    }
    text
}

/// bgzip `text` to `path` and write a tabix index next to it.
pub fn write_indexed_vcf(path: &Path, text: &str) -> ShardLocation {
    let mut writer = bgzf::Writer::new(File::create(path).unwrap());
    writer.write_all(text.as_bytes()).unwrap();
    writer.finish().unwrap();

    let index = vcf::index(path).unwrap();
    let index_path = PathBuf::from(format!("{}.tbi", path.display()));
    tabix::write(&index_path, &index).unwrap();
    ShardLocation {
        index: 0,
        path: path.to_path_buf(),
        index_path: Some(index_path),
    }
}

pub const SAM: &str = "\
@HD\tVN:1.6\tSO:coordinate
@SQ\tSN:chrM\tLN:1000
@SQ\tSN:chr2\tLN:1000
@RG\tID:rg1\tSM:s1
r1\t0\tchrM\t11\t60\t4M\t*\t0\t0\tACGT\tIIII\tRG:Z:rg1
r2\t0\tchrM\t101\t60\t4M\t*\t0\t0\tACGT\tIIII\tRG:Z:rg1
r3\t16\tchrM\t501\t20\t4M\t*\t0\t0\tTTGA\tIIII
r4\t0\tchr2\t21\t30\t4M\t*\t0\t0\tGGCC\tIIII\tRG:Z:rg1
";

/// Convert [`SAM`] to a coordinate-sorted BAM at `path` and index it.
pub fn write_indexed_bam(path: &Path) -> ShardLocation {
    let mut reader = sam::io::Reader::new(SAM.as_bytes());
    let header = reader.read_header().unwrap();

    let mut writer = bam::io::Writer::new(File::create(path).unwrap());
    writer.write_header(&header).unwrap();
    for result in reader.record_bufs(&header) {
        let record = result.unwrap();
        writer.write_alignment_record(&header, &record).unwrap();
    }
    writer.try_finish().unwrap();
    drop(writer);

    let mut reader = bam::io::Reader::new(File::open(path).unwrap());
    let header = reader.read_header().unwrap();
    let mut indexer = Indexer::default();
    let mut record = RecordBuf::default();
    let mut start = reader.get_ref().virtual_position();
    while reader.read_record_buf(&header, &mut record).unwrap() != 0 {
        let end = reader.get_ref().virtual_position();
        let context = match (
            record.reference_sequence_id(),
            record.alignment_start(),
            record.alignment_end(),
        ) {
            (Some(id), Some(first), Some(last)) => {
                Some((id, first, last, !record.flags().is_unmapped()))
            }
            _ => None,
        };
        indexer.add_record(context, Chunk::new(start, end)).unwrap();
        start = end;
    }
    let index: bai::Index = indexer.build(header.reference_sequences().len());

    let index_path = PathBuf::from(format!("{}.bai", path.display()));
    bai::write(&index_path, &index).unwrap();
    ShardLocation {
        index: 0,
        path: path.to_path_buf(),
        index_path: Some(index_path),
    }
}
