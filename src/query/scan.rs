//! The paginated scan shared by every record query.
//!
//! Records of an object are ordered by shard index, then by each shard's
//! native order. A scan walks shards from the resume position, applies the
//! region and the caller's projection (which doubles as the post-filter),
//! and stops once the page is full. The continuation always points at the
//! next *matching* record, found by reading ahead past the full page, so a
//! token is only ever issued when more results exist.

use super::Region;
use crate::formats::{RecordSource, ShardLocation, ShardRecord};
use crate::locator::{IntraShardCursor, ScanPosition};
use crate::{Error, Result};
use serde::Serialize;

pub struct ScanRequest<'a> {
    pub shards: &'a [ShardLocation],
    /// Reference names recorded per shard; an empty list means unknown.
    pub shard_references: &'a [Vec<String>],
    pub region: Option<&'a Region>,
    pub page_size: usize,
    pub max_response_length: usize,
    pub start: ScanPosition,
}

#[derive(Debug)]
pub struct ScanOutcome<T> {
    pub records: Vec<T>,
    pub next: Option<ScanPosition>,
    /// Shards that could not be read, by shard index.
    pub unavailable_shards: Vec<usize>,
    /// Estimated serialized size of `records`.
    pub bytes: usize,
}

/// Accumulates one page, enforcing the record count and byte budget.
struct PageBuilder<T> {
    records: Vec<T>,
    bytes: usize,
    page_size: usize,
    max_bytes: usize,
    full: bool,
}

impl<T> PageBuilder<T> {
    fn new(page_size: usize, max_bytes: usize) -> Self {
        Self {
            records: Vec::new(),
            bytes: 0,
            page_size: page_size.max(1),
            max_bytes,
            full: false,
        }
    }

    /// A record that would push a non-empty page over budget starts the
    /// next page instead.
    fn fits(&self, size: usize) -> bool {
        self.records.is_empty() || self.bytes + size <= self.max_bytes
    }

    fn push(&mut self, record: T, size: usize) {
        self.records.push(record);
        self.bytes += size;
        if self.records.len() >= self.page_size || self.bytes >= self.max_bytes {
            self.full = true;
        }
    }
}

/// Counts consecutive emitted records sharing one sort key, so a cursor can
/// say how many of them to skip on resume.
#[derive(Default)]
struct RunTracker {
    key: Option<(String, u64)>,
    run: u64,
}

impl RunTracker {
    fn resumed(cursor: &IntraShardCursor) -> Self {
        Self {
            key: Some((cursor.reference_name.clone(), cursor.start)),
            run: cursor.skip,
        }
    }

    fn skip_for(&self, reference_name: &str, start: u64) -> u64 {
        match &self.key {
            Some((name, key_start)) if name == reference_name && *key_start == start => self.run,
            _ => 0,
        }
    }

    fn observe(&mut self, reference_name: &str, start: u64) {
        self.run = self.skip_for(reference_name, start) + 1;
        self.key = Some((reference_name.to_string(), start));
    }
}

enum Phase {
    BeforeReference,
    OnReference,
    Past,
}

/// Drops records that precede a resume cursor, then skips the records
/// sharing the cursor's key that were already returned.
struct Resume {
    cursor: IntraShardCursor,
    phase: Phase,
    remaining_skip: u64,
}

impl Resume {
    fn new(cursor: IntraShardCursor) -> Self {
        Self {
            remaining_skip: cursor.skip,
            cursor,
            phase: Phase::BeforeReference,
        }
    }

    /// Whether a record comes at or after the cursor key.
    fn reached<R: ShardRecord>(&mut self, record: &R) -> bool {
        let on_reference = record.reference_name() == self.cursor.reference_name;
        match self.phase {
            Phase::BeforeReference if on_reference => self.phase = Phase::OnReference,
            Phase::BeforeReference => return false,
            Phase::OnReference if !on_reference => self.phase = Phase::Past,
            _ => {}
        }
        match self.phase {
            Phase::OnReference => record.start() >= self.cursor.start,
            _ => true,
        }
    }

    /// Consume one matching record against the skip count. Returns true if
    /// the record was already returned by an earlier page.
    fn skip<R: ShardRecord>(&mut self, record: &R) -> Result<bool> {
        if self.remaining_skip == 0 {
            return Ok(false);
        }
        if record.reference_name() == self.cursor.reference_name
            && record.start() == self.cursor.start
        {
            self.remaining_skip -= 1;
            Ok(true)
        } else {
            Err(Error::InvalidToken(
                "token does not match the records at its position".to_string(),
            ))
        }
    }
}

/// Outcome of reading one shard.
enum ShardEnd {
    Exhausted,
    /// Stopped at the first record of the next page.
    Continue(ScanPosition),
}

pub async fn scan<R, T, F>(
    source: &dyn RecordSource<Record = R>,
    request: ScanRequest<'_>,
    mut project: F,
) -> Result<ScanOutcome<T>>
where
    R: ShardRecord + Send + 'static,
    T: Serialize + Send,
    F: FnMut(&R) -> Option<T> + Send,
{
    if request.start.shard_index > request.shards.len() {
        return Err(Error::InvalidToken(format!(
            "shard {} is out of range",
            request.start.shard_index
        )));
    }

    let mut page = PageBuilder::new(request.page_size, request.max_response_length);
    let mut unavailable_shards = Vec::new();

    for shard_index in request.start.shard_index..request.shards.len() {
        let cursor = if shard_index == request.start.shard_index {
            request.start.cursor.clone()
        } else {
            None
        };

        if let Some(region) = request.region {
            let known = request
                .shard_references
                .get(shard_index)
                .map(Vec::as_slice)
                .unwrap_or_default();
            if !known.is_empty() && !known.iter().any(|n| *n == region.reference_name) {
                continue;
            }
        }

        match scan_shard(
            source,
            &request.shards[shard_index],
            request.region,
            cursor,
            &mut page,
            &mut unavailable_shards,
            &mut project,
        )
        .await?
        {
            ShardEnd::Exhausted => {}
            ShardEnd::Continue(next) => {
                return Ok(ScanOutcome {
                    records: page.records,
                    next: Some(next),
                    unavailable_shards,
                    bytes: page.bytes,
                });
            }
        }
    }

    Ok(ScanOutcome {
        records: page.records,
        next: None,
        unavailable_shards,
        bytes: page.bytes,
    })
}

async fn scan_shard<R, T, F>(
    source: &dyn RecordSource<Record = R>,
    shard: &ShardLocation,
    region: Option<&Region>,
    cursor: Option<IntraShardCursor>,
    page: &mut PageBuilder<T>,
    unavailable_shards: &mut Vec<usize>,
    project: &mut F,
) -> Result<ShardEnd>
where
    R: ShardRecord + Send + 'static,
    T: Serialize + Send,
    F: FnMut(&R) -> Option<T> + Send,
{
    let mut reader = match source.open(shard).await {
        Ok(reader) => reader,
        Err(e) => {
            tracing::warn!("shard {} unavailable: {}", shard.index, e);
            unavailable_shards.push(shard.index);
            return Ok(ShardEnd::Exhausted);
        }
    };

    let seek_to = match (&cursor, region) {
        (Some(cursor), _) => Some((cursor.reference_name.as_str(), cursor.start)),
        (None, Some(region)) => Some((region.reference_name.as_str(), region.start)),
        (None, None) => None,
    };
    if let Some((reference_name, start)) = seek_to {
        if let Err(e) = reader.seek(reference_name, start).await {
            tracing::warn!("shard {} seek failed: {}", shard.index, e);
            unavailable_shards.push(shard.index);
            return Ok(ShardEnd::Exhausted);
        }
    }

    let mut run = cursor.as_ref().map(RunTracker::resumed).unwrap_or_default();
    let mut resume = cursor.map(Resume::new);
    let mut seen_region_reference = false;

    loop {
        let record = match reader.next_record().await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(ShardEnd::Exhausted),
            Err(e) => {
                tracing::warn!("shard {} failed mid-read: {}", shard.index, e);
                unavailable_shards.push(shard.index);
                return Ok(ShardEnd::Exhausted);
            }
        };

        if let Some(region) = region {
            if record.reference_name() != region.reference_name {
                if seen_region_reference {
                    return Ok(ShardEnd::Exhausted);
                }
                continue;
            }
            seen_region_reference = true;
            if region.end.is_some_and(|end| record.start() >= end) {
                return Ok(ShardEnd::Exhausted);
            }
            if record.end() <= region.start {
                continue;
            }
        }

        if let Some(resume) = resume.as_mut() {
            if !resume.reached(&record) {
                continue;
            }
        }

        let Some(item) = project(&record) else {
            continue;
        };

        if let Some(resume) = resume.as_mut() {
            if resume.skip(&record)? {
                continue;
            }
        }

        let size = estimated_size(&item)?;
        if page.full || !page.fits(size) {
            return Ok(ShardEnd::Continue(ScanPosition {
                shard_index: shard.index,
                cursor: Some(IntraShardCursor {
                    reference_name: record.reference_name().to_string(),
                    start: record.start(),
                    skip: run.skip_for(record.reference_name(), record.start()),
                }),
            }));
        }

        page.push(item, size);
        run.observe(record.reference_name(), record.start());
    }
}

/// Serialized JSON size of one record, plus its separator.
pub fn estimated_size<T: Serialize>(item: &T) -> Result<usize> {
    serde_json::to_vec(item)
        .map(|bytes| bytes.len() + 1)
        .map_err(|e| Error::Internal(format!("failed to size record: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::AlignmentRecord;
    use crate::formats::memory::MemorySource;
    use std::path::PathBuf;

    fn read(name: &str, reference: &str, start: u64) -> AlignmentRecord {
        AlignmentRecord {
            fragment_name: name.to_string(),
            reference_name: reference.to_string(),
            start,
            end: start + 5,
            mapping_quality: None,
            flags: 0,
            sequence: String::new(),
            read_group: None,
        }
    }

    fn shards(n: usize) -> Vec<ShardLocation> {
        (0..n)
            .map(|index| ShardLocation {
                index,
                path: PathBuf::from(format!("/shard{}.bam", index)),
                index_path: None,
            })
            .collect()
    }

    /// Two shards with runs of equal start positions across page edges.
    fn fixture() -> MemorySource<AlignmentRecord> {
        let source = MemorySource::new();
        source.insert(
            "/shard0.bam",
            vec![
                read("a", "chr1", 10),
                read("b", "chr1", 10),
                read("c", "chr1", 10),
                read("d", "chr1", 20),
                read("e", "chr2", 5),
            ],
        );
        source.insert(
            "/shard1.bam",
            vec![read("f", "chr1", 10), read("g", "chr2", 5), read("h", "chr2", 5)],
        );
        source
    }

    async fn page_through(
        source: &MemorySource<AlignmentRecord>,
        shards: &[ShardLocation],
        region: Option<&Region>,
        page_size: usize,
        max: usize,
    ) -> Vec<Vec<String>> {
        let references = vec![Vec::new(); shards.len()];
        let mut position = ScanPosition::default();
        let mut pages = Vec::new();
        loop {
            let outcome = scan(
                source,
                ScanRequest {
                    shards,
                    shard_references: &references,
                    region,
                    page_size,
                    max_response_length: max,
                    start: position,
                },
                |r: &AlignmentRecord| Some(r.fragment_name.clone()),
            )
            .await
            .unwrap();
            assert!(!outcome.records.is_empty() || pages.is_empty());
            pages.push(outcome.records);
            match outcome.next {
                Some(next) => position = next,
                None => return pages,
            }
        }
    }

    #[tokio::test]
    async fn test_every_page_size_enumerates_once() {
        let source = fixture();
        let shards = shards(2);
        let all: Vec<String> = "abcdefgh".chars().map(String::from).collect();
        for page_size in 1..=9 {
            let pages = page_through(&source, &shards, None, page_size, usize::MAX).await;
            assert!(pages.iter().all(|p| p.len() <= page_size));
            assert_eq!(pages.concat(), all, "page size {page_size}");
        }
    }

    #[tokio::test]
    async fn test_final_page_has_no_token() {
        let source = fixture();
        let pages = page_through(&source, &shards(2), None, 4, usize::MAX).await;
        assert_eq!(pages.len(), 2);
    }

    #[tokio::test]
    async fn test_region_paging_with_ties() {
        let source = fixture();
        let shards = shards(2);
        let region = Region {
            reference_name: "chr1".to_string(),
            start: 12,
            end: Some(30),
        };
        for page_size in 1..=5 {
            let pages = page_through(&source, &shards, Some(&region), page_size, usize::MAX).await;
            assert_eq!(pages.concat(), vec!["a", "b", "c", "d", "f"]);
        }
    }

    #[tokio::test]
    async fn test_byte_budget_never_empties_page() {
        let source = fixture();
        let pages = page_through(&source, &shards(2), None, 100, 1).await;
        assert!(pages.iter().all(|p| p.len() == 1));
        assert_eq!(pages.len(), 8);

        // Three records of `"x",` fit in 12 bytes; the fourth starts a new page.
        let pages = page_through(&source, &shards(2), None, 100, 12).await;
        assert_eq!(pages[0], vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_unreadable_shard_is_reported_and_skipped() {
        let source = fixture();
        let mut shards = shards(3);
        shards[1].path = PathBuf::from("/missing.bam");
        source.insert("/shard2.bam", vec![read("z", "chr3", 1)]);
        let references = vec![Vec::new(); 3];
        let outcome = scan(
            &source,
            ScanRequest {
                shards: &shards,
                shard_references: &references,
                region: None,
                page_size: 100,
                max_response_length: usize::MAX,
                start: ScanPosition::default(),
            },
            |r: &AlignmentRecord| Some(r.fragment_name.clone()),
        )
        .await
        .unwrap();
        assert_eq!(outcome.records, vec!["a", "b", "c", "d", "e", "z"]);
        assert_eq!(outcome.unavailable_shards, vec![1]);
    }

    #[tokio::test]
    async fn test_mid_shard_failure_keeps_earlier_records() {
        let source = fixture();
        source.fail_after("/shard0.bam", 2);
        let references = vec![Vec::new(); 2];
        let outcome = scan(
            &source,
            ScanRequest {
                shards: &shards(2),
                shard_references: &references,
                region: None,
                page_size: 100,
                max_response_length: usize::MAX,
                start: ScanPosition::default(),
            },
            |r: &AlignmentRecord| Some(r.fragment_name.clone()),
        )
        .await
        .unwrap();
        assert_eq!(outcome.records, vec!["a", "b", "f", "g", "h"]);
        assert_eq!(outcome.unavailable_shards, vec![0]);
    }

    #[tokio::test]
    async fn test_mismatched_cursor_is_invalid_token() {
        let source = fixture();
        let references = vec![Vec::new(); 2];
        let err = scan(
            &source,
            ScanRequest {
                shards: &shards(2),
                shard_references: &references,
                region: None,
                page_size: 10,
                max_response_length: usize::MAX,
                start: ScanPosition {
                    shard_index: 0,
                    cursor: Some(IntraShardCursor {
                        reference_name: "chr1".to_string(),
                        start: 10,
                        skip: 5,
                    }),
                },
            },
            |r: &AlignmentRecord| Some(r.fragment_name.clone()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_shard_without_reference_is_skipped() {
        let source = fixture();
        let shards = shards(2);
        let references = vec![vec!["chr2".to_string()], vec!["chr1".to_string()]];
        let region = Region {
            reference_name: "chr1".to_string(),
            start: 0,
            end: None,
        };
        let outcome = scan(
            &source,
            ScanRequest {
                shards: &shards,
                shard_references: &references,
                region: Some(&region),
                page_size: 10,
                max_response_length: usize::MAX,
                start: ScanPosition::default(),
            },
            |r: &AlignmentRecord| Some(r.fragment_name.clone()),
        )
        .await
        .unwrap();
        assert_eq!(outcome.records, vec!["f"]);
    }
}
