use super::scan::{ScanRequest, scan};
use super::{QueryEngine, Region};
use crate::formats::{AlignmentRecord, ReadGroupSummary};
use crate::locator::Locator;
use crate::registry::{ObjectType, READ_GROUPS, RegistryEntry, compound_id};
use crate::types::{ReadAlignment, SearchReadsRequest, SearchResponse};
use crate::{Error, Result};
use std::collections::HashSet;

pub(crate) const READ_GROUP_TAG: &str = "rg";
const READ_TAG: &str = "read";

/// Read groups recorded for a read group set at registration.
pub(crate) fn read_groups(entry: &RegistryEntry) -> Vec<ReadGroupSummary> {
    entry
        .metadata
        .get(READ_GROUPS)
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

pub(crate) fn read_group_id(read_group_set_id: &str, name: &str) -> String {
    compound_id::child(READ_GROUP_TAG, read_group_set_id, &[name])
        .unwrap_or_else(|_| compound_id::encode(&[READ_GROUP_TAG, name]))
}

impl QueryEngine {
    pub async fn search_reads(
        &self,
        request: SearchReadsRequest,
    ) -> Result<SearchResponse<ReadAlignment>> {
        self.with_deadline(self.run_read_search(request)).await
    }

    async fn run_read_search(
        &self,
        request: SearchReadsRequest,
    ) -> Result<SearchResponse<ReadAlignment>> {
        let entry = self
            .registry
            .get_typed(&request.read_group_set_id, ObjectType::ReadGroupSet)?;
        let page_size = self.config.effective_page_size(request.page_size)?;
        let region = Region::for_search(
            entry,
            request.reference_name.as_deref(),
            request.start,
            request.end,
            self.config.request_validation,
        )?;

        let known: HashSet<String> = read_groups(entry).into_iter().map(|rg| rg.id).collect();
        let mut selected = Vec::with_capacity(request.read_group_ids.len());
        for id in &request.read_group_ids {
            let found =
                compound_id::split_child(id, READ_GROUP_TAG, ObjectType::ReadGroupSet.tag())
                    .ok()
                    .filter(|(parent, name)| *parent == entry.id && known.contains(name));
            match found {
                Some((_, name)) => selected.push(name),
                None => return Err(Error::NotFound(format!("unknown read group {:?}", id))),
            }
        }
        selected.sort();
        selected.dedup();

        let locator = Locator::for_entry(entry, &("reads", &region, &selected))?;
        let start = locator.resume(request.page_token.as_deref())?;

        let shards = self.registry.shard_locations(entry)?;
        let references: Vec<Vec<String>> =
            entry.shards.iter().map(|s| s.reference_names.clone()).collect();
        let outcome = scan(
            self.backends.alignments.as_ref(),
            ScanRequest {
                shards: &shards,
                shard_references: &references,
                region: region.as_ref(),
                page_size,
                max_response_length: self.config.max_response_length,
                start,
            },
            |record: &AlignmentRecord| {
                let read_group = record.read_group.as_deref().unwrap_or_default();
                let wanted = selected.is_empty() || selected.iter().any(|s| s == read_group);
                wanted.then(|| alignment_view(entry, record))
            },
        )
        .await?;

        self.finish_scan(&locator, outcome, page_size)
    }
}

fn alignment_view(entry: &RegistryEntry, record: &AlignmentRecord) -> ReadAlignment {
    let start = record.start.to_string();
    let flags = record.flags.to_string();
    let id = compound_id::child(
        READ_TAG,
        &entry.id,
        &[&record.fragment_name, &record.reference_name, &start, &flags],
    )
    .unwrap_or_else(|_| compound_id::encode(&[READ_TAG, &record.fragment_name]));

    ReadAlignment {
        id,
        read_group_id: read_group_id(&entry.id, record.read_group.as_deref().unwrap_or_default()),
        fragment_name: record.fragment_name.clone(),
        reference_name: record.reference_name.clone(),
        start: record.start,
        end: record.end,
        mapping_quality: record.mapping_quality,
        flags: record.flags,
        aligned_sequence: record.sequence.clone(),
    }
}
