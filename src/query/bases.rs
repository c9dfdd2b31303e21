use super::{QueryEngine, offset_cursor};
use crate::locator::Locator;
use crate::registry::{LENGTH, ObjectType};
use crate::types::{ListReferenceBasesRequest, ListReferenceBasesResponse};
use crate::{Error, Result};

impl QueryEngine {
    /// Bases `[start, end)` of a reference, at most `max_response_length`
    /// of them per page.
    pub async fn list_reference_bases(
        &self,
        reference_id: &str,
        request: ListReferenceBasesRequest,
    ) -> Result<ListReferenceBasesResponse> {
        self.with_deadline(self.run_list_bases(reference_id, request))
            .await
    }

    async fn run_list_bases(
        &self,
        reference_id: &str,
        request: ListReferenceBasesRequest,
    ) -> Result<ListReferenceBasesResponse> {
        let reference = self
            .registry
            .get_typed(reference_id, ObjectType::Reference)?;
        let length = reference.metadata_u64(LENGTH).unwrap_or(0);
        let start = request.start.unwrap_or(0);
        let end = request.end.unwrap_or(length);
        if end > length {
            return Err(Error::InvalidInput(format!(
                "end {} is past the length {} of {}",
                end, length, reference.name
            )));
        }
        if start > end {
            return Err(Error::InvalidInput(format!(
                "start {} is after end {}",
                start, end
            )));
        }

        let locator = Locator::for_entry(reference, &("bases", start, end))?;
        let offset = match locator.resume(request.page_token.as_deref())?.cursor {
            Some(cursor) if cursor.start >= start && cursor.start <= end => cursor.start,
            Some(cursor) => {
                return Err(Error::InvalidToken(format!(
                    "offset {} is outside the requested range",
                    cursor.start
                )));
            }
            None => start,
        };

        let reference_set = reference
            .parent_id
            .as_deref()
            .map(|id| self.registry.get_typed(id, ObjectType::ReferenceSet))
            .transpose()?
            .ok_or_else(|| Error::Internal(format!("{} has no reference set", reference.name)))?;
        let shard = self
            .registry
            .shard_locations(reference_set)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::BackendUnavailable(format!("{} has no sequence file", reference_set.name))
            })?;

        let chunk_end = end.min(offset.saturating_add(self.config.max_response_length as u64));
        let sequence = self
            .backends
            .sequences
            .read_bases(&shard, &reference.name, offset, chunk_end)
            .await?;

        let next_page_token = if chunk_end < end {
            Some(locator.token_for(&offset_cursor(&reference.name, chunk_end))?)
        } else {
            None
        };
        Ok(ListReferenceBasesResponse {
            offset,
            sequence,
            next_page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryConfig;
    use crate::query::fixtures;

    fn reference_id(fixture: &fixtures::Fixture) -> String {
        fixture
            .engine
            .registry()
            .id_for(ObjectType::Reference, Some(&fixture.reference_set_id), "chr1")
            .unwrap()
    }

    #[tokio::test]
    async fn test_chunked_by_response_length() {
        let config = QueryConfig {
            max_response_length: 10,
            ..QueryConfig::default()
        };
        let fixture = fixtures::build(config);
        let id = reference_id(&fixture);

        let mut request = ListReferenceBasesRequest {
            start: Some(3),
            ..Default::default()
        };
        let mut chunks = Vec::new();
        loop {
            let page = fixture
                .engine
                .list_reference_bases(&id, request.clone())
                .await
                .unwrap();
            chunks.push((page.offset, page.sequence));
            match page.next_page_token {
                Some(token) => request.page_token = Some(token),
                None => break,
            }
        }
        assert_eq!(
            chunks,
            vec![
                (3, "TACGTACGTA".to_string()),
                (13, "CGTACGTACG".to_string()),
                (23, "TA".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_range_checks() {
        let fixture = fixtures::build(QueryConfig::default());
        let id = reference_id(&fixture);
        for (start, end) in [(0, 26), (9, 4)] {
            let err = fixture
                .engine
                .list_reference_bases(
                    &id,
                    ListReferenceBasesRequest {
                        start: Some(start),
                        end: Some(end),
                        page_token: None,
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{start}..{end}");
        }

        let empty = fixture
            .engine
            .list_reference_bases(
                &id,
                ListReferenceBasesRequest {
                    start: Some(5),
                    end: Some(5),
                    page_token: None,
                },
            )
            .await
            .unwrap();
        assert!(empty.sequence.is_empty());
        assert!(empty.next_page_token.is_none());
    }
}
