use super::AppState;
use crate::{
    Error, Result,
    types::{
        ListReferenceBasesRequest, ListReferenceBasesResponse, Reference, ReferenceSet,
        RequestFields, SearchReferenceSetsRequest, SearchReferencesRequest, SearchResponse,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde_json::Value;
use std::collections::HashMap;

pub async fn search_reference_sets(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<SearchResponse<ReferenceSet>>> {
    let request: SearchReferenceSetsRequest = state.parse(body)?;
    state.engine.search_reference_sets(request).map(Json)
}

pub async fn get_reference_set(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReferenceSet>> {
    state.engine.get_reference_set(&id).map(Json)
}

pub async fn search_references(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<SearchResponse<Reference>>> {
    let request: SearchReferencesRequest = state.parse(body)?;
    state.engine.search_references(request).map(Json)
}

pub async fn get_reference(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Reference>> {
    state.engine.get_reference(&id).map(Json)
}

/// `GET /references/{id}/bases?start=&end=&pageToken=`
pub async fn list_reference_bases(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ListReferenceBasesResponse>> {
    if state.engine.config().request_validation {
        if let Some(unknown) = params
            .keys()
            .find(|k| !ListReferenceBasesRequest::FIELDS.contains(&k.as_str()))
        {
            return Err(Error::InvalidInput(format!(
                "unknown query parameter {:?}",
                unknown
            )));
        }
    }

    let request = ListReferenceBasesRequest {
        start: parse_offset(&params, "start")?,
        end: parse_offset(&params, "end")?,
        page_token: params.get("pageToken").cloned(),
    };
    state
        .engine
        .list_reference_bases(&id, request)
        .await
        .map(Json)
}

fn parse_offset(params: &HashMap<String, String>, key: &str) -> Result<Option<u64>> {
    params
        .get(key)
        .map(|value| {
            value
                .parse::<u64>()
                .map_err(|_| Error::InvalidInput(format!("{} must be a non-negative integer", key)))
        })
        .transpose()
}
