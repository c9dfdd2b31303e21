use super::AppState;
use crate::{
    Result,
    types::{
        Dataset, ReadGroup, ReadGroupSet, SearchDatasetsRequest, SearchReadGroupSetsRequest,
        SearchResponse, SearchVariantSetsRequest, VariantSet,
    },
};
use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::Value;

pub async fn search_datasets(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<SearchResponse<Dataset>>> {
    let request: SearchDatasetsRequest = state.parse(body)?;
    state.engine.search_datasets(request).map(Json)
}

pub async fn get_dataset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Dataset>> {
    state.engine.get_dataset(&id).map(Json)
}

pub async fn search_variant_sets(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<SearchResponse<VariantSet>>> {
    let request: SearchVariantSetsRequest = state.parse(body)?;
    state.engine.search_variant_sets(request).map(Json)
}

pub async fn get_variant_set(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VariantSet>> {
    state.engine.get_variant_set(&id).map(Json)
}

pub async fn search_read_group_sets(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<SearchResponse<ReadGroupSet>>> {
    let request: SearchReadGroupSetsRequest = state.parse(body)?;
    state.engine.search_read_group_sets(request).map(Json)
}

pub async fn get_read_group_set(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReadGroupSet>> {
    state.engine.get_read_group_set(&id).map(Json)
}

pub async fn get_read_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReadGroup>> {
    state.engine.get_read_group(&id).map(Json)
}
