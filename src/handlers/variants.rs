use super::AppState;
use crate::{
    Result,
    types::{
        CallSet, SearchCallSetsRequest, SearchResponse, SearchVariantAnnotationSetsRequest,
        SearchVariantAnnotationsRequest, SearchVariantsRequest, Variant, VariantAnnotation,
        VariantAnnotationSet,
    },
};
use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::Value;

pub async fn search_variants(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<SearchResponse<Variant>>> {
    let request: SearchVariantsRequest = state.parse(body)?;
    state.engine.search_variants(request).await.map(Json)
}

pub async fn get_variant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Variant>> {
    state.engine.get_variant(&id).await.map(Json)
}

pub async fn search_call_sets(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<SearchResponse<CallSet>>> {
    let request: SearchCallSetsRequest = state.parse(body)?;
    state.engine.search_call_sets(request).map(Json)
}

pub async fn get_call_set(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CallSet>> {
    state.engine.get_call_set(&id).map(Json)
}

pub async fn search_variant_annotation_sets(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<SearchResponse<VariantAnnotationSet>>> {
    let request: SearchVariantAnnotationSetsRequest = state.parse(body)?;
    state.engine.search_variant_annotation_sets(request).map(Json)
}

pub async fn get_variant_annotation_set(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VariantAnnotationSet>> {
    state.engine.get_variant_annotation_set(&id).map(Json)
}

pub async fn search_variant_annotations(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<SearchResponse<VariantAnnotation>>> {
    let request: SearchVariantAnnotationsRequest = state.parse(body)?;
    state
        .engine
        .search_variant_annotations(request)
        .await
        .map(Json)
}
