use super::AppState;
use crate::{
    Result,
    types::{ReadAlignment, SearchReadsRequest, SearchResponse},
};
use axum::{Json, extract::State};
use serde_json::Value;

pub async fn search_reads(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<SearchResponse<ReadAlignment>>> {
    let request: SearchReadsRequest = state.parse(body)?;
    tracing::debug!(
        "reads search on {} ({:?})",
        request.read_group_set_id,
        request.reference_name
    );
    state.engine.search_reads(request).await.map(Json)
}
