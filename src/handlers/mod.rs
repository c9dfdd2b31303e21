mod catalog;
mod reads;
mod references;
mod service_info;
mod variants;

pub use catalog::{
    get_dataset, get_read_group, get_read_group_set, get_variant_set, search_datasets,
    search_read_group_sets, search_variant_sets,
};
pub use reads::search_reads;
pub use references::{
    get_reference, get_reference_set, list_reference_bases, search_reference_sets,
    search_references,
};
pub use service_info::service_info;
pub use variants::{
    get_call_set, get_variant, get_variant_annotation_set, search_call_sets,
    search_variant_annotation_sets, search_variant_annotations, search_variants,
};

use crate::query::QueryEngine;
use crate::types::{RequestFields, parse_request};
use crate::Result;
use axum::{
    Router,
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
}

impl AppState {
    /// Parse a search body under the engine's request validation mode.
    fn parse<T: DeserializeOwned + RequestFields>(&self, body: Value) -> Result<T> {
        parse_request(body, self.engine.config().request_validation)
    }
}

/// All routes of the query service.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/datasets/search", post(search_datasets))
        .route("/datasets/:id", get(get_dataset))
        .route("/referencesets/search", post(search_reference_sets))
        .route("/referencesets/:id", get(get_reference_set))
        .route("/references/search", post(search_references))
        .route("/references/:id", get(get_reference))
        .route("/references/:id/bases", get(list_reference_bases))
        .route("/variantsets/search", post(search_variant_sets))
        .route("/variantsets/:id", get(get_variant_set))
        .route("/variantannotationsets/search", post(search_variant_annotation_sets))
        .route("/variantannotationsets/:id", get(get_variant_annotation_set))
        .route("/callsets/search", post(search_call_sets))
        .route("/callsets/:id", get(get_call_set))
        .route("/variants/search", post(search_variants))
        .route("/variants/:id", get(get_variant))
        .route("/variantannotations/search", post(search_variant_annotations))
        .route("/readgroupsets/search", post(search_read_group_sets))
        .route("/readgroupsets/:id", get(get_read_group_set))
        .route("/readgroups/:id", get(get_read_group))
        .route("/reads/search", post(search_reads))
        .route("/", get(service_info))
        .route("/service-info", get(service_info))
        .with_state(state)
}
