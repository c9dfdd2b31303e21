use super::AppState;
use crate::types::{Capabilities, Organization, ServiceInfo, ServiceType};
use axum::{Json, extract::State};

pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    let config = state.engine.config();
    Json(ServiceInfo {
        id: "org.example.genoserve".to_string(),
        name: "genoserve".to_string(),
        r#type: ServiceType {
            group: "org.ga4gh".to_string(),
            artifact: "genomics-search".to_string(),
            version: "0.6.0".to_string(),
        },
        description: Some("Registry-backed paginated genomic data search".to_string()),
        organization: Organization {
            name: "Example Organization".to_string(),
            url: "https://example.org".to_string(),
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: Capabilities {
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
            max_response_length: config.max_response_length,
            strict_request_validation: config.request_validation,
        },
    })
}
