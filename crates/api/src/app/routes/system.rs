use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use watergile_infra::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn info(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "persistent_storage": services.backends.is_persistent(),
            "siret_enrichment": services.clients.insee.is_enabled(),
        })),
    )
        .into_response()
}
