use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use watergile_infra::external::AddressQuery;
use watergile_infra::services::AppServices;
use watergile_parties::{AddressId, AddressInput};

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_address).get(list_addresses))
        .route("/search", get(search_addresses))
        .route("/reverse", get(reverse_geocode))
        .route("/geocode", get(geocode))
        .route(
            "/:id",
            get(get_address).put(update_address).delete(delete_address),
        )
        .route("/:id/archive", post(archive_address))
        .route("/:id/unarchive", post(unarchive_address))
        .route("/:id/validate", post(validate_address))
}

fn address_id(raw: &str) -> Result<AddressId, axum::response::Response> {
    errors::parse_id(raw, "address")
}

pub async fn create_address(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<AddressInput>,
) -> axum::response::Response {
    errors::created(services.addresses.create(body))
}

pub async fn list_addresses(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    errors::items(services.addresses.list())
}

pub async fn get_address(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match address_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.addresses.get(id))
}

pub async fn update_address(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<AddressInput>,
) -> axum::response::Response {
    let id = match address_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.addresses.update(id, body))
}

pub async fn delete_address(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match address_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    match services.addresses.delete(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn archive_address(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match address_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.addresses.archive(id))
}

pub async fn unarchive_address(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match address_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.addresses.unarchive(id))
}

/// Geocode through the BAN and store the score.
pub async fn validate_address(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match address_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.addresses.validate(id).await)
}

pub async fn search_addresses(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<AddressQuery>,
) -> axum::response::Response {
    errors::items(services.addresses.search(&query).await)
}

pub async fn reverse_geocode(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ReverseQuery>,
) -> axum::response::Response {
    errors::items(
        services
            .addresses
            .reverse(query.lat, query.lon, query.limit)
            .await,
    )
}

pub async fn geocode(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::GeocodeQuery>,
) -> axum::response::Response {
    errors::items(services.addresses.geocode(&query.q, query.limit).await)
}
