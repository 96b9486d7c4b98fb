use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use watergile_infra::services::{AppServices, NewPartner};
use watergile_parties::{PartnerId, Siret};

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_partner).get(list_partners))
        .route("/:id", get(get_partner))
        .route("/:id/badge", get(get_badge))
        .route("/:id/addresses", get(list_partner_addresses))
        .route("/:id/rename", post(rename_partner))
        .route("/:id/parent", post(set_parent))
        .route("/:id/relation", post(set_relation))
        .route("/:id/siret", post(set_siret))
        .route("/:id/blaz", post(assign_blaz))
        .route("/:id/enrich", post(enrich_partner))
        .route("/:id/archive", post(archive_partner))
}

pub fn blaz_router() -> Router {
    Router::new().route("/", post(create_blaz).get(list_blazes))
}

pub fn siret_router() -> Router {
    Router::new().route("/validate", post(validate_siret))
}

fn partner_id(raw: &str) -> Result<PartnerId, axum::response::Response> {
    errors::parse_id(raw, "partner")
}

pub async fn register_partner(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewPartner>,
) -> axum::response::Response {
    errors::created(
        services
            .partners
            .register(body)
            .map(|p| dto::partner_to_json(&p)),
    )
}

pub async fn list_partners(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    errors::items(services.partners.list())
}

pub async fn get_partner(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match partner_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.partners.get(id).map(|p| dto::partner_to_json(&p)))
}

pub async fn get_badge(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match partner_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.partners.badge(id).map(|badge| {
        json!({
            "badge": badge,
            "label": badge.map(|b| b.label()),
            "color": badge.map(|b| b.color()),
        })
    }))
}

pub async fn list_partner_addresses(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match partner_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::items(services.addresses.for_partner(id))
}

pub async fn rename_partner(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::RenamePartnerRequest>,
) -> axum::response::Response {
    let id = match partner_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .partners
            .rename(id, body.name)
            .map(|p| dto::partner_to_json(&p)),
    )
}

pub async fn set_parent(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SetParentRequest>,
) -> axum::response::Response {
    let id = match partner_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .partners
            .set_parent(id, body.parent_id)
            .map(|p| dto::partner_to_json(&p)),
    )
}

pub async fn set_relation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SetRelationRequest>,
) -> axum::response::Response {
    let id = match partner_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .partners
            .set_relation(id, body.relation)
            .map(|p| dto::partner_to_json(&p)),
    )
}

pub async fn set_siret(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SetSiretRequest>,
) -> axum::response::Response {
    let id = match partner_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .partners
            .set_siret(id, body.siret)
            .map(|p| dto::partner_to_json(&p)),
    )
}

pub async fn assign_blaz(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::AssignBlazRequest>,
) -> axum::response::Response {
    let id = match partner_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .partners
            .assign_blaz(id, body.blaz_id)
            .map(|p| dto::partner_to_json(&p)),
    )
}

pub async fn enrich_partner(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match partner_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .partners
            .enrich(id)
            .await
            .map(|(partner, outcome)| dto::enrichment_to_json(&partner, outcome)),
    )
}

pub async fn archive_partner(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match partner_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.partners.archive(id).map(|p| dto::partner_to_json(&p)))
}

pub async fn create_blaz(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateBlazRequest>,
) -> axum::response::Response {
    errors::created(services.partners.create_blaz(&body.name, body.owner_id))
}

pub async fn list_blazes(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    errors::items(services.partners.list_blazes())
}

/// Local check only: format and Luhn checksum.
pub async fn validate_siret(Json(body): Json<dto::CheckSiretRequest>) -> axum::response::Response {
    match Siret::parse(&body.siret) {
        Ok(siret) => (
            StatusCode::OK,
            Json(json!({
                "valid": true,
                "siret": siret,
                "siren": siret.siren(),
                "formatted": siret.formatted(),
                "vat_number": siret.vat_number(),
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::OK,
            Json(json!({
                "valid": false,
                "message": e.to_string(),
            })),
        )
            .into_response(),
    }
}
