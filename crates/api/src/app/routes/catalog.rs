use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use watergile_infra::services::{AppServices, NewProduct};
use watergile_products::{EquipmentId, EquipmentInput, PricelistId, PricelistInput, ProductId};

use crate::app::{dto, errors};

pub fn products_router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/:id", get(get_product).patch(update_product))
        .route("/:id/activate", post(activate_product))
        .route("/:id/archive", post(archive_product))
        .route("/:id/type", post(change_type))
        .route("/:id/detailed-type", post(set_detailed_type))
        .route("/:id/trade-compliance", post(set_trade_compliance))
        .route("/:id/dispatchable", post(set_dispatchable))
        .route("/:id/zones", post(set_delivery_zones))
        .route("/:id/compatible-equipment", post(set_compatible_equipment))
}

pub fn pricelists_router() -> Router {
    Router::new()
        .route("/", post(create_pricelist).get(list_pricelists))
        .route(
            "/:id",
            get(get_pricelist).put(update_pricelist).delete(delete_pricelist),
        )
        .route("/:id/applicable", get(pricelist_applicable))
}

pub fn equipment_router() -> Router {
    Router::new()
        .route("/", post(register_equipment).get(list_equipment))
        .route("/:id", get(get_equipment).put(update_equipment))
        .route("/:id/state", post(transition_equipment))
}

fn product_id(raw: &str) -> Result<ProductId, axum::response::Response> {
    errors::parse_id(raw, "product")
}

fn pricelist_id(raw: &str) -> Result<PricelistId, axum::response::Response> {
    errors::parse_id(raw, "pricelist")
}

fn equipment_id(raw: &str) -> Result<EquipmentId, axum::response::Response> {
    errors::parse_id(raw, "equipment")
}

// Products

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewProduct>,
) -> axum::response::Response {
    errors::created(
        services
            .catalog
            .create_product(body)
            .map(|p| dto::product_to_json(&p)),
    )
}

pub async fn list_products(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    errors::items(
        services
            .catalog
            .products()
            .map(|products| products.iter().map(dto::product_to_json).collect()),
    )
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match product_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.catalog.product(id).map(|p| dto::product_to_json(&p)))
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateProductRequest>,
) -> axum::response::Response {
    let id = match product_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .catalog
            .update_details(id, body.name, body.list_price)
            .map(|p| dto::product_to_json(&p)),
    )
}

pub async fn activate_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match product_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .catalog
            .activate_product(id)
            .map(|p| dto::product_to_json(&p)),
    )
}

pub async fn archive_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match product_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .catalog
            .archive_product(id)
            .map(|p| dto::product_to_json(&p)),
    )
}

pub async fn change_type(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ProductTypeRequest>,
) -> axum::response::Response {
    let id = match product_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .catalog
            .change_type(id, body.product_type)
            .map(|p| dto::product_to_json(&p)),
    )
}

pub async fn set_detailed_type(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ProductTypeRequest>,
) -> axum::response::Response {
    let id = match product_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .catalog
            .set_detailed_type(id, body.product_type)
            .map(|p| dto::product_to_json(&p)),
    )
}

pub async fn set_trade_compliance(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::TradeComplianceRequest>,
) -> axum::response::Response {
    let id = match product_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .catalog
            .set_trade_compliance(id, body.hs_code, body.origin_country)
            .map(|p| dto::product_to_json(&p)),
    )
}

pub async fn set_dispatchable(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::DispatchableRequest>,
) -> axum::response::Response {
    let id = match product_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .catalog
            .set_dispatchable(id, body.dispatchable)
            .map(|p| dto::product_to_json(&p)),
    )
}

pub async fn set_delivery_zones(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ProductZonesRequest>,
) -> axum::response::Response {
    let id = match product_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .catalog
            .set_delivery_zones(id, body.zone_ids)
            .map(|p| dto::product_to_json(&p)),
    )
}

pub async fn set_compatible_equipment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::CompatibleEquipmentRequest>,
) -> axum::response::Response {
    let id = match product_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(
        services
            .catalog
            .set_compatible_equipment(id, body.equipment_ids)
            .map(|p| dto::product_to_json(&p)),
    )
}

// Pricelists

pub async fn create_pricelist(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<PricelistInput>,
) -> axum::response::Response {
    errors::created(services.catalog.create_pricelist(body))
}

pub async fn list_pricelists(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    errors::items(services.catalog.pricelists())
}

pub async fn get_pricelist(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match pricelist_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.catalog.pricelist(id))
}

pub async fn update_pricelist(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<PricelistInput>,
) -> axum::response::Response {
    let id = match pricelist_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.catalog.update_pricelist(id, body))
}

pub async fn delete_pricelist(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match pricelist_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    match services.catalog.delete_pricelist(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn pricelist_applicable(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Query(query): Query<dto::ApplicabilityQuery>,
) -> axum::response::Response {
    let id = match pricelist_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    match services.catalog.pricelist(id) {
        Ok(pricelist) => (
            StatusCode::OK,
            Json(json!({
                "pricelist_id": id,
                "applicable": pricelist.is_applicable(query.partner_id, query.zone_id),
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

// Equipment

pub async fn register_equipment(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<EquipmentInput>,
) -> axum::response::Response {
    errors::created(services.catalog.register_equipment(body))
}

pub async fn list_equipment(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    errors::items(services.catalog.equipment_list())
}

pub async fn get_equipment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match equipment_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.catalog.equipment(id))
}

pub async fn update_equipment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<EquipmentInput>,
) -> axum::response::Response {
    let id = match equipment_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.catalog.update_equipment(id, body))
}

pub async fn transition_equipment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::EquipmentStateRequest>,
) -> axum::response::Response {
    let id = match equipment_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.catalog.transition_equipment(id, body.state))
}
