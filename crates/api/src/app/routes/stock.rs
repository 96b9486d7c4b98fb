use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};

use watergile_infra::services::{AppServices, ServiceResult};
use watergile_sales::SaleOrderId;
use watergile_stock::{PickingId, StockPicking};

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/pickings", get(list_pickings))
        .route("/pickings/:id", get(get_picking))
        .route("/pickings/:id/confirm", post(confirm_picking))
        .route("/pickings/:id/assign", post(assign_picking))
        .route("/pickings/:id/validate", post(validate_picking))
        .route("/pickings/:id/cancel", post(cancel_picking))
        .route("/pickings/:id/merge-moves", post(merge_moves))
        .route("/pickings/:id/slip", get(delivery_slip))
        .route("/pickings/:id/slip/valorised", get(valorised_slip))
        .route("/orders/:id/pickings", get(order_pickings).post(plan_order))
        .route("/orders/:id/pickings/standard", post(plan_standard))
}

fn picking_id(raw: &str) -> Result<PickingId, axum::response::Response> {
    errors::parse_id(raw, "picking")
}

fn order_id(raw: &str) -> Result<SaleOrderId, axum::response::Response> {
    errors::parse_id(raw, "order")
}

fn picking_json(result: ServiceResult<StockPicking>) -> ServiceResult<serde_json::Value> {
    result.map(|picking| dto::picking_to_json(&picking))
}

fn pickings_json(result: ServiceResult<Vec<StockPicking>>) -> ServiceResult<Vec<serde_json::Value>> {
    result.map(|pickings| pickings.iter().map(dto::picking_to_json).collect())
}

pub async fn list_pickings(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    errors::items(pickings_json(services.stock.list()))
}

pub async fn get_picking(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match picking_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(picking_json(services.stock.get(id)))
}

pub async fn order_pickings(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::items(pickings_json(services.stock.for_order(id)))
}

/// One picking per dispatch group of a confirmed order. Replanning only
/// opens pickings for groups that have none yet.
pub async fn plan_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::items(pickings_json(services.stock.plan(id)))
}

pub async fn plan_standard(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::PlanStandardRequest>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::created(picking_json(services.stock.plan_standard(
        id,
        body.address_id,
        body.scheduled_date,
    )))
}

pub async fn confirm_picking(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match picking_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(picking_json(services.stock.confirm(id)))
}

pub async fn assign_picking(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match picking_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(picking_json(services.stock.assign(id)))
}

pub async fn validate_picking(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match picking_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(picking_json(services.stock.validate(id)))
}

pub async fn cancel_picking(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match picking_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(picking_json(services.stock.cancel(id)))
}

pub async fn merge_moves(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match picking_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(picking_json(services.stock.merge_moves(id)))
}

pub async fn delivery_slip(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match picking_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.stock.slip(id))
}

pub async fn valorised_slip(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Query(query): Query<dto::ValorisedSlipQuery>,
) -> axum::response::Response {
    let id = match picking_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.stock.valorised_slip(id, query.tax_rate))
}
