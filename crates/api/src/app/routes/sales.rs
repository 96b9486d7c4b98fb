use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{delete, get, post, put},
    Json, Router,
};

use watergile_infra::services::{
    AppServices, MassDispatchRequest, NewSaleOrder, ServiceResult, UpdateDispatchRequest,
};
use watergile_parties::PartnerId;
use watergile_sales::{DispatchId, SaleOrder, SaleOrderId};

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .nest("/orders", orders_router())
        .route("/dispatches/:id", get(get_dispatch))
}

fn orders_router() -> Router {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/summary", get(get_order_summary))
        .route("/:id/delivery-mode", post(set_delivery_mode))
        .route("/:id/stakeholders", post(add_stakeholder))
        .route("/:id/stakeholders/:partner_id", delete(remove_stakeholder))
        .route("/:id/lines", post(add_line))
        .route("/:id/lines/:line_no", put(update_line))
        .route("/:id/lines/:line_no/expand", post(expand_line))
        .route("/:id/mass-dispatch", post(mass_dispatch))
        .route("/:id/dispatches", get(list_order_dispatches))
        .route(
            "/:id/dispatches/:dispatch_id",
            put(update_dispatch).delete(remove_dispatch),
        )
        .route("/:id/prices", get(price_dispatches))
        .route("/:id/confirm", post(confirm_order))
        .route("/:id/cancel", post(cancel_order))
}

fn order_id(raw: &str) -> Result<SaleOrderId, axum::response::Response> {
    errors::parse_id(raw, "order")
}

fn order_json(result: ServiceResult<SaleOrder>) -> ServiceResult<serde_json::Value> {
    result.map(|order| dto::order_to_json(&order))
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewSaleOrder>,
) -> axum::response::Response {
    errors::created(order_json(services.sales.create(body)))
}

pub async fn list_orders(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    errors::items(services.sales.list())
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(order_json(services.sales.get(id)))
}

pub async fn get_order_summary(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.sales.summary(id))
}

pub async fn set_delivery_mode(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::DeliveryModeRequest>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(order_json(services.sales.set_delivery_mode(id, body.delivery_mode)))
}

pub async fn add_stakeholder(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::StakeholderRequest>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(order_json(services.sales.add_stakeholder(id, body.partner_id)))
}

pub async fn remove_stakeholder(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, partner_id)): Path<(String, String)>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let partner_id: PartnerId = match errors::parse_id(&partner_id, "partner") {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(order_json(services.sales.remove_stakeholder(id, partner_id)))
}

pub async fn add_line(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddLineRequest>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(order_json(services.sales.add_line(
        id,
        body.product_id,
        body.quantity,
        body.unit_price,
    )))
}

pub async fn update_line(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, line_no)): Path<(String, u32)>,
    Json(body): Json<dto::UpdateLineRequest>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(order_json(services.sales.update_line(
        id,
        line_no,
        body.quantity,
        body.unit_price,
    )))
}

/// Split one line into dispatches; all-or-nothing.
pub async fn expand_line(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, line_no)): Path<(String, u32)>,
    Json(body): Json<dto::ExpandLineRequest>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(order_json(services.sales.expand_line(id, line_no, body.dispatches)))
}

pub async fn mass_dispatch(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<MassDispatchRequest>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(order_json(services.sales.mass_dispatch(id, body)))
}

pub async fn list_order_dispatches(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::items(services.sales.dispatches_for_order(id))
}

pub async fn update_dispatch(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, dispatch_id)): Path<(String, String)>,
    Json(body): Json<UpdateDispatchRequest>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let dispatch_id: DispatchId = match errors::parse_id(&dispatch_id, "dispatch") {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(order_json(services.sales.update_dispatch(id, dispatch_id, body)))
}

pub async fn remove_dispatch(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, dispatch_id)): Path<(String, String)>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let dispatch_id: DispatchId = match errors::parse_id(&dispatch_id, "dispatch") {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(order_json(services.sales.remove_dispatch(id, dispatch_id)))
}

pub async fn price_dispatches(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::items(services.sales.price_dispatches(id))
}

pub async fn confirm_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let confirmed = services.stock.confirm_order(id).map(|(order, pickings)| {
        let mut body = dto::order_to_json(&order);
        body["pickings"] = pickings.iter().map(dto::picking_to_json).collect();
        body
    });
    errors::ok(confirmed)
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(order_json(services.stock.cancel_order(id)))
}

pub async fn get_dispatch(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: DispatchId = match errors::parse_id(&id, "dispatch") {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.sales.dispatch(id))
}
