use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use watergile_core::CountryCode;
use watergile_delivery::{CalendarRegion, CarrierId, CarrierInput, SlotId, TimeSlotInput, ZoneId, ZoneInput};
use watergile_infra::services::AppServices;

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .nest("/zones", zones_router())
        .nest("/carriers", carriers_router())
        .nest("/slots", slots_router())
        .nest("/calendar", calendar_router())
}

fn zones_router() -> Router {
    Router::new()
        .route("/", post(create_zone).get(list_zones))
        .route("/resolve", get(resolve_zone))
        .route("/:id", get(get_zone).put(update_zone))
        .route("/:id/activate", post(activate_zone))
        .route("/:id/archive", post(archive_zone))
        .route("/:id/reset", post(reset_zone))
        .route("/:id/earliest-date", get(earliest_date))
}

fn carriers_router() -> Router {
    Router::new()
        .route("/", post(create_carrier).get(list_carriers))
        .route("/:id", get(get_carrier).put(update_carrier))
}

fn slots_router() -> Router {
    Router::new()
        .route("/", post(create_slot).get(list_slots))
        .route("/:id", get(get_slot))
}

fn calendar_router() -> Router {
    Router::new()
        .route("/holidays", get(list_holidays))
        .route("/business-days", get(business_days))
}

fn zone_id(raw: &str) -> Result<ZoneId, axum::response::Response> {
    errors::parse_id(raw, "zone")
}

// Zones

pub async fn create_zone(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<ZoneInput>,
) -> axum::response::Response {
    errors::created(services.delivery.create_zone(body))
}

pub async fn list_zones(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    errors::items(services.delivery.zones())
}

pub async fn get_zone(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match zone_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.delivery.zone(id))
}

pub async fn update_zone(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<ZoneInput>,
) -> axum::response::Response {
    let id = match zone_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.delivery.update_zone(id, body))
}

pub async fn activate_zone(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match zone_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.delivery.activate_zone(id))
}

pub async fn archive_zone(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match zone_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.delivery.archive_zone(id))
}

pub async fn reset_zone(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match zone_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.delivery.reset_zone(id))
}

pub async fn resolve_zone(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ResolveZoneQuery>,
) -> axum::response::Response {
    let country = query.country.unwrap_or_else(CountryCode::france);
    match services.delivery.resolve(&query.zip, &country) {
        Ok(Some(zone)) => (StatusCode::OK, Json(zone)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no active zone serves {} ({country})", query.zip),
        ),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn earliest_date(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Query(query): Query<dto::EarliestDateQuery>,
) -> axum::response::Response {
    let id = match zone_id(&id) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let from = query.from.unwrap_or_else(|| Utc::now().date_naive());
    errors::ok(
        services
            .delivery
            .earliest_delivery_date(id, from, &query.zip)
            .map(|date| json!({ "from": from, "earliest_date": date })),
    )
}

// Carriers

pub async fn create_carrier(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<CarrierInput>,
) -> axum::response::Response {
    errors::created(services.delivery.create_carrier(body))
}

pub async fn list_carriers(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    errors::items(services.delivery.carriers())
}

pub async fn get_carrier(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: CarrierId = match errors::parse_id(&id, "carrier") {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.delivery.carrier(id))
}

pub async fn update_carrier(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<CarrierInput>,
) -> axum::response::Response {
    let id: CarrierId = match errors::parse_id(&id, "carrier") {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.delivery.update_carrier(id, body))
}

// Slots

pub async fn create_slot(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<TimeSlotInput>,
) -> axum::response::Response {
    errors::created(services.delivery.create_slot(body))
}

pub async fn list_slots(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    errors::items(services.delivery.slots())
}

pub async fn get_slot(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: SlotId = match errors::parse_id(&id, "slot") {
        Ok(v) => v,
        Err(r) => return r,
    };
    errors::ok(services.delivery.slot(id))
}

// Calendar

fn region(explicit: Option<CalendarRegion>, zip: Option<&str>) -> CalendarRegion {
    explicit
        .or_else(|| zip.map(CalendarRegion::from_zip))
        .unwrap_or_default()
}

pub async fn list_holidays(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::HolidaysQuery>,
) -> axum::response::Response {
    let region = region(query.region, query.zip.as_deref());
    let holidays = services.delivery.holidays(query.year, region);
    (
        StatusCode::OK,
        Json(json!({ "year": query.year, "region": region, "items": holidays })),
    )
        .into_response()
}

/// `from` + `days` business days, or the count of business days in
/// `(from, to]`.
pub async fn business_days(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::BusinessDaysQuery>,
) -> axum::response::Response {
    let region = region(query.region, None);
    match (query.days, query.to) {
        (Some(days), None) => (
            StatusCode::OK,
            Json(json!({
                "from": query.from,
                "days": days,
                "date": services.delivery.add_business_days(query.from, days, region),
            })),
        )
            .into_response(),
        (None, Some(to)) => (
            StatusCode::OK,
            Json(json!({
                "from": query.from,
                "to": to,
                "business_days": services.delivery.business_days_between(query.from, to, region),
            })),
        )
            .into_response(),
        _ => errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "exactly one of 'days' or 'to' is required",
        ),
    }
}
