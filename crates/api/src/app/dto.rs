use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use watergile_core::CountryCode;
use watergile_delivery::{CalendarRegion, ZoneId};
use watergile_infra::services::DispatchRequest;
use watergile_infra::sync::SyncOutcome;
use watergile_parties::{AddressId, BlazId, Partner, PartnerId, PartnerRelation};
use watergile_products::{EquipmentId, EquipmentState, Product, ProductId, ProductType};
use watergile_sales::{DeliveryMode, SaleOrder};
use watergile_stock::StockPicking;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RenamePartnerRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SetParentRequest {
    pub parent_id: Option<PartnerId>,
}

#[derive(Debug, Deserialize)]
pub struct SetRelationRequest {
    pub relation: PartnerRelation,
}

#[derive(Debug, Deserialize)]
pub struct SetSiretRequest {
    pub siret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckSiretRequest {
    pub siret: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBlazRequest {
    pub name: String,
    pub owner_id: PartnerId,
}

#[derive(Debug, Deserialize)]
pub struct AssignBlazRequest {
    pub blaz_id: Option<BlazId>,
}

#[derive(Debug, Deserialize)]
pub struct ReverseQuery {
    pub lat: f64,
    pub lon: f64,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct GeocodeQuery {
    pub q: String,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveZoneQuery {
    pub zip: String,
    pub country: Option<CountryCode>,
}

#[derive(Debug, Deserialize)]
pub struct EarliestDateQuery {
    pub zip: String,
    pub from: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct HolidaysQuery {
    pub year: i32,
    #[serde(default)]
    pub region: Option<CalendarRegion>,
    pub zip: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BusinessDaysQuery {
    pub from: NaiveDate,
    pub days: Option<i64>,
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub region: Option<CalendarRegion>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub list_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct ProductTypeRequest {
    pub product_type: ProductType,
}

#[derive(Debug, Deserialize)]
pub struct TradeComplianceRequest {
    pub hs_code: Option<String>,
    pub origin_country: Option<CountryCode>,
}

#[derive(Debug, Deserialize)]
pub struct DispatchableRequest {
    pub dispatchable: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProductZonesRequest {
    pub zone_ids: Vec<ZoneId>,
}

#[derive(Debug, Deserialize)]
pub struct CompatibleEquipmentRequest {
    pub equipment_ids: Vec<EquipmentId>,
}

#[derive(Debug, Deserialize)]
pub struct EquipmentStateRequest {
    pub state: EquipmentState,
}

#[derive(Debug, Deserialize)]
pub struct ApplicabilityQuery {
    pub partner_id: PartnerId,
    pub zone_id: Option<ZoneId>,
}

#[derive(Debug, Deserialize)]
pub struct DeliveryModeRequest {
    pub delivery_mode: DeliveryMode,
}

#[derive(Debug, Deserialize)]
pub struct StakeholderRequest {
    pub partner_id: PartnerId,
}

#[derive(Debug, Deserialize)]
pub struct AddLineRequest {
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLineRequest {
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ExpandLineRequest {
    pub dispatches: Vec<DispatchRequest>,
}

#[derive(Debug, Deserialize)]
pub struct PlanStandardRequest {
    pub address_id: AddressId,
    pub scheduled_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ValorisedSlipQuery {
    pub tax_rate: Option<Decimal>,
}

// -------------------------
// Response mapping
// -------------------------

pub fn partner_to_json(partner: &Partner) -> JsonValue {
    json!({
        "id": partner.id_typed(),
        "name": partner.name(),
        "is_company": partner.is_company(),
        "parent_id": partner.parent_id(),
        "relation": partner.relation(),
        "siret": partner.siret(),
        "blaz_id": partner.blaz_id(),
        "active": partner.is_active(),
        "enrichment": partner.enrichment(),
        "sync_state": partner.sync_state(),
        "last_sync_error": partner.last_sync_error(),
    })
}

pub fn enrichment_to_json(partner: &Partner, outcome: SyncOutcome) -> JsonValue {
    let outcome = match outcome {
        SyncOutcome::Enriched => "enriched",
        SyncOutcome::PendingRetry => "pending_retry",
        SyncOutcome::Invalid => "invalid",
    };
    json!({
        "outcome": outcome,
        "partner": partner_to_json(partner),
    })
}

pub fn product_to_json(product: &Product) -> JsonValue {
    json!({
        "id": product.id_typed(),
        "sku": product.sku(),
        "name": product.name(),
        "status": product.status(),
        "product_type": product.product_type(),
        "detailed_type": product.detailed_type(),
        "list_price": product.list_price(),
        "hs_code": product.hs_code(),
        "origin_country": product.origin_country(),
        "dispatchable": product.is_dispatchable(),
        "zone_ids": product.zone_ids(),
        "compatible_equipment": product.compatible_equipment(),
        "is_spare_part": product.is_spare_part(),
    })
}

pub fn order_to_json(order: &SaleOrder) -> JsonValue {
    let lines: Vec<JsonValue> = order
        .lines()
        .iter()
        .map(|line| {
            json!({
                "line_no": line.line_no,
                "product_id": line.product_id,
                "quantity": line.quantity,
                "unit_price": line.unit_price,
                "subtotal": line.subtotal(),
                "dispatched_qty": order.dispatched_qty(line.line_no),
                "available_qty": order.available_qty(line.line_no),
            })
        })
        .collect();

    json!({
        "id": order.id_typed(),
        "name": order.name(),
        "customer_id": order.customer_id(),
        "delivery_mode": order.delivery_mode(),
        "status": order.status(),
        "stakeholders": order.stakeholders().collect::<Vec<_>>(),
        "lines": lines,
        "dispatches": order.dispatches().collect::<Vec<_>>(),
        "groups": order.groups().collect::<Vec<_>>(),
        "dispatch_completion": order.dispatch_completion(),
        "amount_untaxed": order.amount_untaxed(),
    })
}

pub fn picking_to_json(picking: &StockPicking) -> JsonValue {
    json!({
        "id": picking.id_typed(),
        "name": picking.name(),
        "order_id": picking.order_id(),
        "group_id": picking.group_id(),
        "dispatch_id": picking.dispatch_id(),
        "address": picking.address(),
        "scheduled_date": picking.scheduled_date(),
        "slot_id": picking.slot_id(),
        "zone_id": picking.zone_id(),
        "carrier_id": picking.carrier_id(),
        "state": picking.state(),
        "moves": picking.moves(),
    })
}
