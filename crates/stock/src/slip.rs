//! Delivery slips rendered from a picking.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use watergile_core::DomainError;
use watergile_products::ProductId;

use crate::picking::{AddressSnapshot, StockPicking};

pub fn slip_file_name(picking: &StockPicking) -> String {
    if picking.dispatch_id().is_some() {
        format!("Delivery Note - Dispatch - {}", picking.name())
    } else {
        format!("Delivery Note - {}", picking.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlipLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: Decimal,
}

/// Quantities only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliverySlip {
    pub file_name: String,
    pub picking_name: String,
    pub address: AddressSnapshot,
    pub scheduled_date: Option<NaiveDate>,
    pub lines: Vec<SlipLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValorisedLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub untaxed: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Slip with prices per line and document totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValorisedSlip {
    pub file_name: String,
    pub picking_name: String,
    pub address: AddressSnapshot,
    pub scheduled_date: Option<NaiveDate>,
    pub lines: Vec<ValorisedLine>,
    pub untaxed_total: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
}

fn ensure_created(picking: &StockPicking) -> Result<(), DomainError> {
    if !picking.is_created() {
        return Err(DomainError::not_found());
    }
    Ok(())
}

fn product_name(names: &BTreeMap<ProductId, String>, id: ProductId) -> String {
    names.get(&id).cloned().unwrap_or_else(|| id.to_string())
}

pub fn delivery_slip(
    picking: &StockPicking,
    product_names: &BTreeMap<ProductId, String>,
) -> Result<DeliverySlip, DomainError> {
    ensure_created(picking)?;
    let lines = picking
        .moves()
        .iter()
        .map(|mv| SlipLine {
            product_id: mv.product_id,
            product_name: product_name(product_names, mv.product_id),
            quantity: mv.quantity,
        })
        .collect();
    Ok(DeliverySlip {
        file_name: slip_file_name(picking),
        picking_name: picking.name().to_string(),
        address: picking.address().clone(),
        scheduled_date: picking.scheduled_date(),
        lines,
    })
}

/// `tax_rate` is a fraction (0.20 for 20 %). Amounts are rounded to cents
/// per line; document totals are sums of the rounded line amounts.
pub fn valorised_slip(
    picking: &StockPicking,
    product_names: &BTreeMap<ProductId, String>,
    tax_rate: Decimal,
) -> Result<ValorisedSlip, DomainError> {
    ensure_created(picking)?;
    if tax_rate.is_sign_negative() {
        return Err(DomainError::validation("tax rate cannot be negative"));
    }

    let lines: Vec<ValorisedLine> = picking
        .moves()
        .iter()
        .map(|mv| {
            let untaxed = (mv.quantity * mv.unit_price).round_dp(2);
            let tax = (untaxed * tax_rate).round_dp(2);
            ValorisedLine {
                product_id: mv.product_id,
                product_name: product_name(product_names, mv.product_id),
                quantity: mv.quantity,
                unit_price: mv.unit_price,
                untaxed,
                tax,
                total: untaxed + tax,
            }
        })
        .collect();

    let untaxed_total = lines.iter().map(|l| l.untaxed).sum();
    let tax_total = lines.iter().map(|l| l.tax).sum();
    let total = lines.iter().map(|l| l.total).sum();
    Ok(ValorisedSlip {
        file_name: slip_file_name(picking),
        picking_name: picking.name().to_string(),
        address: picking.address().clone(),
        scheduled_date: picking.scheduled_date(),
        lines,
        untaxed_total,
        tax_total,
        total,
    })
}
