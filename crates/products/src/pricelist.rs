//! Pricelists gated by partner and delivery zone.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use watergile_core::{DomainError, Entity};
use watergile_delivery::ZoneId;
use watergile_parties::PartnerId;

use crate::product::ProductId;

watergile_core::domain_id!(
    /// Pricelist identifier.
    PricelistId
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricelistItem {
    pub product_id: ProductId,
    pub fixed_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricelistInput {
    pub name: String,
    #[serde(default)]
    pub partner_ids: Vec<PartnerId>,
    #[serde(default)]
    pub zone_ids: Vec<ZoneId>,
    #[serde(default)]
    pub items: Vec<PricelistItem>,
}

/// A pricelist with its allowed partners and zones.
///
/// An empty partner set or an empty zone set allows everyone / everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricelist {
    pub id: PricelistId,
    pub name: String,
    pub partner_ids: BTreeSet<PartnerId>,
    pub zone_ids: BTreeSet<ZoneId>,
    pub items: Vec<PricelistItem>,
    pub active: bool,
}

impl Pricelist {
    pub fn new(id: PricelistId, input: PricelistInput) -> Result<Self, DomainError> {
        let mut pricelist = Self {
            id,
            name: String::new(),
            partner_ids: BTreeSet::new(),
            zone_ids: BTreeSet::new(),
            items: Vec::new(),
            active: true,
        };
        pricelist.replace(input)?;
        Ok(pricelist)
    }

    pub fn replace(&mut self, input: PricelistInput) -> Result<(), DomainError> {
        if input.name.trim().is_empty() {
            return Err(DomainError::validation("pricelist name cannot be empty"));
        }
        let mut seen = BTreeSet::new();
        for item in &input.items {
            if item.fixed_price.is_sign_negative() && !item.fixed_price.is_zero() {
                return Err(DomainError::validation(format!(
                    "negative price for product {}",
                    item.product_id
                )));
            }
            if !seen.insert(item.product_id) {
                return Err(DomainError::validation(format!(
                    "product {} is listed twice",
                    item.product_id
                )));
            }
        }

        self.name = input.name.trim().to_string();
        self.partner_ids = input.partner_ids.into_iter().collect();
        self.zone_ids = input.zone_ids.into_iter().collect();
        self.items = input.items;
        Ok(())
    }

    /// Applicable iff the partner is allowed and the zone is allowed.
    ///
    /// A dispatch without a resolved zone only matches pricelists that do not
    /// restrict zones.
    pub fn is_applicable(&self, partner: PartnerId, zone: Option<ZoneId>) -> bool {
        if !self.active {
            return false;
        }
        let partner_ok = self.partner_ids.is_empty() || self.partner_ids.contains(&partner);
        let zone_ok = self.zone_ids.is_empty()
            || zone.is_some_and(|zone| self.zone_ids.contains(&zone));
        partner_ok && zone_ok
    }

    pub fn price_for(&self, product: ProductId) -> Option<Decimal> {
        self.items
            .iter()
            .find(|item| item.product_id == product)
            .map(|item| item.fixed_price)
    }
}

impl Entity for Pricelist {
    type Id = PricelistId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// First applicable pricelist, in the given order.
pub fn select_pricelist<'a>(
    pricelists: &'a [Pricelist],
    partner: PartnerId,
    zone: Option<ZoneId>,
) -> Option<&'a Pricelist> {
    pricelists.iter().find(|pl| pl.is_applicable(partner, zone))
}
