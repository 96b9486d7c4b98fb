//! Carriers and their reachability from delivery zones.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use watergile_core::{DomainError, Entity};

use crate::zone::{DeliveryZone, ZoneId};

watergile_core::domain_id!(
    /// Carrier identifier.
    CarrierId
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryType {
    Fixed { price: Decimal },
    MondialRelay { merchant_code: String, api_key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationLevel {
    /// Rates only.
    Rate,
    /// Rates and shipment creation.
    RateAndShip,
}

impl IntegrationLevel {
    pub fn level(self) -> u8 {
        match self {
            IntegrationLevel::Rate => 1,
            IntegrationLevel::RateAndShip => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierInput {
    pub name: String,
    pub delivery_type: DeliveryType,
    #[serde(default)]
    pub zone_ids: Vec<ZoneId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Carrier {
    pub id: CarrierId,
    pub name: String,
    pub delivery_type: DeliveryType,
    pub zone_ids: Vec<ZoneId>,
    pub active: bool,
}

impl Carrier {
    pub fn new(id: CarrierId, input: CarrierInput) -> Result<Self, DomainError> {
        let mut carrier = Self {
            id,
            name: String::new(),
            delivery_type: input.delivery_type.clone(),
            zone_ids: Vec::new(),
            active: true,
        };
        carrier.replace(input)?;
        Ok(carrier)
    }

    pub fn replace(&mut self, input: CarrierInput) -> Result<(), DomainError> {
        if input.name.trim().is_empty() {
            return Err(DomainError::validation("carrier name cannot be empty"));
        }
        match &input.delivery_type {
            DeliveryType::Fixed { price } if price.is_sign_negative() => {
                return Err(DomainError::validation("fixed price cannot be negative"));
            }
            DeliveryType::MondialRelay { merchant_code, .. } if merchant_code.trim().is_empty() => {
                return Err(DomainError::validation("Mondial Relay merchant code is required"));
            }
            _ => {}
        }
        let mut zone_ids = input.zone_ids;
        zone_ids.sort();
        zone_ids.dedup();

        self.name = input.name.trim().to_string();
        self.delivery_type = input.delivery_type;
        self.zone_ids = zone_ids;
        Ok(())
    }

    pub fn integration_level(&self) -> IntegrationLevel {
        match self.delivery_type {
            DeliveryType::MondialRelay { .. } => IntegrationLevel::RateAndShip,
            DeliveryType::Fixed { .. } => IntegrationLevel::Rate,
        }
    }

    pub fn can_generate_return(&self) -> bool {
        matches!(self.delivery_type, DeliveryType::MondialRelay { .. })
    }

    /// Shipping price for the fixed delivery type; relay carriers are priced
    /// by their API.
    pub fn fixed_price(&self) -> Option<Decimal> {
        match self.delivery_type {
            DeliveryType::Fixed { price } => Some(price),
            DeliveryType::MondialRelay { .. } => None,
        }
    }
}

impl Entity for Carrier {
    type Id = CarrierId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Carrier/zone links are recorded on both sides; either side is enough.
pub fn carrier_serves_zone(carrier: &Carrier, zone: &DeliveryZone) -> bool {
    zone.has_carrier(carrier.id) || carrier.zone_ids.contains(&zone.id)
}
