use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use watergile_core::{Aggregate, AggregateRoot, CountryCode, DomainError};
use watergile_delivery::ZoneId;
use watergile_events::Event;

use crate::equipment::EquipmentId;

watergile_core::domain_id!(
    /// Product identifier.
    ProductId
);

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    #[default]
    Consumable,
    Service,
    Storable,
}

/// Aggregate root: Product.
///
/// `product_type` and `detailed_type` are kept equal: changing the type
/// mirrors it onto the detailed type, and a detailed type that disagrees is
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    status: ProductStatus,
    product_type: ProductType,
    detailed_type: ProductType,
    list_price: Decimal,
    hs_code: Option<String>,
    origin_country: Option<CountryCode>,
    dispatchable: bool,
    zone_ids: BTreeSet<ZoneId>,
    compatible_equipment: BTreeSet<EquipmentId>,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            sku: String::new(),
            name: String::new(),
            status: ProductStatus::Draft,
            product_type: ProductType::Consumable,
            detailed_type: ProductType::Consumable,
            list_price: Decimal::ZERO,
            hs_code: None,
            origin_country: None,
            dispatchable: true,
            zone_ids: BTreeSet::new(),
            compatible_equipment: BTreeSet::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn product_type(&self) -> ProductType {
        self.product_type
    }

    pub fn detailed_type(&self) -> ProductType {
        self.detailed_type
    }

    pub fn list_price(&self) -> Decimal {
        self.list_price
    }

    pub fn hs_code(&self) -> Option<&str> {
        self.hs_code.as_deref()
    }

    pub fn origin_country(&self) -> Option<&CountryCode> {
        self.origin_country.as_ref()
    }

    pub fn is_dispatchable(&self) -> bool {
        self.dispatchable
    }

    pub fn zone_ids(&self) -> &BTreeSet<ZoneId> {
        &self.zone_ids
    }

    pub fn compatible_equipment(&self) -> &BTreeSet<EquipmentId> {
        &self.compatible_equipment
    }

    /// A product is a spare part iff it lists compatible equipment.
    pub fn is_spare_part(&self) -> bool {
        !self.compatible_equipment.is_empty()
    }

    /// Whether the product may be delivered in `zone` (no zones = everywhere).
    pub fn deliverable_to(&self, zone: ZoneId) -> bool {
        self.zone_ids.is_empty() || self.zone_ids.contains(&zone)
    }

    /// Check if product can be sold (must be Active, not Archived).
    pub fn can_be_sold(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub product_type: ProductType,
    pub list_price: Decimal,
    /// Defaults to `true`.
    pub dispatchable: Option<bool>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateProduct {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProduct {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDetails {
    pub product_id: ProductId,
    pub name: Option<String>,
    pub list_price: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeType. Mirrors the new type onto the detailed type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeType {
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetDetailedType. Must agree with the current type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDetailedType {
    pub product_id: ProductId,
    pub detailed_type: ProductType,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTradeCompliance {
    pub product_id: ProductId,
    pub hs_code: Option<String>,
    pub origin_country: Option<CountryCode>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDispatchable {
    pub product_id: ProductId,
    pub dispatchable: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDeliveryZones {
    pub product_id: ProductId,
    pub zone_ids: Vec<ZoneId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCompatibleEquipment {
    pub product_id: ProductId,
    pub equipment_ids: Vec<EquipmentId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    ActivateProduct(ActivateProduct),
    ArchiveProduct(ArchiveProduct),
    UpdateDetails(UpdateDetails),
    ChangeType(ChangeType),
    SetDetailedType(SetDetailedType),
    SetTradeCompliance(SetTradeCompliance),
    SetDispatchable(SetDispatchable),
    SetDeliveryZones(SetDeliveryZones),
    SetCompatibleEquipment(SetCompatibleEquipment),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub product_type: ProductType,
    pub list_price: Decimal,
    pub dispatchable: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductActivated {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetailsUpdated {
    pub product_id: ProductId,
    pub name: String,
    pub list_price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTypeChanged {
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub detailed_type: ProductType,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTradeComplianceSet {
    pub product_id: ProductId,
    pub hs_code: Option<String>,
    pub origin_country: Option<CountryCode>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDispatchabilityChanged {
    pub product_id: ProductId,
    pub dispatchable: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductZonesChanged {
    pub product_id: ProductId,
    pub zone_ids: BTreeSet<ZoneId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCompatibilityChanged {
    pub product_id: ProductId,
    pub equipment_ids: BTreeSet<EquipmentId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    ProductActivated(ProductActivated),
    ProductArchived(ProductArchived),
    ProductDetailsUpdated(ProductDetailsUpdated),
    ProductTypeChanged(ProductTypeChanged),
    ProductTradeComplianceSet(ProductTradeComplianceSet),
    ProductDispatchabilityChanged(ProductDispatchabilityChanged),
    ProductZonesChanged(ProductZonesChanged),
    ProductCompatibilityChanged(ProductCompatibilityChanged),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "products.product.created",
            ProductEvent::ProductActivated(_) => "products.product.activated",
            ProductEvent::ProductArchived(_) => "products.product.archived",
            ProductEvent::ProductDetailsUpdated(_) => "products.product.details_updated",
            ProductEvent::ProductTypeChanged(_) => "products.product.type_changed",
            ProductEvent::ProductTradeComplianceSet(_) => "products.product.trade_compliance_set",
            ProductEvent::ProductDispatchabilityChanged(_) => {
                "products.product.dispatchability_changed"
            }
            ProductEvent::ProductZonesChanged(_) => "products.product.zones_changed",
            ProductEvent::ProductCompatibilityChanged(_) => "products.product.compatibility_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::ProductActivated(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
            ProductEvent::ProductDetailsUpdated(e) => e.occurred_at,
            ProductEvent::ProductTypeChanged(e) => e.occurred_at,
            ProductEvent::ProductTradeComplianceSet(e) => e.occurred_at,
            ProductEvent::ProductDispatchabilityChanged(e) => e.occurred_at,
            ProductEvent::ProductZonesChanged(e) => e.occurred_at,
            ProductEvent::ProductCompatibilityChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.status = ProductStatus::Draft;
                self.product_type = e.product_type;
                self.detailed_type = e.product_type;
                self.list_price = e.list_price;
                self.dispatchable = e.dispatchable;
                self.created = true;
            }
            ProductEvent::ProductActivated(_) => {
                self.status = ProductStatus::Active;
            }
            ProductEvent::ProductArchived(_) => {
                self.status = ProductStatus::Archived;
            }
            ProductEvent::ProductDetailsUpdated(e) => {
                self.name = e.name.clone();
                self.list_price = e.list_price;
            }
            ProductEvent::ProductTypeChanged(e) => {
                self.product_type = e.product_type;
                self.detailed_type = e.detailed_type;
            }
            ProductEvent::ProductTradeComplianceSet(e) => {
                self.hs_code = e.hs_code.clone();
                self.origin_country = e.origin_country.clone();
            }
            ProductEvent::ProductDispatchabilityChanged(e) => {
                self.dispatchable = e.dispatchable;
            }
            ProductEvent::ProductZonesChanged(e) => {
                self.zone_ids = e.zone_ids.clone();
            }
            ProductEvent::ProductCompatibilityChanged(e) => {
                self.compatible_equipment = e.equipment_ids.clone();
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::ActivateProduct(cmd) => self.handle_activate(cmd),
            ProductCommand::ArchiveProduct(cmd) => self.handle_archive(cmd),
            ProductCommand::UpdateDetails(cmd) => self.handle_update_details(cmd),
            ProductCommand::ChangeType(cmd) => self.handle_change_type(cmd),
            ProductCommand::SetDetailedType(cmd) => self.handle_set_detailed_type(cmd),
            ProductCommand::SetTradeCompliance(cmd) => self.handle_trade_compliance(cmd),
            ProductCommand::SetDispatchable(cmd) => self.handle_set_dispatchable(cmd),
            ProductCommand::SetDeliveryZones(cmd) => self.handle_set_zones(cmd),
            ProductCommand::SetCompatibleEquipment(cmd) => self.handle_set_compatibility(cmd),
        }
    }
}

impl Product {
    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_product_id(product_id)
    }

    fn ensure_price(price: Decimal) -> Result<(), DomainError> {
        if price.is_sign_negative() && !price.is_zero() {
            return Err(DomainError::validation("list price cannot be negative"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.sku.trim().is_empty() {
            return Err(DomainError::validation("SKU cannot be empty"));
        }
        Self::ensure_price(cmd.list_price)?;

        // SKU uniqueness is checked by the service against the catalog read
        // model before dispatching.
        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            product_id: cmd.product_id,
            sku: cmd.sku.trim().to_string(),
            name: cmd.name.trim().to_string(),
            product_type: cmd.product_type,
            list_price: cmd.list_price,
            dispatchable: cmd.dispatchable.unwrap_or(true),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;

        if self.status == ProductStatus::Active {
            return Err(DomainError::conflict("product is already active"));
        }
        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("archived products cannot be activated"));
        }

        Ok(vec![ProductEvent::ProductActivated(ProductActivated {
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::conflict("product is already archived"));
        }

        Ok(vec![ProductEvent::ProductArchived(ProductArchived {
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_details(&self, cmd: &UpdateDetails) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;

        let name = cmd.name.clone().unwrap_or_else(|| self.name.clone());
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let list_price = cmd.list_price.unwrap_or(self.list_price);
        Self::ensure_price(list_price)?;

        Ok(vec![ProductEvent::ProductDetailsUpdated(ProductDetailsUpdated {
            product_id: cmd.product_id,
            name: name.trim().to_string(),
            list_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_type(&self, cmd: &ChangeType) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;
        if cmd.product_type == self.product_type && self.detailed_type == self.product_type {
            return Ok(vec![]);
        }
        Ok(vec![ProductEvent::ProductTypeChanged(ProductTypeChanged {
            product_id: cmd.product_id,
            product_type: cmd.product_type,
            detailed_type: cmd.product_type,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_detailed_type(
        &self,
        cmd: &SetDetailedType,
    ) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;
        if cmd.detailed_type != self.product_type {
            return Err(DomainError::invariant(format!(
                "detailed type {:?} does not match product type {:?}",
                cmd.detailed_type, self.product_type
            )));
        }
        Ok(vec![])
    }

    fn handle_trade_compliance(
        &self,
        cmd: &SetTradeCompliance,
    ) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;

        let hs_code = match cmd.hs_code.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(code) => {
                let digits: String = code.chars().filter(|c| !matches!(c, ' ' | '.')).collect();
                if !(6..=10).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
                    return Err(DomainError::validation(format!(
                        "HS code '{code}' must contain 6 to 10 digits"
                    )));
                }
                Some(digits)
            }
            None => None,
        };

        Ok(vec![ProductEvent::ProductTradeComplianceSet(ProductTradeComplianceSet {
            product_id: cmd.product_id,
            hs_code,
            origin_country: cmd.origin_country.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_dispatchable(
        &self,
        cmd: &SetDispatchable,
    ) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;
        if cmd.dispatchable == self.dispatchable {
            return Ok(vec![]);
        }
        Ok(vec![ProductEvent::ProductDispatchabilityChanged(
            ProductDispatchabilityChanged {
                product_id: cmd.product_id,
                dispatchable: cmd.dispatchable,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_set_zones(&self, cmd: &SetDeliveryZones) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;
        Ok(vec![ProductEvent::ProductZonesChanged(ProductZonesChanged {
            product_id: cmd.product_id,
            zone_ids: cmd.zone_ids.iter().copied().collect(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_compatibility(
        &self,
        cmd: &SetCompatibleEquipment,
    ) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;
        Ok(vec![ProductEvent::ProductCompatibilityChanged(ProductCompatibilityChanged {
            product_id: cmd.product_id,
            equipment_ids: cmd.equipment_ids.iter().copied().collect(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
