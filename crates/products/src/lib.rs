//! Products domain module: catalog (event-sourced), pricelists and the
//! equipment registry.
//!
//! Deterministic domain logic only (no IO, no HTTP, no storage).

pub mod equipment;
pub mod pricelist;
pub mod product;

pub use equipment::{
    Equipment, EquipmentAge, EquipmentId, EquipmentInput, EquipmentState, WarrantyStatus,
    ensure_unique_serial,
};
pub use pricelist::{Pricelist, PricelistId, PricelistInput, PricelistItem, select_pricelist};
pub use product::{
    ActivateProduct, ArchiveProduct, ChangeType, CreateProduct, Product, ProductActivated,
    ProductArchived, ProductCommand, ProductCompatibilityChanged, ProductCreated,
    ProductDetailsUpdated, ProductDispatchabilityChanged, ProductEvent, ProductId, ProductStatus,
    ProductTradeComplianceSet, ProductType, ProductTypeChanged, ProductZonesChanged,
    SetCompatibleEquipment, SetDeliveryZones, SetDetailedType, SetDispatchable,
    SetTradeCompliance, UpdateDetails,
};
