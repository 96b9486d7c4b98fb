//! Product catalog, pricelists and the equipment registry.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use watergile_core::{CountryCode, DomainError};
use watergile_delivery::{DeliveryZone, ZoneId};
use watergile_parties::{Partner, PartnerId};
use watergile_products::{
    ActivateProduct, ArchiveProduct, ChangeType, CreateProduct, Equipment, EquipmentAge,
    EquipmentId, EquipmentInput, EquipmentState, Pricelist, PricelistId, PricelistInput, Product,
    ProductCommand, ProductId, ProductType, SetCompatibleEquipment, SetDeliveryZones,
    SetDetailedType, SetDispatchable, SetTradeCompliance, UpdateDetails, WarrantyStatus,
    ensure_unique_serial,
};

use super::{Dispatcher, ServiceResult, SharedRecords, not_found};
use crate::aggregate_types::PRODUCT;

#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub product_type: ProductType,
    pub list_price: Decimal,
    #[serde(default)]
    pub dispatchable: Option<bool>,
}

/// Equipment as shown to users, with its warranty and age on `today`.
#[derive(Debug, Clone, Serialize)]
pub struct EquipmentView {
    #[serde(flatten)]
    pub equipment: Equipment,
    pub warranty: WarrantyStatus,
    pub age: EquipmentAge,
}

impl EquipmentView {
    fn at(equipment: Equipment, today: NaiveDate) -> Self {
        Self {
            warranty: equipment.warranty_status(today),
            age: equipment.age(today),
            equipment,
        }
    }
}

pub struct CatalogService {
    dispatcher: Arc<Dispatcher>,
    pricelists: SharedRecords<PricelistId, Pricelist>,
    equipment: SharedRecords<EquipmentId, Equipment>,
    zones: SharedRecords<ZoneId, DeliveryZone>,
}

impl CatalogService {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        pricelists: SharedRecords<PricelistId, Pricelist>,
        equipment: SharedRecords<EquipmentId, Equipment>,
        zones: SharedRecords<ZoneId, DeliveryZone>,
    ) -> Self {
        Self {
            dispatcher,
            pricelists,
            equipment,
            zones,
        }
    }

    // Products

    fn execute(&self, product_id: ProductId, command: ProductCommand) -> ServiceResult<Product> {
        self.dispatcher
            .dispatch(product_id.aggregate_id(), PRODUCT, command, |id| {
                Product::empty(ProductId::new(id))
            })?;
        self.product(product_id)
    }

    pub fn product(&self, product_id: ProductId) -> ServiceResult<Product> {
        let product = self
            .dispatcher
            .load(product_id.aggregate_id(), |id| Product::empty(ProductId::new(id)))?;
        if !product.is_created() {
            return Err(not_found());
        }
        Ok(product)
    }

    /// Every product, ordered by SKU.
    pub fn products(&self) -> ServiceResult<Vec<Product>> {
        let ids: BTreeSet<_> = self
            .dispatcher
            .store()
            .load_by_type(PRODUCT)
            .map_err(crate::command_dispatcher::DispatchError::from)?
            .into_iter()
            .map(|e| e.aggregate_id)
            .collect();
        let mut products = ids
            .into_iter()
            .map(|id| self.product(ProductId::new(id)))
            .collect::<ServiceResult<Vec<_>>>()?;
        products.sort_by(|a, b| a.sku().cmp(b.sku()));
        Ok(products)
    }

    pub fn create_product(&self, input: NewProduct) -> ServiceResult<Product> {
        if self
            .products()?
            .iter()
            .any(|p| p.sku().eq_ignore_ascii_case(input.sku.trim()))
        {
            return Err(DomainError::conflict(format!("SKU '{}' is already used", input.sku)).into());
        }
        let product_id = ProductId::generate();
        let product = self.execute(
            product_id,
            ProductCommand::CreateProduct(CreateProduct {
                product_id,
                sku: input.sku,
                name: input.name,
                product_type: input.product_type,
                list_price: input.list_price,
                dispatchable: input.dispatchable,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(%product_id, sku = product.sku(), "product created");
        Ok(product)
    }

    pub fn activate_product(&self, product_id: ProductId) -> ServiceResult<Product> {
        self.execute(
            product_id,
            ProductCommand::ActivateProduct(ActivateProduct {
                product_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn archive_product(&self, product_id: ProductId) -> ServiceResult<Product> {
        self.execute(
            product_id,
            ProductCommand::ArchiveProduct(ArchiveProduct {
                product_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn update_details(
        &self,
        product_id: ProductId,
        name: Option<String>,
        list_price: Option<Decimal>,
    ) -> ServiceResult<Product> {
        self.execute(
            product_id,
            ProductCommand::UpdateDetails(UpdateDetails {
                product_id,
                name,
                list_price,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn change_type(&self, product_id: ProductId, product_type: ProductType) -> ServiceResult<Product> {
        self.execute(
            product_id,
            ProductCommand::ChangeType(ChangeType {
                product_id,
                product_type,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn set_detailed_type(
        &self,
        product_id: ProductId,
        detailed_type: ProductType,
    ) -> ServiceResult<Product> {
        self.execute(
            product_id,
            ProductCommand::SetDetailedType(SetDetailedType {
                product_id,
                detailed_type,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn set_trade_compliance(
        &self,
        product_id: ProductId,
        hs_code: Option<String>,
        origin_country: Option<CountryCode>,
    ) -> ServiceResult<Product> {
        self.execute(
            product_id,
            ProductCommand::SetTradeCompliance(SetTradeCompliance {
                product_id,
                hs_code,
                origin_country,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn set_dispatchable(&self, product_id: ProductId, dispatchable: bool) -> ServiceResult<Product> {
        self.execute(
            product_id,
            ProductCommand::SetDispatchable(SetDispatchable {
                product_id,
                dispatchable,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn set_delivery_zones(
        &self,
        product_id: ProductId,
        zone_ids: Vec<ZoneId>,
    ) -> ServiceResult<Product> {
        self.ensure_zones_exist(&zone_ids)?;
        self.execute(
            product_id,
            ProductCommand::SetDeliveryZones(SetDeliveryZones {
                product_id,
                zone_ids,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn set_compatible_equipment(
        &self,
        product_id: ProductId,
        equipment_ids: Vec<EquipmentId>,
    ) -> ServiceResult<Product> {
        for id in &equipment_ids {
            if self.equipment.get(id)?.is_none() {
                return Err(DomainError::validation(format!("equipment {id} is unknown")).into());
            }
        }
        self.execute(
            product_id,
            ProductCommand::SetCompatibleEquipment(SetCompatibleEquipment {
                product_id,
                equipment_ids,
                occurred_at: Utc::now(),
            }),
        )
    }

    // Pricelists

    fn ensure_zones_exist(&self, ids: &[ZoneId]) -> ServiceResult<()> {
        for id in ids {
            if self.zones.get(id)?.is_none() {
                return Err(DomainError::validation(format!("zone {id} is unknown")).into());
            }
        }
        Ok(())
    }

    fn ensure_partner_exists(&self, partner_id: PartnerId) -> ServiceResult<()> {
        let partner = self
            .dispatcher
            .load(partner_id.aggregate_id(), |id| Partner::empty(PartnerId::new(id)))?;
        if !partner.is_created() {
            return Err(DomainError::validation(format!("partner {partner_id} is unknown")).into());
        }
        Ok(())
    }

    fn check_pricelist(&self, input: &PricelistInput) -> ServiceResult<()> {
        self.ensure_zones_exist(&input.zone_ids)?;
        for partner_id in &input.partner_ids {
            self.ensure_partner_exists(*partner_id)?;
        }
        for item in &input.items {
            self.product(item.product_id).map_err(|_| {
                DomainError::validation(format!("product {} is unknown", item.product_id))
            })?;
        }
        Ok(())
    }

    pub fn create_pricelist(&self, input: PricelistInput) -> ServiceResult<Pricelist> {
        self.check_pricelist(&input)?;
        let pricelist = Pricelist::new(PricelistId::generate(), input)?;
        self.pricelists.upsert(pricelist.id, pricelist.clone())?;
        Ok(pricelist)
    }

    pub fn update_pricelist(&self, id: PricelistId, input: PricelistInput) -> ServiceResult<Pricelist> {
        let mut pricelist = self.pricelist(id)?;
        self.check_pricelist(&input)?;
        pricelist.replace(input)?;
        self.pricelists.upsert(id, pricelist.clone())?;
        Ok(pricelist)
    }

    pub fn pricelist(&self, id: PricelistId) -> ServiceResult<Pricelist> {
        self.pricelists.get(&id)?.ok_or_else(not_found)
    }

    /// Active pricelists in name order, the order in which they are tried.
    pub fn pricelists(&self) -> ServiceResult<Vec<Pricelist>> {
        let mut pricelists: Vec<_> = self
            .pricelists
            .list()?
            .into_iter()
            .filter(|p| p.active)
            .collect();
        pricelists.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pricelists)
    }

    pub fn delete_pricelist(&self, id: PricelistId) -> ServiceResult<()> {
        if !self.pricelists.remove(&id)? {
            return Err(not_found());
        }
        Ok(())
    }

    // Equipment

    fn check_equipment(&self, input: &EquipmentInput, except: Option<EquipmentId>) -> ServiceResult<Product> {
        ensure_unique_serial(&self.equipment.list()?, &input.serial_number, except)?;
        self.ensure_partner_exists(input.owner_id)?;
        self.ensure_partner_exists(input.holder_id)?;
        if let Some(manufacturer) = input.manufacturer_id {
            self.ensure_partner_exists(manufacturer)?;
        }
        self.product(input.product_id)
            .map_err(|_| DomainError::validation(format!("product {} is unknown", input.product_id)).into())
    }

    pub fn register_equipment(&self, input: EquipmentInput) -> ServiceResult<EquipmentView> {
        let product = self.check_equipment(&input, None)?;
        let equipment = Equipment::new(EquipmentId::generate(), input, product.name())?;
        self.equipment.upsert(equipment.id, equipment.clone())?;
        Ok(EquipmentView::at(equipment, today()))
    }

    pub fn update_equipment(&self, id: EquipmentId, input: EquipmentInput) -> ServiceResult<EquipmentView> {
        let mut equipment = self.stored_equipment(id)?;
        let product = self.check_equipment(&input, Some(id))?;
        equipment.replace(input, product.name())?;
        self.equipment.upsert(id, equipment.clone())?;
        Ok(EquipmentView::at(equipment, today()))
    }

    fn stored_equipment(&self, id: EquipmentId) -> ServiceResult<Equipment> {
        self.equipment.get(&id)?.ok_or_else(not_found)
    }

    pub fn equipment(&self, id: EquipmentId) -> ServiceResult<EquipmentView> {
        Ok(EquipmentView::at(self.stored_equipment(id)?, today()))
    }

    pub fn equipment_list(&self) -> ServiceResult<Vec<EquipmentView>> {
        let today = today();
        Ok(self
            .equipment
            .list()?
            .into_iter()
            .map(|e| EquipmentView::at(e, today))
            .collect())
    }

    pub fn transition_equipment(
        &self,
        id: EquipmentId,
        target: EquipmentState,
    ) -> ServiceResult<EquipmentView> {
        let mut equipment = self.stored_equipment(id)?;
        equipment.transition(target)?;
        self.equipment.upsert(id, equipment.clone())?;
        Ok(EquipmentView::at(equipment, today()))
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Backends;
    use rust_decimal_macros::dec;
    use watergile_parties::{PartnerCommand, PartnerRelation, RegisterPartner};
    use watergile_products::PricelistItem;

    use crate::aggregate_types::PARTNER;

    fn service() -> (CatalogService, Arc<Dispatcher>) {
        let backends = Backends::in_memory();
        let dispatcher = Arc::new(backends.dispatcher());
        let svc = CatalogService::new(
            dispatcher.clone(),
            backends.records("pricelists"),
            backends.records("equipment"),
            backends.records("zones"),
        );
        (svc, dispatcher)
    }

    fn partner(dispatcher: &Dispatcher, name: &str) -> PartnerId {
        let partner_id = PartnerId::generate();
        dispatcher
            .dispatch(
                partner_id.aggregate_id(),
                PARTNER,
                PartnerCommand::RegisterPartner(RegisterPartner {
                    partner_id,
                    name: name.to_string(),
                    is_company: true,
                    parent_id: None,
                    relation: PartnerRelation::Other,
                    siret: None,
                    occurred_at: Utc::now(),
                }),
                |id| Partner::empty(PartnerId::new(id)),
            )
            .unwrap();
        partner_id
    }

    fn fountain(svc: &CatalogService, sku: &str) -> Product {
        svc.create_product(NewProduct {
            sku: sku.to_string(),
            name: "Fontaine".to_string(),
            product_type: ProductType::Storable,
            list_price: dec!(250),
            dispatchable: None,
        })
        .unwrap()
    }

    #[test]
    fn products_are_listed_by_sku_and_skus_are_unique() {
        let (svc, _) = service();
        fountain(&svc, "FT-2");
        fountain(&svc, "FT-1");
        assert!(svc
            .create_product(NewProduct {
                sku: "ft-1".to_string(),
                name: "Dup".to_string(),
                product_type: ProductType::Consumable,
                list_price: dec!(1),
                dispatchable: None,
            })
            .is_err());

        let skus: Vec<_> = svc.products().unwrap().iter().map(|p| p.sku().to_string()).collect();
        assert_eq!(skus, vec!["FT-1", "FT-2"]);
    }

    #[test]
    fn pricelist_items_must_reference_known_products() {
        let (svc, _) = service();
        let err = svc.create_pricelist(PricelistInput {
            name: "Pro".to_string(),
            partner_ids: vec![],
            zone_ids: vec![],
            items: vec![PricelistItem {
                product_id: ProductId::generate(),
                fixed_price: dec!(10),
            }],
        });
        assert!(err.is_err());

        let product = fountain(&svc, "FT-1");
        let pricelist = svc
            .create_pricelist(PricelistInput {
                name: "Pro".to_string(),
                partner_ids: vec![],
                zone_ids: vec![],
                items: vec![PricelistItem {
                    product_id: product.id_typed(),
                    fixed_price: dec!(10),
                }],
            })
            .unwrap();
        assert_eq!(pricelist.price_for(product.id_typed()), Some(dec!(10)));
        assert_eq!(svc.pricelists().unwrap().len(), 1);
    }

    #[test]
    fn equipment_serials_are_unique_and_name_defaults_to_product() {
        let (svc, dispatcher) = service();
        let product = fountain(&svc, "FT-1");
        let owner = partner(&dispatcher, "Owner");
        let holder = partner(&dispatcher, "Holder");
        let input = EquipmentInput {
            name: String::new(),
            product_id: product.id_typed(),
            serial_number: "SN-001".to_string(),
            owner_id: owner,
            holder_id: holder,
            address_id: None,
            manufacturer_id: None,
            refurbished: false,
            service_start: None,
            warranty_end: None,
        };

        let view = svc.register_equipment(input.clone()).unwrap();
        assert_eq!(view.equipment.name, "Fontaine");
        assert_eq!(view.warranty, WarrantyStatus::NoWarranty);

        let dup = EquipmentInput {
            serial_number: "sn-001".to_string(),
            ..input
        };
        assert!(svc.register_equipment(dup).is_err());
    }

    #[test]
    fn equipment_follows_its_lifecycle() {
        let (svc, dispatcher) = service();
        let product = fountain(&svc, "FT-1");
        let view = svc
            .register_equipment(EquipmentInput {
                name: "Unit".to_string(),
                product_id: product.id_typed(),
                serial_number: "SN-9".to_string(),
                owner_id: partner(&dispatcher, "A"),
                holder_id: partner(&dispatcher, "B"),
                address_id: None,
                manufacturer_id: None,
                refurbished: false,
                service_start: None,
                warranty_end: None,
            })
            .unwrap();
        let id = view.equipment.id;

        assert!(svc.transition_equipment(id, EquipmentState::InService).is_err());
        svc.transition_equipment(id, EquipmentState::Available).unwrap();
        let view = svc.transition_equipment(id, EquipmentState::InService).unwrap();
        assert_eq!(view.equipment.state, EquipmentState::InService);
    }
}
