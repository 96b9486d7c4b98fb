//! Test world shared by the service tests: one customer, one active zone
//! served by one truck, and active products.

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use watergile_core::CountryCode;
use watergile_delivery::{
    Carrier, CarrierInput, DeliveryType, DeliveryZone, SlotId, TimeSlotInput, ZipPattern,
    ZoneInput,
};
use watergile_parties::{AddressId, AddressInput, AddressType, PartnerId, PartnerRelation};
use watergile_products::{ProductId, ProductType};
use watergile_sales::{DeliveryMode, SaleOrderId};

use super::{AppServices, Backends, Clients, DispatchRequest, NewPartner, NewProduct, NewSaleOrder};
use crate::config::AppConfig;

pub(crate) struct World {
    pub app: AppServices,
    pub customer: PartnerId,
    pub zone: DeliveryZone,
    pub truck: Carrier,
    pub fountain: ProductId,
    pub bottles: ProductId,
}

pub(crate) fn in_days(days: i64) -> NaiveDate {
    Utc::now().date_naive() + Duration::days(days)
}

impl World {
    pub fn new() -> Self {
        let clients = Clients::from_config(&AppConfig::default()).unwrap();
        let app = AppServices::build(Backends::in_memory(), clients);

        let truck = app
            .delivery
            .create_carrier(CarrierInput {
                name: "Truck".to_string(),
                delivery_type: DeliveryType::Fixed { price: dec!(15) },
                zone_ids: vec![],
            })
            .unwrap();
        let zone = app
            .delivery
            .create_zone(ZoneInput {
                code: "IDF".to_string(),
                name: "Ile-de-France".to_string(),
                sequence: None,
                country: CountryCode::france(),
                pattern: Some(ZipPattern::Start {
                    prefix: "75".to_string(),
                }),
                prefixes: vec![],
                carrier_ids: vec![truck.id],
                default_carrier_id: None,
                lead_time_days: None,
                daily_capacity: None,
            })
            .unwrap();
        let zone = app.delivery.activate_zone(zone.id).unwrap();

        let mut world = Self {
            customer: PartnerId::generate(),
            fountain: ProductId::generate(),
            bottles: ProductId::generate(),
            app,
            zone,
            truck,
        };
        world.customer = world.partner("Watergile Client");
        world.fountain = world.product("FT-100", "Fontaine");
        world.bottles = world.product("BT-19", "Bonbonne 19L");
        world
    }

    pub fn partner(&self, name: &str) -> PartnerId {
        self.app
            .partners
            .register(NewPartner {
                name: name.to_string(),
                is_company: true,
                parent_id: None,
                relation: PartnerRelation::Other,
                siret: None,
            })
            .unwrap()
            .id_typed()
    }

    pub fn product(&self, sku: &str, name: &str) -> ProductId {
        let product = self
            .app
            .catalog
            .create_product(NewProduct {
                sku: sku.to_string(),
                name: name.to_string(),
                product_type: ProductType::Storable,
                list_price: dec!(10),
                dispatchable: None,
            })
            .unwrap();
        self.app
            .catalog
            .activate_product(product.id_typed())
            .unwrap()
            .id_typed()
    }

    pub fn address(&self, owner: PartnerId, name: &str, zip: &str) -> AddressId {
        self.app
            .addresses
            .create(AddressInput {
                name: name.to_string(),
                owners: vec![owner],
                street: Some("1 rue de Rivoli".to_string()),
                street2: None,
                zip: Some(zip.to_string()),
                city: Some("Paris".to_string()),
                country: CountryCode::france(),
                address_type: AddressType::Delivery,
            })
            .unwrap()
            .id
    }

    pub fn morning(&self) -> SlotId {
        self.app
            .delivery
            .create_slot(TimeSlotInput {
                name: "Matin".to_string(),
                sequence: None,
                start_hour: 8.0,
                end_hour: 12.0,
                max_deliveries: None,
            })
            .unwrap()
            .id
    }

    /// Draft dispatch-mode order with the given lines and stakeholders.
    pub fn order(&self, lines: &[(ProductId, Decimal)], stakeholders: &[PartnerId]) -> SaleOrderId {
        let sales = &self.app.sales;
        let order_id = sales
            .create(NewSaleOrder {
                customer_id: self.customer,
                delivery_mode: DeliveryMode::Dispatch,
                name: None,
            })
            .unwrap()
            .id_typed();
        for (product_id, quantity) in lines {
            sales.add_line(order_id, *product_id, *quantity, None).unwrap();
        }
        for stakeholder in stakeholders {
            sales.add_stakeholder(order_id, *stakeholder).unwrap();
        }
        order_id
    }
}

pub(crate) fn request(
    stakeholder_id: PartnerId,
    address_id: AddressId,
    date: NaiveDate,
    slot_id: Option<SlotId>,
    quantity: Decimal,
) -> DispatchRequest {
    DispatchRequest {
        stakeholder_id,
        address_id,
        date,
        slot_id,
        zone_id: None,
        carrier_id: None,
        quantity,
    }
}
