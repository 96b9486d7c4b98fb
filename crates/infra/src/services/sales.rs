//! Sale orders and their dispatches.
//!
//! The service turns user requests (address ids, optional zone/carrier)
//! into fully resolved dispatch targets before handing them to the
//! [`SaleOrder`] aggregate:
//!
//! - the address is snapshotted as an [`AddressRef`]
//! - the zone defaults to the active zone serving the address
//! - the carrier defaults to the zone's preferred carrier
//! - zone and slot capacity are checked against the dispatch read model
//! - the group id comes from the [`GroupStore`] registry
//!
//! Registry rows are released once the order drops a group, and rows
//! claimed by a command that failed are released right away.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use watergile_core::DomainError;
use watergile_delivery::{CarrierId, DeliveryZone, SlotId, ZoneId};
use watergile_parties::{AddressId, Partner, PartnerAddress, PartnerId};
use watergile_products::ProductId;
use watergile_sales::{
    AddLine, AddStakeholder, AddressRef, CancelDispatches, CancelOrder, ConfirmOrder,
    CreateSaleOrder, DeliveryMode, DispatchGroupId, DispatchId, DispatchPrice, DispatchTarget,
    ExpandLine, GroupKey, LineProduct, MarkDispatchesDone, MarkDispatchesInTransit,
    MassAllocation, MassDispatch, MassDispatchLine, RemoveDispatch, RemoveStakeholder, Route,
    SaleOrder, SaleOrderCommand, SaleOrderEvent, SaleOrderId, SetDeliveryMode, UpdateDispatch,
    UpdateLine, price_dispatch,
};

use super::{
    CatalogService, DeliveryService, Dispatcher, ServiceResult, SharedCursors, SharedRecords,
    not_found,
};
use crate::aggregate_types::SALE_ORDER;
use crate::event_store::StoredEvent;
use crate::group_store::GroupStore;
use crate::projections::{
    Checkpointed, DispatchReadModel, DispatchesProjection, SaleOrderReadModel,
    SalesOrdersProjection,
};

pub type SalesOrdersView =
    Checkpointed<SalesOrdersProjection<SharedRecords<SaleOrderId, SaleOrderReadModel>>, SharedCursors>;
pub type DispatchesView =
    Checkpointed<DispatchesProjection<SharedRecords<DispatchId, DispatchReadModel>>, SharedCursors>;

#[derive(Debug, Clone, Deserialize)]
pub struct NewSaleOrder {
    pub customer_id: PartnerId,
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    /// Generated (`S00001`, ...) when absent.
    #[serde(default)]
    pub name: Option<String>,
}

/// One share of a line, as requested by a user.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchRequest {
    pub stakeholder_id: PartnerId,
    pub address_id: AddressId,
    pub date: NaiveDate,
    #[serde(default)]
    pub slot_id: Option<SlotId>,
    #[serde(default)]
    pub zone_id: Option<ZoneId>,
    #[serde(default)]
    pub carrier_id: Option<CarrierId>,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MassDispatchRequest {
    pub line_nos: Vec<u32>,
    pub address_id: AddressId,
    pub date: NaiveDate,
    #[serde(default)]
    pub slot_id: Option<SlotId>,
    #[serde(default)]
    pub zone_id: Option<ZoneId>,
    #[serde(default)]
    pub carrier_id: Option<CarrierId>,
    pub allocations: Vec<MassAllocation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateDispatchRequest {
    pub address_id: AddressId,
    pub date: NaiveDate,
    #[serde(default)]
    pub slot_id: Option<SlotId>,
    #[serde(default)]
    pub zone_id: Option<ZoneId>,
    #[serde(default)]
    pub carrier_id: Option<CarrierId>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PricedDispatch {
    pub dispatch_id: DispatchId,
    pub name: String,
    pub stakeholder_id: PartnerId,
    pub zone_id: Option<ZoneId>,
    pub quantity: Decimal,
    #[serde(flatten)]
    pub price: DispatchPrice,
}

/// Address, zone and carrier of a dispatch once defaults are applied.
struct Destination {
    address: AddressRef,
    zone: Option<DeliveryZone>,
    carrier_id: Option<CarrierId>,
}

impl Destination {
    fn zone_id(&self) -> Option<ZoneId> {
        self.zone.as_ref().map(|z| z.id)
    }
}

/// Deliveries booked by the request being built, per (zone, date) and
/// (slot, date), on top of those already in the read model.
#[derive(Default)]
struct Bookings {
    zones: BTreeMap<(ZoneId, NaiveDate), u32>,
    slots: BTreeMap<(SlotId, NaiveDate), u32>,
}

pub struct SalesService {
    dispatcher: Arc<Dispatcher>,
    orders: Arc<SalesOrdersView>,
    dispatches: Arc<DispatchesView>,
    groups: Arc<dyn GroupStore>,
    addresses: SharedRecords<AddressId, PartnerAddress>,
    delivery: Arc<DeliveryService>,
    catalog: Arc<CatalogService>,
}

impl SalesService {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        orders: Arc<SalesOrdersView>,
        dispatches: Arc<DispatchesView>,
        groups: Arc<dyn GroupStore>,
        addresses: SharedRecords<AddressId, PartnerAddress>,
        delivery: Arc<DeliveryService>,
        catalog: Arc<CatalogService>,
    ) -> Self {
        Self {
            dispatcher,
            orders,
            dispatches,
            groups,
            addresses,
            delivery,
            catalog,
        }
    }

    pub fn orders(&self) -> &Arc<SalesOrdersView> {
        &self.orders
    }

    pub fn dispatch_view(&self) -> &Arc<DispatchesView> {
        &self.dispatches
    }

    // Queries

    pub fn get(&self, order_id: SaleOrderId) -> ServiceResult<SaleOrder> {
        let order = self
            .dispatcher
            .load(order_id.aggregate_id(), |id| SaleOrder::empty(SaleOrderId::new(id)))?;
        if !order.is_created() {
            return Err(not_found());
        }
        Ok(order)
    }

    pub fn summary(&self, order_id: SaleOrderId) -> ServiceResult<SaleOrderReadModel> {
        self.orders.read_model().get(&order_id)?.ok_or_else(not_found)
    }

    pub fn list(&self) -> ServiceResult<Vec<SaleOrderReadModel>> {
        let mut orders = self.orders.read_model().list()?;
        orders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(orders)
    }

    pub fn dispatch(&self, dispatch_id: DispatchId) -> ServiceResult<DispatchReadModel> {
        self.dispatches
            .read_model()
            .get(&dispatch_id)?
            .ok_or_else(not_found)
    }

    pub fn dispatches_for_order(&self, order_id: SaleOrderId) -> ServiceResult<Vec<DispatchReadModel>> {
        self.get(order_id)?;
        let mut dispatches = self.dispatches.read_model().for_order(order_id)?;
        dispatches.sort_by(|a, b| a.line_no.cmp(&b.line_no).then_with(|| a.name.cmp(&b.name)));
        Ok(dispatches)
    }

    /// Price of every active dispatch of the order through the active
    /// pricelists, tried in name order.
    pub fn price_dispatches(&self, order_id: SaleOrderId) -> ServiceResult<Vec<PricedDispatch>> {
        let order = self.get(order_id)?;
        let pricelists = self.catalog.pricelists()?;
        let mut priced = Vec::new();
        for dispatch in order.dispatches().filter(|d| d.is_active()) {
            let Some(line) = order.line(dispatch.line_no) else {
                continue;
            };
            priced.push(PricedDispatch {
                dispatch_id: dispatch.id,
                name: dispatch.name.clone(),
                stakeholder_id: dispatch.stakeholder_id,
                zone_id: dispatch.zone_id,
                quantity: dispatch.quantity,
                price: price_dispatch(&pricelists, line, dispatch),
            });
        }
        Ok(priced)
    }

    // Order header

    pub fn create(&self, input: NewSaleOrder) -> ServiceResult<SaleOrder> {
        self.partner(input.customer_id)?;
        let name = match input.name {
            Some(name) => name,
            None => format!("S{:05}", self.orders.read_model().list()?.len() + 1),
        };
        let order_id = SaleOrderId::generate();
        let order = self.execute(
            order_id,
            SaleOrderCommand::CreateSaleOrder(CreateSaleOrder {
                order_id,
                name,
                customer_id: input.customer_id,
                delivery_mode: input.delivery_mode,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(%order_id, name = order.name(), "sale order created");
        Ok(order)
    }

    pub fn set_delivery_mode(&self, order_id: SaleOrderId, delivery_mode: DeliveryMode) -> ServiceResult<SaleOrder> {
        self.execute(
            order_id,
            SaleOrderCommand::SetDeliveryMode(SetDeliveryMode {
                order_id,
                delivery_mode,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn add_stakeholder(&self, order_id: SaleOrderId, partner_id: PartnerId) -> ServiceResult<SaleOrder> {
        let partner = self.partner(partner_id)?;
        self.execute(
            order_id,
            SaleOrderCommand::AddStakeholder(AddStakeholder {
                order_id,
                partner_id,
                name: partner.name().to_string(),
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn remove_stakeholder(&self, order_id: SaleOrderId, partner_id: PartnerId) -> ServiceResult<SaleOrder> {
        self.execute(
            order_id,
            SaleOrderCommand::RemoveStakeholder(RemoveStakeholder {
                order_id,
                partner_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Adds a line at `unit_price`, or at the product's list price.
    pub fn add_line(
        &self,
        order_id: SaleOrderId,
        product_id: ProductId,
        quantity: Decimal,
        unit_price: Option<Decimal>,
    ) -> ServiceResult<SaleOrder> {
        let product = self.catalog.product(product_id).map_err(|_| {
            DomainError::validation(format!("product {product_id} is unknown"))
        })?;
        if !product.can_be_sold() {
            return Err(DomainError::validation(format!(
                "product '{}' is not active",
                product.name()
            ))
            .into());
        }
        self.execute(
            order_id,
            SaleOrderCommand::AddLine(AddLine {
                order_id,
                product: LineProduct::from(&product),
                quantity,
                unit_price: unit_price.unwrap_or(product.list_price()),
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn update_line(
        &self,
        order_id: SaleOrderId,
        line_no: u32,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> ServiceResult<SaleOrder> {
        self.execute(
            order_id,
            SaleOrderCommand::UpdateLine(UpdateLine {
                order_id,
                line_no,
                quantity,
                unit_price,
                occurred_at: Utc::now(),
            }),
        )
    }

    // Dispatches

    /// Split a line into one dispatch per request.
    pub fn expand_line(
        &self,
        order_id: SaleOrderId,
        line_no: u32,
        requests: Vec<DispatchRequest>,
    ) -> ServiceResult<SaleOrder> {
        let order = self.get(order_id)?;
        // A line that is already dispatched holds its places; the aggregate
        // either recognises the same split or rejects the new one.
        let replay = order.dispatches_for_line(line_no).any(|d| d.is_active());
        self.with_claims(order_id, |claimed| {
            let mut bookings = Bookings::default();
            let mut targets = Vec::with_capacity(requests.len());
            for request in requests {
                let destination =
                    self.destination(request.address_id, request.zone_id, request.carrier_id)?;
                if !replay {
                    self.book(&destination, request.slot_id, request.date, &mut bookings)?;
                }
                let mut target = DispatchTarget {
                    dispatch_id: DispatchId::generate(),
                    stakeholder_id: request.stakeholder_id,
                    zone_id: destination.zone_id(),
                    carrier_id: destination.carrier_id,
                    address: destination.address,
                    date: request.date,
                    slot_id: request.slot_id,
                    quantity: request.quantity,
                    group_id: None,
                };
                target.group_id = Some(self.group_for(&order, target.group_key(), claimed)?);
                targets.push(target);
            }
            self.execute(
                order_id,
                SaleOrderCommand::ExpandLine(ExpandLine {
                    order_id,
                    line_no,
                    targets,
                    business_date: business_date(),
                    occurred_at: Utc::now(),
                }),
            )
        })
    }

    /// One dispatch per (selected line, allocation), all to one destination.
    pub fn mass_dispatch(&self, order_id: SaleOrderId, request: MassDispatchRequest) -> ServiceResult<SaleOrder> {
        let order = self.get(order_id)?;
        self.with_claims(order_id, |claimed| {
            let destination =
                self.destination(request.address_id, request.zone_id, request.carrier_id)?;
            let mut bookings = Bookings::default();
            for _ in 0..request.line_nos.len() * request.allocations.len() {
                self.book(&destination, request.slot_id, request.date, &mut bookings)?;
            }
            let key = GroupKey {
                address_id: request.address_id,
                zone_id: destination.zone_id(),
                date: request.date,
                slot_id: request.slot_id,
                carrier_id: destination.carrier_id,
            };
            let group_id = self.group_for(&order, key, claimed)?;
            let lines = request
                .line_nos
                .iter()
                .map(|&line_no| MassDispatchLine {
                    line_no,
                    dispatch_ids: request
                        .allocations
                        .iter()
                        .map(|_| DispatchId::generate())
                        .collect(),
                })
                .collect();
            self.execute(
                order_id,
                SaleOrderCommand::MassDispatch(MassDispatch {
                    order_id,
                    lines,
                    zone_id: destination.zone_id(),
                    carrier_id: destination.carrier_id,
                    address: destination.address,
                    date: request.date,
                    slot_id: request.slot_id,
                    group_id: Some(group_id),
                    allocations: request.allocations,
                    business_date: business_date(),
                    occurred_at: Utc::now(),
                }),
            )
        })
    }

    pub fn update_dispatch(
        &self,
        order_id: SaleOrderId,
        dispatch_id: DispatchId,
        request: UpdateDispatchRequest,
    ) -> ServiceResult<SaleOrder> {
        let order = self.get(order_id)?;
        let current = order.dispatch(dispatch_id).ok_or_else(not_found)?.clone();
        self.with_claims(order_id, |claimed| {
            // The dispatch already counts towards its current zone and slot.
            let mut bookings = Bookings::default();
            if let Some(zone_id) = current.zone_id {
                let others = self.scheduled(|d| {
                    d.dispatch_id != dispatch_id && d.zone_id == Some(zone_id) && d.date == current.date
                })?;
                bookings.zones.insert((zone_id, current.date), others);
            }
            if let Some(slot_id) = current.slot_id {
                let others = self.scheduled(|d| {
                    d.dispatch_id != dispatch_id && d.slot_id == Some(slot_id) && d.date == current.date
                })?;
                bookings.slots.insert((slot_id, current.date), others);
            }
            let destination =
                self.destination(request.address_id, request.zone_id, request.carrier_id)?;
            self.book(&destination, request.slot_id, request.date, &mut bookings)?;
            let key = GroupKey {
                address_id: request.address_id,
                zone_id: destination.zone_id(),
                date: request.date,
                slot_id: request.slot_id,
                carrier_id: destination.carrier_id,
            };
            let group_id = if key == current.group_key() {
                None
            } else {
                Some(self.group_for(&order, key, claimed)?)
            };
            self.execute(
                order_id,
                SaleOrderCommand::UpdateDispatch(UpdateDispatch {
                    order_id,
                    dispatch_id,
                    zone_id: destination.zone_id(),
                    carrier_id: destination.carrier_id,
                    address: destination.address,
                    date: request.date,
                    slot_id: request.slot_id,
                    quantity: request.quantity,
                    group_id,
                    business_date: business_date(),
                    occurred_at: Utc::now(),
                }),
            )
        })
    }

    pub fn remove_dispatch(&self, order_id: SaleOrderId, dispatch_id: DispatchId) -> ServiceResult<SaleOrder> {
        self.execute(
            order_id,
            SaleOrderCommand::RemoveDispatch(RemoveDispatch {
                order_id,
                dispatch_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Confirm the order. The routes handed to the aggregate are the
    /// (zone, carrier) pairs of its dispatches that are currently reachable.
    pub fn confirm(&self, order_id: SaleOrderId) -> ServiceResult<SaleOrder> {
        let order = self.get(order_id)?;
        let mut routes = BTreeSet::new();
        for dispatch in order.dispatches().filter(|d| d.is_active()) {
            if let (Some(zone_id), Some(carrier_id)) = (dispatch.zone_id, dispatch.carrier_id) {
                if self.delivery.serves(zone_id, carrier_id)? {
                    routes.insert(Route {
                        zone_id,
                        carrier_id,
                    });
                }
            }
        }
        let order = self.execute(
            order_id,
            SaleOrderCommand::ConfirmOrder(ConfirmOrder {
                order_id,
                routes: routes.into_iter().collect(),
                occurred_at: Utc::now(),
            }),
        )?;
        info!(%order_id, name = order.name(), "sale order confirmed");
        Ok(order)
    }

    pub fn mark_in_transit(&self, order_id: SaleOrderId, dispatch_ids: Vec<DispatchId>) -> ServiceResult<SaleOrder> {
        self.execute(
            order_id,
            SaleOrderCommand::MarkDispatchesInTransit(MarkDispatchesInTransit {
                order_id,
                dispatch_ids,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn mark_done(&self, order_id: SaleOrderId, dispatch_ids: Vec<DispatchId>) -> ServiceResult<SaleOrder> {
        self.execute(
            order_id,
            SaleOrderCommand::MarkDispatchesDone(MarkDispatchesDone {
                order_id,
                dispatch_ids,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn cancel_dispatches(&self, order_id: SaleOrderId, dispatch_ids: Vec<DispatchId>) -> ServiceResult<SaleOrder> {
        self.execute(
            order_id,
            SaleOrderCommand::CancelDispatches(CancelDispatches {
                order_id,
                dispatch_ids,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn cancel(&self, order_id: SaleOrderId) -> ServiceResult<SaleOrder> {
        self.execute(
            order_id,
            SaleOrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    // Plumbing

    fn execute(&self, order_id: SaleOrderId, command: SaleOrderCommand) -> ServiceResult<SaleOrder> {
        let committed = self
            .dispatcher
            .dispatch(order_id.aggregate_id(), SALE_ORDER, command, |id| {
                SaleOrder::empty(SaleOrderId::new(id))
            })?;
        self.release_removed_groups(order_id, &committed);

        let store = self.dispatcher.store();
        self.orders.refresh_stream(store, order_id.aggregate_id())?;
        self.dispatches.refresh_stream(store, order_id.aggregate_id())?;
        self.get(order_id)
    }

    fn partner(&self, partner_id: PartnerId) -> ServiceResult<Partner> {
        let partner = self
            .dispatcher
            .load(partner_id.aggregate_id(), |id| Partner::empty(PartnerId::new(id)))?;
        if !partner.is_created() {
            return Err(DomainError::validation(format!("partner {partner_id} is unknown")).into());
        }
        Ok(partner)
    }

    /// Group for `key`: the order's own group when it has one, else the
    /// registry's (recorded in `claimed` until the command commits).
    fn group_for(
        &self,
        order: &SaleOrder,
        key: GroupKey,
        claimed: &mut Vec<(GroupKey, DispatchGroupId)>,
    ) -> ServiceResult<DispatchGroupId> {
        if let Some(existing) = order.group_for_key(&key) {
            return Ok(existing);
        }
        if let Some((_, id)) = claimed.iter().find(|(k, _)| *k == key) {
            return Ok(*id);
        }
        let group_id = self.groups.lookup_or_create(order.id_typed(), &key)?;
        claimed.push((key, group_id));
        Ok(group_id)
    }

    /// Run a command that may claim registry groups. When it fails, the
    /// claims the order never recorded are released.
    fn with_claims(
        &self,
        order_id: SaleOrderId,
        run: impl FnOnce(&mut Vec<(GroupKey, DispatchGroupId)>) -> ServiceResult<SaleOrder>,
    ) -> ServiceResult<SaleOrder> {
        let mut claimed = Vec::new();
        let result = run(&mut claimed);
        if result.is_err() && !claimed.is_empty() {
            let order = self.get(order_id).ok();
            for (key, group_id) in claimed {
                let recorded = order
                    .as_ref()
                    .is_some_and(|o| o.group_for_key(&key) == Some(group_id));
                if !recorded {
                    if let Err(err) = self.groups.release(order_id, &key, group_id) {
                        warn!(%order_id, %group_id, error = %err, "failed to release dispatch group");
                    }
                }
            }
        }
        result
    }

    fn release_removed_groups(&self, order_id: SaleOrderId, committed: &[StoredEvent]) {
        for stored in committed {
            let Ok(SaleOrderEvent::DispatchGroupRemoved(removed)) =
                serde_json::from_value::<SaleOrderEvent>(stored.payload.clone())
            else {
                continue;
            };
            if let Err(err) = self.groups.release(order_id, &removed.key, removed.group_id) {
                warn!(%order_id, group_id = %removed.group_id, error = %err, "failed to release dispatch group");
            }
        }
    }

    /// Resolve the address snapshot, zone and carrier of a dispatch.
    fn destination(
        &self,
        address_id: AddressId,
        zone_id: Option<ZoneId>,
        carrier_id: Option<CarrierId>,
    ) -> ServiceResult<Destination> {
        let address = self
            .addresses
            .get(&address_id)?
            .ok_or_else(|| DomainError::validation(format!("address {address_id} is unknown")))?;
        if !address.active {
            return Err(DomainError::validation(format!("address '{}' is archived", address.name)).into());
        }

        let zone = match zone_id {
            Some(id) => Some(
                self.delivery
                    .zone(id)
                    .map_err(|_| DomainError::validation(format!("zone {id} is unknown")))?,
            ),
            None => match address.zip.as_deref() {
                Some(zip) => self.delivery.resolve(zip, &address.country)?,
                None => None,
            },
        };

        let carrier_id = match carrier_id {
            Some(id) => {
                self.delivery
                    .carrier(id)
                    .map_err(|_| DomainError::validation(format!("carrier {id} is unknown")))?;
                Some(id)
            }
            None => zone.as_ref().and_then(DeliveryZone::preferred_carrier),
        };

        Ok(Destination {
            address: AddressRef::from(&address),
            zone,
            carrier_id,
        })
    }

    /// Book a place in the zone's and slot's daily capacity for `date`.
    /// Counts are read once per (zone|slot, date) and then kept in `bookings`.
    fn book(
        &self,
        destination: &Destination,
        slot_id: Option<SlotId>,
        date: NaiveDate,
        bookings: &mut Bookings,
    ) -> ServiceResult<()> {
        if let Some(zone) = &destination.zone {
            let booked = match bookings.zones.get(&(zone.id, date)) {
                Some(&booked) => booked,
                None => self.scheduled(|d| d.zone_id == Some(zone.id) && d.date == date)?,
            };
            zone.check_capacity(booked)?;
            bookings.zones.insert((zone.id, date), booked + 1);
        }
        if let Some(slot_id) = slot_id {
            let slot = self
                .delivery
                .slot(slot_id)
                .map_err(|_| DomainError::validation(format!("time slot {slot_id} is unknown")))?;
            let booked = match bookings.slots.get(&(slot_id, date)) {
                Some(&booked) => booked,
                None => self.scheduled(|d| d.slot_id == Some(slot_id) && d.date == date)?,
            };
            if let Some(max) = slot.max_deliveries {
                if booked >= max {
                    return Err(DomainError::invariant(format!(
                        "time slot '{}' is fully booked on {date}",
                        slot.name
                    ))
                    .into());
                }
            }
            bookings.slots.insert((slot_id, date), booked + 1);
        }
        Ok(())
    }

    /// In-progress dispatches matching `filter`, across all orders.
    fn scheduled(&self, filter: impl Fn(&DispatchReadModel) -> bool) -> ServiceResult<u32> {
        Ok(self
            .dispatches
            .read_model()
            .list()?
            .iter()
            .filter(|d| d.is_in_progress() && filter(d))
            .count() as u32)
    }
}

fn business_date() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_dispatcher::DispatchError;
    use crate::read_model::{InMemoryRecordStore, RecordStore, StoreError};
    use crate::services::ServiceError;
    use crate::services::fixtures::{World, in_days, request};
    use rust_decimal_macros::dec;
    use watergile_core::AggregateRoot;
    use watergile_sales::SaleOrderStatus;

    #[test]
    fn two_addresses_give_two_groups_and_the_order_confirms() {
        let world = World::new();
        let sales = &world.app.sales;
        let a = world.partner("Agence A");
        let b = world.partner("Agence B");
        let addr_a = world.address(a, "Site A", "75011");
        let addr_b = world.address(b, "Site B", "75012");
        let morning = world.morning();
        let date = in_days(10);
        let order_id = world.order(&[(world.fountain, dec!(10))], &[a, b]);

        let order = sales
            .expand_line(
                order_id,
                1,
                vec![
                    request(a, addr_a, date, Some(morning), dec!(4)),
                    request(b, addr_b, date, Some(morning), dec!(6)),
                ],
            )
            .unwrap();

        assert_eq!(order.dispatches().count(), 2);
        assert_eq!(order.groups().count(), 2);
        for dispatch in order.dispatches() {
            assert_eq!(dispatch.zone_id, Some(world.zone.id));
            assert_eq!(dispatch.carrier_id, Some(world.truck.id));
        }
        assert_eq!(sales.dispatches_for_order(order_id).unwrap().len(), 2);

        let confirmed = sales.confirm(order_id).unwrap();
        assert_eq!(confirmed.status(), SaleOrderStatus::Confirmed);
        assert_eq!(sales.summary(order_id).unwrap().name, confirmed.name());
    }

    #[test]
    fn dispatches_to_one_destination_share_a_group() {
        let world = World::new();
        let sales = &world.app.sales;
        let a = world.partner("Agence A");
        let b = world.partner("Agence B");
        let head_office = world.address(world.customer, "Siège", "75008");
        let date = in_days(10);
        let order_id = world.order(&[(world.fountain, dec!(10))], &[a, b]);

        let order = sales
            .expand_line(
                order_id,
                1,
                vec![
                    request(a, head_office, date, None, dec!(4)),
                    request(b, head_office, date, None, dec!(6)),
                ],
            )
            .unwrap();

        let groups: Vec<_> = order.groups().collect();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].dispatch_ids.len(), 2);
    }

    #[test]
    fn mismatched_mass_dispatch_creates_nothing_and_frees_the_registry() {
        let world = World::new();
        let sales = &world.app.sales;
        let a = world.partner("Agence A");
        let b = world.partner("Agence B");
        let site = world.address(world.customer, "Siège", "75008");
        let date = in_days(10);
        let order_id = world.order(
            &[(world.fountain, dec!(4)), (world.bottles, dec!(6))],
            &[a, b],
        );

        let err = sales
            .mass_dispatch(
                order_id,
                MassDispatchRequest {
                    line_nos: vec![1, 2],
                    address_id: site,
                    date,
                    slot_id: None,
                    zone_id: None,
                    carrier_id: None,
                    allocations: vec![
                        MassAllocation {
                            stakeholder_id: a,
                            quantity: dec!(2),
                        },
                        MassAllocation {
                            stakeholder_id: b,
                            quantity: dec!(4),
                        },
                    ],
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Dispatch(DispatchError::Validation(_))));

        let order = sales.get(order_id).unwrap();
        assert_eq!(order.dispatches().count(), 0);
        assert_eq!(order.groups().count(), 0);
        let key = GroupKey {
            address_id: site,
            zone_id: Some(world.zone.id),
            date,
            slot_id: None,
            carrier_id: Some(world.truck.id),
        };
        assert_eq!(world.app.backends.groups.lookup(order_id, &key).unwrap(), None);
    }

    #[test]
    fn removing_the_last_dispatch_of_a_group_releases_it() {
        let world = World::new();
        let sales = &world.app.sales;
        let site = world.address(world.customer, "Siège", "75008");
        let date = in_days(10);
        let order_id = world.order(&[(world.fountain, dec!(3))], &[world.customer]);

        let order = sales
            .expand_line(order_id, 1, vec![request(world.customer, site, date, None, dec!(3))])
            .unwrap();
        let dispatch = order.dispatches().next().unwrap().clone();
        let key = dispatch.group_key();
        assert_eq!(
            world.app.backends.groups.lookup(order_id, &key).unwrap(),
            Some(dispatch.group_id)
        );

        let order = sales.remove_dispatch(order_id, dispatch.id).unwrap();
        assert_eq!(order.groups().count(), 0);
        assert_eq!(world.app.backends.groups.lookup(order_id, &key).unwrap(), None);
    }

    #[test]
    fn address_outside_every_zone_blocks_confirmation() {
        let world = World::new();
        let sales = &world.app.sales;
        let marseille = world.address(world.customer, "Marseille", "13001");
        let order_id = world.order(&[(world.fountain, dec!(2))], &[world.customer]);

        let order = sales
            .expand_line(
                order_id,
                1,
                vec![request(world.customer, marseille, in_days(10), None, dec!(2))],
            )
            .unwrap();
        let dispatch = order.dispatches().next().unwrap();
        assert_eq!(dispatch.zone_id, None);
        assert_eq!(dispatch.carrier_id, None);

        assert!(sales.confirm(order_id).is_err());
    }

    #[test]
    fn full_slot_rejects_further_dispatches() {
        let world = World::new();
        let sales = &world.app.sales;
        let site = world.address(world.customer, "Siège", "75008");
        let slot = world
            .app
            .delivery
            .create_slot(watergile_delivery::TimeSlotInput {
                name: "Midi".to_string(),
                sequence: None,
                start_hour: 12.0,
                end_hour: 14.0,
                max_deliveries: Some(1),
            })
            .unwrap();
        let date = in_days(10);
        let order_id = world.order(&[(world.fountain, dec!(2))], &[world.customer]);

        let err = sales
            .expand_line(
                order_id,
                1,
                vec![
                    request(world.customer, site, date, Some(slot.id), dec!(1)),
                    request(world.customer, site, date, Some(slot.id), dec!(1)),
                ],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Dispatch(DispatchError::InvariantViolation(_))
        ));
        assert_eq!(sales.get(order_id).unwrap().dispatches().count(), 0);
    }

    #[test]
    fn replaying_an_expansion_on_a_full_slot_keeps_its_dispatches() {
        let world = World::new();
        let sales = &world.app.sales;
        let site = world.address(world.customer, "Siège", "75008");
        let slot = world
            .app
            .delivery
            .create_slot(watergile_delivery::TimeSlotInput {
                name: "Midi".to_string(),
                sequence: None,
                start_hour: 12.0,
                end_hour: 14.0,
                max_deliveries: Some(2),
            })
            .unwrap();
        let date = in_days(10);
        let order_id = world.order(&[(world.fountain, dec!(2))], &[world.customer]);
        let split = || {
            vec![
                request(world.customer, site, date, Some(slot.id), dec!(1)),
                request(world.customer, site, date, Some(slot.id), dec!(1)),
            ]
        };

        let first = sales.expand_line(order_id, 1, split()).unwrap();
        let replayed = sales.expand_line(order_id, 1, split()).unwrap();
        assert_eq!(replayed.dispatches().count(), 2);
        assert_eq!(replayed.version(), first.version());

        let err = sales
            .expand_line(
                order_id,
                1,
                vec![request(world.customer, site, date, Some(slot.id), dec!(2))],
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Dispatch(DispatchError::Concurrency(_))));
    }

    struct Unavailable;

    impl RecordStore<DispatchId, DispatchReadModel> for Unavailable {
        fn get(&self, _key: &DispatchId) -> Result<Option<DispatchReadModel>, StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }

        fn upsert(&self, _key: DispatchId, _value: DispatchReadModel) -> Result<(), StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }

        fn remove(&self, _key: &DispatchId) -> Result<bool, StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }

        fn list(&self) -> Result<Vec<DispatchReadModel>, StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }

        fn clear(&self) -> Result<(), StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }
    }

    #[test]
    fn unreadable_dispatch_counts_refuse_the_dispatch() {
        let world = World::new();
        let site = world.address(world.customer, "Siège", "75008");
        let order_id = world.order(&[(world.fountain, dec!(2))], &[world.customer]);

        let addresses: SharedRecords<AddressId, PartnerAddress> =
            Arc::new(InMemoryRecordStore::new());
        addresses
            .upsert(site, world.app.addresses.get(site).unwrap())
            .unwrap();
        let offline: SharedRecords<DispatchId, DispatchReadModel> = Arc::new(Unavailable);
        let sales = SalesService::new(
            world.app.dispatcher.clone(),
            world.app.sales.orders().clone(),
            Arc::new(Checkpointed::new(
                DispatchesProjection::new(offline),
                world.app.backends.cursors.clone(),
            )),
            world.app.backends.groups.clone(),
            addresses,
            world.app.delivery.clone(),
            world.app.catalog.clone(),
        );

        let err = sales
            .expand_line(
                order_id,
                1,
                vec![request(world.customer, site, in_days(10), None, dec!(2))],
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Backend(_))));
        assert_eq!(world.app.sales.get(order_id).unwrap().dispatches().count(), 0);
    }

    #[test]
    fn orders_are_named_in_sequence() {
        let world = World::new();
        let first = world.order(&[], &[]);
        let second = world.order(&[], &[]);
        assert_eq!(world.app.sales.get(first).unwrap().name(), "S00001");
        assert_eq!(world.app.sales.get(second).unwrap().name(), "S00002");
    }
}
