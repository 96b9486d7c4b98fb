use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use watergile_core::AggregateId;
use watergile_delivery::{CarrierId, SlotId, ZoneId};
use watergile_parties::{AddressId, PartnerId};
use watergile_products::ProductId;
use watergile_sales::{
    Dispatch, DispatchGroupId, DispatchId, DispatchState, SaleOrderEvent, SaleOrderId,
};

use super::{ProjectionFailure, ReadModel, decode};
use crate::read_model::{RecordStore, StoreError};

/// Flat dispatch row across all orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReadModel {
    pub dispatch_id: DispatchId,
    pub order_id: SaleOrderId,
    pub name: String,
    pub line_no: u32,
    pub product_id: ProductId,
    pub stakeholder_id: PartnerId,
    pub address_id: AddressId,
    pub quantity: Decimal,
    pub date: NaiveDate,
    pub slot_id: Option<SlotId>,
    pub zone_id: Option<ZoneId>,
    pub carrier_id: Option<CarrierId>,
    pub group_id: DispatchGroupId,
    pub state: DispatchState,
}

impl DispatchReadModel {
    fn from_dispatch(order_id: SaleOrderId, d: &Dispatch) -> Self {
        Self {
            dispatch_id: d.id,
            order_id,
            name: d.name.clone(),
            line_no: d.line_no,
            product_id: d.product_id,
            stakeholder_id: d.stakeholder_id,
            address_id: d.address_id,
            quantity: d.quantity,
            date: d.date,
            slot_id: d.slot_id,
            zone_id: d.zone_id,
            carrier_id: d.carrier_id,
            group_id: d.group_id,
            state: d.state,
        }
    }

    /// Draft, confirmed or in transit.
    pub fn is_in_progress(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[derive(Debug)]
pub struct DispatchesProjection<S>
where
    S: RecordStore<DispatchId, DispatchReadModel>,
{
    store: S,
}

impl<S> DispatchesProjection<S>
where
    S: RecordStore<DispatchId, DispatchReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &DispatchId) -> Result<Option<DispatchReadModel>, StoreError> {
        self.store.get(id)
    }

    pub fn list(&self) -> Result<Vec<DispatchReadModel>, StoreError> {
        self.store.list()
    }

    pub fn for_order(&self, order_id: SaleOrderId) -> Result<Vec<DispatchReadModel>, StoreError> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|d| d.order_id == order_id)
            .collect())
    }

    /// Dispatches delivering to `address_id` (address deletion/archival checks).
    pub fn for_address(&self, address_id: AddressId) -> Result<Vec<DispatchReadModel>, StoreError> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|d| d.address_id == address_id)
            .collect())
    }
}

impl<S> ReadModel for DispatchesProjection<S>
where
    S: RecordStore<DispatchId, DispatchReadModel>,
{
    fn name(&self) -> &'static str {
        "sales.dispatches"
    }

    fn aggregate_type(&self) -> &'static str {
        crate::aggregate_types::SALE_ORDER
    }

    fn apply_event(
        &self,
        _aggregate_id: AggregateId,
        payload: &JsonValue,
    ) -> Result<(), ProjectionFailure> {
        match decode::<SaleOrderEvent>(payload)? {
            SaleOrderEvent::DispatchCreated(e) => {
                self.store.upsert(
                    e.dispatch.id,
                    DispatchReadModel::from_dispatch(e.order_id, &e.dispatch),
                )?;
            }
            SaleOrderEvent::DispatchUpdated(e) => {
                if let Some(mut rm) = self.store.get(&e.dispatch_id)? {
                    rm.address_id = e.address_id;
                    rm.quantity = e.quantity;
                    rm.date = e.date;
                    rm.slot_id = e.slot_id;
                    rm.zone_id = e.zone_id;
                    rm.carrier_id = e.carrier_id;
                    rm.group_id = e.group_id;
                    self.store.upsert(e.dispatch_id, rm)?;
                }
            }
            SaleOrderEvent::DispatchRemoved(e) => {
                self.store.remove(&e.dispatch_id)?;
            }
            SaleOrderEvent::DispatchStateChanged(e) => {
                for id in e.dispatch_ids {
                    if let Some(mut rm) = self.store.get(&id)? {
                        rm.state = e.state;
                        self.store.upsert(id, rm)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.store.clear()
    }
}
