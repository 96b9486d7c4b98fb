use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use watergile_core::AggregateId;
use watergile_parties::PartnerId;
use watergile_products::ProductId;
use watergile_sales::{DeliveryMode, DispatchId, DispatchState, SaleOrderEvent, SaleOrderId, SaleOrderStatus};

use super::{ProjectionFailure, ReadModel, decode};
use crate::read_model::{RecordStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleOrderLineReadModel {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

/// Quantity a dispatch contributes to its line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchShare {
    pub line_no: u32,
    pub quantity: Decimal,
    pub active: bool,
}

/// Order list row: header, lines, totals and dispatch completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleOrderReadModel {
    pub order_id: SaleOrderId,
    pub name: String,
    pub customer_id: PartnerId,
    pub status: SaleOrderStatus,
    pub delivery_mode: DeliveryMode,
    pub lines: Vec<SaleOrderLineReadModel>,
    pub shares: BTreeMap<DispatchId, DispatchShare>,
}

impl SaleOrderReadModel {
    pub fn amount_untaxed(&self) -> Decimal {
        self.lines.iter().map(|l| l.quantity * l.unit_price).sum()
    }

    pub fn dispatched_qty(&self, line_no: u32) -> Decimal {
        self.shares
            .values()
            .filter(|s| s.active && s.line_no == line_no)
            .map(|s| s.quantity)
            .sum()
    }

    /// Same ratio as `SaleOrder::dispatch_completion`.
    pub fn dispatch_completion(&self) -> Decimal {
        let ordered: Decimal = self.lines.iter().map(|l| l.quantity).sum();
        if ordered.is_zero() {
            return Decimal::ZERO;
        }
        let dispatched: Decimal = self
            .lines
            .iter()
            .map(|l| self.dispatched_qty(l.line_no).min(l.quantity))
            .sum();
        dispatched / ordered
    }
}

/// Sale order list projection.
#[derive(Debug)]
pub struct SalesOrdersProjection<S>
where
    S: RecordStore<SaleOrderId, SaleOrderReadModel>,
{
    store: S,
}

impl<S> SalesOrdersProjection<S>
where
    S: RecordStore<SaleOrderId, SaleOrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn get(&self, order_id: &SaleOrderId) -> Result<Option<SaleOrderReadModel>, StoreError> {
        self.store.get(order_id)
    }

    pub fn list(&self) -> Result<Vec<SaleOrderReadModel>, StoreError> {
        self.store.list()
    }

    fn update(
        &self,
        order_id: SaleOrderId,
        f: impl FnOnce(&mut SaleOrderReadModel),
    ) -> Result<(), ProjectionFailure> {
        // Events of an order never projected (created before the cursors
        // were cleared without a rebuild) are dropped.
        if let Some(mut rm) = self.store.get(&order_id)? {
            f(&mut rm);
            self.store.upsert(order_id, rm)?;
        }
        Ok(())
    }
}

impl<S> ReadModel for SalesOrdersProjection<S>
where
    S: RecordStore<SaleOrderId, SaleOrderReadModel>,
{
    fn name(&self) -> &'static str {
        "sales.orders"
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
            SaleOrderEvent::SaleOrderCreated(e) => {
                self.store.upsert(
                    e.order_id,
                    SaleOrderReadModel {
                        order_id: e.order_id,
                        name: e.name,
                        customer_id: e.customer_id,
                        status: SaleOrderStatus::Draft,
                        delivery_mode: e.delivery_mode,
                        lines: vec![],
                        shares: BTreeMap::new(),
                    },
                )?;
            }
            SaleOrderEvent::DeliveryModeChanged(e) => {
                self.update(e.order_id, |rm| rm.delivery_mode = e.delivery_mode)?;
            }
            SaleOrderEvent::LineAdded(e) => {
                self.update(e.order_id, |rm| {
                    rm.lines.push(SaleOrderLineReadModel {
                        line_no: e.line_no,
                        product_id: e.product_id,
                        quantity: e.quantity,
                        unit_price: e.unit_price,
                    })
                })?;
            }
            SaleOrderEvent::LineUpdated(e) => {
                self.update(e.order_id, |rm| {
                    if let Some(line) = rm.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                        line.quantity = e.quantity;
                        line.unit_price = e.unit_price;
                    }
                })?;
            }
            SaleOrderEvent::DispatchCreated(e) => {
                self.update(e.order_id, |rm| {
                    rm.shares.insert(
                        e.dispatch.id,
                        DispatchShare {
                            line_no: e.dispatch.line_no,
                            quantity: e.dispatch.quantity,
                            active: e.dispatch.is_active(),
                        },
                    );
                })?;
            }
            SaleOrderEvent::DispatchUpdated(e) => {
                self.update(e.order_id, |rm| {
                    if let Some(share) = rm.shares.get_mut(&e.dispatch_id) {
                        share.quantity = e.quantity;
                    }
                })?;
            }
            SaleOrderEvent::DispatchRemoved(e) => {
                self.update(e.order_id, |rm| {
                    rm.shares.remove(&e.dispatch_id);
                })?;
            }
            SaleOrderEvent::DispatchStateChanged(e) => {
                self.update(e.order_id, |rm| {
                    for id in &e.dispatch_ids {
                        if let Some(share) = rm.shares.get_mut(id) {
                            share.active = e.state != DispatchState::Cancelled;
                        }
                    }
                })?;
            }
            SaleOrderEvent::OrderConfirmed(e) => {
                self.update(e.order_id, |rm| rm.status = SaleOrderStatus::Confirmed)?;
            }
            SaleOrderEvent::OrderCancelled(e) => {
                self.update(e.order_id, |rm| rm.status = SaleOrderStatus::Cancelled)?;
            }
            SaleOrderEvent::StakeholderAdded(_)
            | SaleOrderEvent::StakeholderRemoved(_)
            | SaleOrderEvent::DispatchGroupCreated(_)
            | SaleOrderEvent::DispatchGroupRemoved(_) => {}
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::StoredEvent;
    use crate::projections::{Checkpointed, InMemoryCursorStore};
    use crate::read_model::InMemoryRecordStore;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;
    use watergile_events::{Event, EventEnvelope};
    use watergile_parties::AddressId;
    use watergile_sales::{
        Dispatch, DispatchCreated, DispatchGroupId, DispatchStateChanged, LineAdded,
        SaleOrderCreated,
    };

    fn envelope(order: SaleOrderId, seq: u64, ev: SaleOrderEvent) -> EventEnvelope<JsonValue> {
        StoredEvent {
            event_id: Uuid::now_v7(),
            aggregate_id: order.aggregate_id(),
            aggregate_type: crate::aggregate_types::SALE_ORDER.to_string(),
            sequence_number: seq,
            event_type: ev.event_type().to_string(),
            event_version: 1,
            occurred_at: ev.occurred_at(),
            payload: serde_json::to_value(&ev).unwrap(),
        }
        .to_envelope()
    }

    fn history(order: SaleOrderId) -> Vec<EventEnvelope<JsonValue>> {
        let at = Utc.with_ymd_and_hms(2024, 5, 20, 9, 0, 0).unwrap();
        let dispatch_id = DispatchId::generate();
        vec![
            envelope(
                order,
                1,
                SaleOrderEvent::SaleOrderCreated(SaleOrderCreated {
                    order_id: order,
                    name: "S00042".to_string(),
                    customer_id: PartnerId::generate(),
                    delivery_mode: DeliveryMode::Dispatch,
                    occurred_at: at,
                }),
            ),
            envelope(
                order,
                2,
                SaleOrderEvent::LineAdded(LineAdded {
                    order_id: order,
                    line_no: 1,
                    product_id: ProductId::generate(),
                    dispatchable: true,
                    product_zone_ids: Default::default(),
                    quantity: dec!(10),
                    unit_price: dec!(2.5),
                    occurred_at: at,
                }),
            ),
            envelope(
                order,
                3,
                SaleOrderEvent::DispatchCreated(DispatchCreated {
                    order_id: order,
                    dispatch: Dispatch {
                        id: dispatch_id,
                        name: "S00042-L1-A".to_string(),
                        line_no: 1,
                        product_id: ProductId::generate(),
                        stakeholder_id: PartnerId::generate(),
                        address_id: AddressId::generate(),
                        quantity: dec!(4),
                        date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                        slot_id: None,
                        zone_id: None,
                        carrier_id: None,
                        group_id: DispatchGroupId::generate(),
                        state: DispatchState::Draft,
                    },
                    occurred_at: at,
                }),
            ),
            envelope(
                order,
                4,
                SaleOrderEvent::DispatchStateChanged(DispatchStateChanged {
                    order_id: order,
                    dispatch_ids: vec![dispatch_id],
                    state: DispatchState::Cancelled,
                    occurred_at: at,
                }),
            ),
        ]
    }

    #[test]
    fn tracks_amount_and_completion() {
        let order = SaleOrderId::generate();
        let projection = Checkpointed::new(
            SalesOrdersProjection::new(InMemoryRecordStore::new()),
            InMemoryCursorStore::new(),
        );
        let envs = history(order);

        for env in &envs[..3] {
            projection.apply_envelope(env).unwrap();
        }
        let rm = projection.read_model().get(&order).unwrap().unwrap();
        assert_eq!(rm.amount_untaxed(), dec!(25));
        assert_eq!(rm.dispatch_completion(), dec!(0.4));

        projection.apply_envelope(&envs[3]).unwrap();
        let rm = projection.read_model().get(&order).unwrap().unwrap();
        assert_eq!(rm.dispatch_completion(), Decimal::ZERO);
    }

    #[test]
    fn redelivered_envelopes_are_ignored() {
        let order = SaleOrderId::generate();
        let projection = Checkpointed::new(
            SalesOrdersProjection::new(InMemoryRecordStore::new()),
            InMemoryCursorStore::new(),
        );
        let envs = history(order);

        for env in &envs[..3] {
            assert!(projection.apply_envelope(env).unwrap());
        }
        assert!(!projection.apply_envelope(&envs[1]).unwrap());

        let rm = projection.read_model().get(&order).unwrap().unwrap();
        assert_eq!(rm.lines.len(), 1);
    }

    #[test]
    fn gaps_in_a_stream_are_rejected() {
        let order = SaleOrderId::generate();
        let projection = Checkpointed::new(
            SalesOrdersProjection::new(InMemoryRecordStore::new()),
            InMemoryCursorStore::new(),
        );
        let envs = history(order);
        projection.apply_envelope(&envs[0]).unwrap();

        let err = projection.apply_envelope(&envs[2]).unwrap_err();
        assert!(matches!(
            err,
            ProjectionFailure::NonMonotonicSequence { last: 1, found: 3, .. }
        ));
    }
}
