//! Outgoing pickings of confirmed orders and the dispatch states they drive.
//!
//! A picking and its order are separate streams: the picking command is
//! committed first, then the matching dispatch transition is dispatched to
//! the order. When the second step fails the error is returned and logged;
//! replaying the picking operation is refused by the picking's own state,
//! so the dispatch transition has to be retried through the sales API.
//!
//! Order confirmation and cancellation go through this service so that
//! the pickings follow the order: confirming a dispatch-mode order opens
//! its pickings, cancelling an order cancels the pickings still open.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{error, info};

use watergile_core::DomainError;
use watergile_parties::{AddressId, PartnerAddress};
use watergile_products::ProductId;
use watergile_sales::{
    DeliveryMode, DispatchId, DispatchState, SaleOrder, SaleOrderId, SaleOrderStatus,
};
use watergile_stock::{
    AssignPicking, CancelPicking, ConfirmPicking, CreatePicking, DeliverySlip, MergeMoves,
    PickingCommand, PickingEvent, PickingId, PlannedPicking, StockPicking, ValidatePicking,
    ValorisedSlip, delivery_slip, plan_pickings, plan_standard_picking, valorised_slip,
};

use super::{CatalogService, Dispatcher, SalesService, ServiceResult, SharedRecords, not_found};
use crate::aggregate_types::PICKING;
use crate::command_dispatcher::DispatchError;
use crate::event_store::StoredEvent;

/// French standard VAT rate (20 %), used by valorised slips unless overridden.
pub const DEFAULT_TAX_RATE: Decimal = Decimal::from_parts(20, 0, 0, false, 2);

pub struct StockService {
    dispatcher: Arc<Dispatcher>,
    sales: Arc<SalesService>,
    catalog: Arc<CatalogService>,
    addresses: SharedRecords<AddressId, PartnerAddress>,
}

impl StockService {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        sales: Arc<SalesService>,
        catalog: Arc<CatalogService>,
        addresses: SharedRecords<AddressId, PartnerAddress>,
    ) -> Self {
        Self {
            dispatcher,
            sales,
            catalog,
            addresses,
        }
    }

    pub fn get(&self, picking_id: PickingId) -> ServiceResult<StockPicking> {
        let picking = self
            .dispatcher
            .load(picking_id.aggregate_id(), |id| StockPicking::empty(PickingId::new(id)))?;
        if !picking.is_created() {
            return Err(not_found());
        }
        Ok(picking)
    }

    pub fn list(&self) -> ServiceResult<Vec<StockPicking>> {
        let ids: BTreeSet<_> = self
            .dispatcher
            .store()
            .load_by_type(PICKING)
            .map_err(DispatchError::from)?
            .into_iter()
            .map(|e| e.aggregate_id)
            .collect();
        let mut pickings = ids
            .into_iter()
            .map(|id| self.get(PickingId::new(id)))
            .collect::<ServiceResult<Vec<_>>>()?;
        pickings.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(pickings)
    }

    pub fn for_order(&self, order_id: SaleOrderId) -> ServiceResult<Vec<StockPicking>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| p.order_id() == Some(order_id))
            .collect())
    }

    // Orders

    /// Confirm the order and, in dispatch mode, open its pickings.
    pub fn confirm_order(&self, order_id: SaleOrderId) -> ServiceResult<(SaleOrder, Vec<StockPicking>)> {
        let order = self.sales.confirm(order_id)?;
        if order.delivery_mode() != DeliveryMode::Dispatch {
            return Ok((order, vec![]));
        }
        match self.plan(order_id) {
            Ok(pickings) => Ok((order, pickings)),
            Err(err) => {
                error!(
                    %order_id,
                    error = %err,
                    "sale order confirmed but its pickings were not opened"
                );
                Err(err)
            }
        }
    }

    /// Cancel the order, then every picking of it not yet done.
    pub fn cancel_order(&self, order_id: SaleOrderId) -> ServiceResult<SaleOrder> {
        let order = self.sales.cancel(order_id)?;
        for picking in self.for_order(order_id)? {
            if picking.state().is_terminal() {
                continue;
            }
            let picking_id = picking.id_typed();
            if let Err(err) = self.cancel(picking_id) {
                error!(
                    %order_id,
                    %picking_id,
                    error = %err,
                    "sale order cancelled but its picking was not"
                );
                return Err(err);
            }
        }
        info!(%order_id, name = order.name(), "sale order cancelled");
        Ok(order)
    }

    // Pickings

    /// Open the pickings of a confirmed dispatch-mode order, one per
    /// dispatch group. Pickings already opened are kept as they are.
    pub fn plan(&self, order_id: SaleOrderId) -> ServiceResult<Vec<StockPicking>> {
        let order = self.sales.get(order_id)?;
        if order.delivery_mode() != DeliveryMode::Dispatch {
            return Err(DomainError::validation(
                "standard orders need a delivery address and date to be planned",
            )
            .into());
        }
        let mut addresses = BTreeMap::new();
        for group in order.groups() {
            let address_id = group.key.address_id;
            if let Some(address) = self.addresses.get(&address_id)? {
                addresses.insert(address_id, address);
            }
        }
        let pricelists = self.catalog.pricelists()?;
        let plans = plan_pickings(&order, &addresses, &pricelists)?;
        self.open(plans)
    }

    /// Open the single picking of a confirmed standard-mode order.
    pub fn plan_standard(
        &self,
        order_id: SaleOrderId,
        address_id: AddressId,
        scheduled_date: NaiveDate,
    ) -> ServiceResult<StockPicking> {
        let order = self.sales.get(order_id)?;
        let address = self
            .addresses
            .get(&address_id)?
            .ok_or_else(|| DomainError::validation(format!("address {address_id} is unknown")))?;
        let plan = plan_standard_picking(&order, &address, scheduled_date)?;
        self.open(vec![plan])?.into_iter().next().ok_or_else(not_found)
    }

    fn open(&self, plans: Vec<PlannedPicking>) -> ServiceResult<Vec<StockPicking>> {
        let mut pickings = Vec::with_capacity(plans.len());
        for plan in plans {
            let picking_id = plan.picking_id;
            if let Ok(existing) = self.get(picking_id) {
                pickings.push(existing);
                continue;
            }
            let name = plan.name.clone();
            self.execute(
                picking_id,
                PickingCommand::CreatePicking(CreatePicking {
                    plan,
                    occurred_at: Utc::now(),
                }),
            )?;
            info!(%picking_id, %name, "picking opened");
            pickings.push(self.get(picking_id)?);
        }
        Ok(pickings)
    }

    pub fn confirm(&self, picking_id: PickingId) -> ServiceResult<StockPicking> {
        self.execute(
            picking_id,
            PickingCommand::ConfirmPicking(ConfirmPicking {
                picking_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.get(picking_id)
    }

    /// Reserve the picking; its dispatches go in transit.
    pub fn assign(&self, picking_id: PickingId) -> ServiceResult<StockPicking> {
        self.ensure_order_open(&self.get(picking_id)?)?;
        let events = self.execute(
            picking_id,
            PickingCommand::AssignPicking(AssignPicking {
                picking_id,
                occurred_at: Utc::now(),
            }),
        )?;
        let picking = self.get(picking_id)?;
        let leaving = events
            .iter()
            .filter_map(|e| match e {
                PickingEvent::PickingAssigned(assigned) => Some(assigned.dispatch_ids.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        self.follow_up(&picking, leaving, |order_id, ids| self.sales.mark_in_transit(order_id, ids))?;
        Ok(picking)
    }

    /// Deliver the picking; its dispatches are done.
    pub fn validate(&self, picking_id: PickingId) -> ServiceResult<StockPicking> {
        let picking = self.get(picking_id)?;
        self.ensure_order_open(&picking)?;
        let in_transit = self.dispatches_in_state(&picking, |s| s == DispatchState::InTransit)?;
        let events = self.execute(
            picking_id,
            PickingCommand::ValidatePicking(ValidatePicking {
                picking_id,
                in_transit,
                occurred_at: Utc::now(),
            }),
        )?;
        let picking = self.get(picking_id)?;
        let delivered = events
            .iter()
            .filter_map(|e| match e {
                PickingEvent::PickingValidated(validated) => Some(validated.dispatch_ids.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        self.follow_up(&picking, delivered, |order_id, ids| self.sales.mark_done(order_id, ids))?;
        Ok(picking)
    }

    /// Cancel the picking. Its dispatches are detached from it and its
    /// moves, and cancelled on the order unless already terminal.
    pub fn cancel(&self, picking_id: PickingId) -> ServiceResult<StockPicking> {
        let events = self.execute(
            picking_id,
            PickingCommand::CancelPicking(CancelPicking {
                picking_id,
                occurred_at: Utc::now(),
            }),
        )?;
        let picking = self.get(picking_id)?;
        let detached: BTreeSet<DispatchId> = events
            .iter()
            .filter_map(|e| match e {
                PickingEvent::PickingCancelled(cancelled) => {
                    Some(cancelled.detached_dispatch_ids.clone())
                }
                _ => None,
            })
            .flatten()
            .collect();

        let Some(order_id) = picking.order_id() else {
            return Ok(picking);
        };
        let order = self.sales.get(order_id)?;
        let to_cancel = detached
            .into_iter()
            .filter(|id| order.dispatch(*id).is_some_and(|d| !d.state.is_terminal()))
            .collect();
        self.follow_up(&picking, to_cancel, |order_id, ids| {
            self.sales.cancel_dispatches(order_id, ids)
        })?;
        Ok(picking)
    }

    pub fn merge_moves(&self, picking_id: PickingId) -> ServiceResult<StockPicking> {
        self.execute(
            picking_id,
            PickingCommand::MergeMoves(MergeMoves {
                picking_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.get(picking_id)
    }

    pub fn slip(&self, picking_id: PickingId) -> ServiceResult<DeliverySlip> {
        let picking = self.get(picking_id)?;
        Ok(delivery_slip(&picking, &self.product_names()?)?)
    }

    /// `tax_rate` defaults to [`DEFAULT_TAX_RATE`].
    pub fn valorised_slip(
        &self,
        picking_id: PickingId,
        tax_rate: Option<Decimal>,
    ) -> ServiceResult<ValorisedSlip> {
        let picking = self.get(picking_id)?;
        let tax_rate = tax_rate.unwrap_or(DEFAULT_TAX_RATE);
        Ok(valorised_slip(&picking, &self.product_names()?, tax_rate)?)
    }

    fn product_names(&self) -> ServiceResult<BTreeMap<ProductId, String>> {
        Ok(self
            .catalog
            .products()?
            .into_iter()
            .map(|p| (p.id_typed(), p.name().to_string()))
            .collect())
    }

    fn execute(&self, picking_id: PickingId, command: PickingCommand) -> ServiceResult<Vec<PickingEvent>> {
        let committed = self
            .dispatcher
            .dispatch(picking_id.aggregate_id(), PICKING, command, |id| {
                StockPicking::empty(PickingId::new(id))
            })?;
        decode(&committed)
    }

    fn ensure_order_open(&self, picking: &StockPicking) -> ServiceResult<()> {
        let Some(order_id) = picking.order_id() else {
            return Ok(());
        };
        let order = self.sales.get(order_id)?;
        if order.status() == SaleOrderStatus::Cancelled {
            return Err(DomainError::invariant(format!(
                "order {} is cancelled; its pickings cannot move on",
                order.name()
            ))
            .into());
        }
        Ok(())
    }

    /// Picking dispatches whose state on the order satisfies `filter`.
    fn dispatches_in_state(
        &self,
        picking: &StockPicking,
        filter: impl Fn(DispatchState) -> bool,
    ) -> ServiceResult<Vec<DispatchId>> {
        let Some(order_id) = picking.order_id() else {
            return Ok(vec![]);
        };
        let order = self.sales.get(order_id)?;
        Ok(picking
            .dispatch_ids()
            .into_iter()
            .filter(|id| order.dispatch(*id).is_some_and(|d| filter(d.state)))
            .collect())
    }

    fn follow_up(
        &self,
        picking: &StockPicking,
        dispatch_ids: Vec<DispatchId>,
        transition: impl FnOnce(SaleOrderId, Vec<DispatchId>) -> ServiceResult<SaleOrder>,
    ) -> ServiceResult<()> {
        let Some(order_id) = picking.order_id() else {
            return Ok(());
        };
        if dispatch_ids.is_empty() {
            return Ok(());
        }
        if let Err(err) = transition(order_id, dispatch_ids) {
            error!(
                picking_id = %picking.id_typed(),
                %order_id,
                error = %err,
                "picking committed but its dispatches were not updated"
            );
            return Err(err);
        }
        Ok(())
    }
}

fn decode(committed: &[StoredEvent]) -> ServiceResult<Vec<PickingEvent>> {
    committed
        .iter()
        .map(|stored| {
            serde_json::from_value(stored.payload.clone())
                .map_err(|e| DispatchError::Deserialize(e.to_string()).into())
        })
        .collect()
}
