use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use watergile_core::{Aggregate, AggregateRoot, DomainError};
use watergile_delivery::{CarrierId, SlotId, ZoneId};
use watergile_events::Event;
use watergile_parties::{AddressId, PartnerId};
use watergile_products::{Product, ProductId};

use crate::dispatch::{
    AddressRef, Dispatch, DispatchId, DispatchState, DispatchTarget, dispatch_name,
};
use crate::group::{DispatchGroup, DispatchGroupId, GroupKey, group_name};

watergile_core::domain_id!(
    /// Sale order identifier.
    SaleOrderId
);

/// Sale order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleOrderStatus {
    Draft,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Standard,
    Dispatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stakeholder {
    pub partner_id: PartnerId,
    pub name: String,
}

/// What an order line needs to know about its product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineProduct {
    pub product_id: ProductId,
    pub dispatchable: bool,
    /// Zones the product can be delivered to (empty = all).
    #[serde(default)]
    pub zone_ids: Vec<ZoneId>,
}

impl From<&Product> for LineProduct {
    fn from(product: &Product) -> Self {
        Self {
            product_id: product.id_typed(),
            dispatchable: product.is_dispatchable(),
            zone_ids: product.zone_ids().iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub dispatchable: bool,
    pub product_zone_ids: BTreeSet<ZoneId>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl OrderLine {
    pub fn subtotal(&self) -> Decimal {
        self.quantity * self.unit_price
    }

    fn deliverable_to(&self, zone: ZoneId) -> bool {
        self.product_zone_ids.is_empty() || self.product_zone_ids.contains(&zone)
    }
}

/// A (zone, carrier) pair known to be reachable when the order is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Route {
    pub zone_id: ZoneId,
    pub carrier_id: CarrierId,
}

/// Aggregate root: SaleOrder.
///
/// In dispatch mode, each line is split into dispatches and every dispatch
/// belongs to exactly one group of the order. Groups are created with their
/// first dispatch and removed with their last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleOrder {
    id: SaleOrderId,
    name: String,
    customer_id: Option<PartnerId>,
    delivery_mode: DeliveryMode,
    status: SaleOrderStatus,
    stakeholders: BTreeMap<PartnerId, Stakeholder>,
    lines: Vec<OrderLine>,
    dispatches: BTreeMap<DispatchId, Dispatch>,
    groups: BTreeMap<DispatchGroupId, DispatchGroup>,
    group_sequence: u32,
    version: u64,
    created: bool,
}

impl SaleOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SaleOrderId) -> Self {
        Self {
            id,
            name: String::new(),
            customer_id: None,
            delivery_mode: DeliveryMode::Standard,
            status: SaleOrderStatus::Draft,
            stakeholders: BTreeMap::new(),
            lines: Vec::new(),
            dispatches: BTreeMap::new(),
            groups: BTreeMap::new(),
            group_sequence: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SaleOrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn customer_id(&self) -> Option<PartnerId> {
        self.customer_id
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery_mode
    }

    pub fn status(&self) -> SaleOrderStatus {
        self.status
    }

    pub fn stakeholders(&self) -> impl Iterator<Item = &Stakeholder> {
        self.stakeholders.values()
    }

    pub fn is_stakeholder(&self, partner: PartnerId) -> bool {
        self.stakeholders.contains_key(&partner)
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&OrderLine> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    pub fn dispatches(&self) -> impl Iterator<Item = &Dispatch> {
        self.dispatches.values()
    }

    pub fn dispatch(&self, id: DispatchId) -> Option<&Dispatch> {
        self.dispatches.get(&id)
    }

    pub fn dispatches_for_line(&self, line_no: u32) -> impl Iterator<Item = &Dispatch> {
        self.dispatches.values().filter(move |d| d.line_no == line_no)
    }

    pub fn groups(&self) -> impl Iterator<Item = &DispatchGroup> {
        self.groups.values()
    }

    pub fn group(&self, id: DispatchGroupId) -> Option<&DispatchGroup> {
        self.groups.get(&id)
    }

    pub fn group_for_key(&self, key: &GroupKey) -> Option<DispatchGroupId> {
        self.groups.values().find(|g| g.key == *key).map(|g| g.id)
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, SaleOrderStatus::Draft)
    }

    /// Quantity of the line covered by non-cancelled dispatches.
    pub fn dispatched_qty(&self, line_no: u32) -> Decimal {
        self.dispatches_for_line(line_no)
            .filter(|d| d.is_active())
            .map(|d| d.quantity)
            .sum()
    }

    pub fn available_qty(&self, line_no: u32) -> Decimal {
        match self.line(line_no) {
            Some(line) => line.quantity - self.dispatched_qty(line_no),
            None => Decimal::ZERO,
        }
    }

    /// Share of the ordered quantity already dispatched, in `[0, 1]`.
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

    pub fn amount_untaxed(&self) -> Decimal {
        self.lines.iter().map(OrderLine::subtotal).sum()
    }
}

impl AggregateRoot for SaleOrder {
    type Id = SaleOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateSaleOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSaleOrder {
    pub order_id: SaleOrderId,
    pub name: String,
    pub customer_id: PartnerId,
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDeliveryMode {
    pub order_id: SaleOrderId,
    pub delivery_mode: DeliveryMode,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddStakeholder {
    pub order_id: SaleOrderId,
    pub partner_id: PartnerId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveStakeholder {
    pub order_id: SaleOrderId,
    pub partner_id: PartnerId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub order_id: SaleOrderId,
    pub product: LineProduct,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLine {
    pub order_id: SaleOrderId,
    pub line_no: u32,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpandLine. Splits a line into one dispatch per target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandLine {
    pub order_id: SaleOrderId,
    pub line_no: u32,
    pub targets: Vec<DispatchTarget>,
    pub business_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassAllocation {
    pub stakeholder_id: PartnerId,
    pub quantity: Decimal,
}

/// A selected line and the ids of the dispatches it will receive, aligned
/// with the command's allocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassDispatchLine {
    pub line_no: u32,
    pub dispatch_ids: Vec<DispatchId>,
}

/// Command: MassDispatch. One dispatch per (line, stakeholder) with a shared
/// destination; each line's allocations must cover its available quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassDispatch {
    pub order_id: SaleOrderId,
    pub lines: Vec<MassDispatchLine>,
    pub address: AddressRef,
    pub date: NaiveDate,
    pub slot_id: Option<SlotId>,
    pub zone_id: Option<ZoneId>,
    pub carrier_id: Option<CarrierId>,
    #[serde(default)]
    pub group_id: Option<DispatchGroupId>,
    pub allocations: Vec<MassAllocation>,
    pub business_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateDispatch. Moves a draft dispatch to a new destination or
/// quantity; the dispatch is regrouped accordingly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDispatch {
    pub order_id: SaleOrderId,
    pub dispatch_id: DispatchId,
    pub address: AddressRef,
    pub date: NaiveDate,
    pub slot_id: Option<SlotId>,
    pub zone_id: Option<ZoneId>,
    pub carrier_id: Option<CarrierId>,
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub group_id: Option<DispatchGroupId>,
    pub business_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveDispatch {
    pub order_id: SaleOrderId,
    pub dispatch_id: DispatchId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder.
///
/// `routes` lists the (zone, carrier) pairs currently reachable; every
/// dispatch must use one of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub order_id: SaleOrderId,
    #[serde(default)]
    pub routes: Vec<Route>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDispatchesInTransit {
    pub order_id: SaleOrderId,
    pub dispatch_ids: Vec<DispatchId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDispatchesDone {
    pub order_id: SaleOrderId,
    pub dispatch_ids: Vec<DispatchId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelDispatches {
    pub order_id: SaleOrderId,
    pub dispatch_ids: Vec<DispatchId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: SaleOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleOrderCommand {
    CreateSaleOrder(CreateSaleOrder),
    SetDeliveryMode(SetDeliveryMode),
    AddStakeholder(AddStakeholder),
    RemoveStakeholder(RemoveStakeholder),
    AddLine(AddLine),
    UpdateLine(UpdateLine),
    ExpandLine(ExpandLine),
    MassDispatch(MassDispatch),
    UpdateDispatch(UpdateDispatch),
    RemoveDispatch(RemoveDispatch),
    ConfirmOrder(ConfirmOrder),
    MarkDispatchesInTransit(MarkDispatchesInTransit),
    MarkDispatchesDone(MarkDispatchesDone),
    CancelDispatches(CancelDispatches),
    CancelOrder(CancelOrder),
}

/// Event: SaleOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleOrderCreated {
    pub order_id: SaleOrderId,
    pub name: String,
    pub customer_id: PartnerId,
    pub delivery_mode: DeliveryMode,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryModeChanged {
    pub order_id: SaleOrderId,
    pub delivery_mode: DeliveryMode,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeholderAdded {
    pub order_id: SaleOrderId,
    pub partner_id: PartnerId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeholderRemoved {
    pub order_id: SaleOrderId,
    pub partner_id: PartnerId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub order_id: SaleOrderId,
    pub line_no: u32,
    pub product_id: ProductId,
    pub dispatchable: bool,
    pub product_zone_ids: BTreeSet<ZoneId>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineUpdated {
    pub order_id: SaleOrderId,
    pub line_no: u32,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchGroupCreated {
    pub order_id: SaleOrderId,
    pub group_id: DispatchGroupId,
    pub name: String,
    pub sequence: u32,
    pub key: GroupKey,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchGroupRemoved {
    pub order_id: SaleOrderId,
    pub group_id: DispatchGroupId,
    pub key: GroupKey,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchCreated {
    pub order_id: SaleOrderId,
    pub dispatch: Dispatch,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchUpdated {
    pub order_id: SaleOrderId,
    pub dispatch_id: DispatchId,
    pub address_id: AddressId,
    pub quantity: Decimal,
    pub date: NaiveDate,
    pub slot_id: Option<SlotId>,
    pub zone_id: Option<ZoneId>,
    pub carrier_id: Option<CarrierId>,
    pub group_id: DispatchGroupId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRemoved {
    pub order_id: SaleOrderId,
    pub dispatch_id: DispatchId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStateChanged {
    pub order_id: SaleOrderId,
    pub dispatch_ids: Vec<DispatchId>,
    pub state: DispatchState,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub order_id: SaleOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: SaleOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleOrderEvent {
    SaleOrderCreated(SaleOrderCreated),
    DeliveryModeChanged(DeliveryModeChanged),
    StakeholderAdded(StakeholderAdded),
    StakeholderRemoved(StakeholderRemoved),
    LineAdded(LineAdded),
    LineUpdated(LineUpdated),
    DispatchGroupCreated(DispatchGroupCreated),
    DispatchGroupRemoved(DispatchGroupRemoved),
    DispatchCreated(DispatchCreated),
    DispatchUpdated(DispatchUpdated),
    DispatchRemoved(DispatchRemoved),
    DispatchStateChanged(DispatchStateChanged),
    OrderConfirmed(OrderConfirmed),
    OrderCancelled(OrderCancelled),
}

impl Event for SaleOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SaleOrderEvent::SaleOrderCreated(_) => "sales.order.created",
            SaleOrderEvent::DeliveryModeChanged(_) => "sales.order.delivery_mode_changed",
            SaleOrderEvent::StakeholderAdded(_) => "sales.order.stakeholder_added",
            SaleOrderEvent::StakeholderRemoved(_) => "sales.order.stakeholder_removed",
            SaleOrderEvent::LineAdded(_) => "sales.order.line_added",
            SaleOrderEvent::LineUpdated(_) => "sales.order.line_updated",
            SaleOrderEvent::DispatchGroupCreated(_) => "sales.order.group_created",
            SaleOrderEvent::DispatchGroupRemoved(_) => "sales.order.group_removed",
            SaleOrderEvent::DispatchCreated(_) => "sales.order.dispatch_created",
            SaleOrderEvent::DispatchUpdated(_) => "sales.order.dispatch_updated",
            SaleOrderEvent::DispatchRemoved(_) => "sales.order.dispatch_removed",
            SaleOrderEvent::DispatchStateChanged(_) => "sales.order.dispatch_state_changed",
            SaleOrderEvent::OrderConfirmed(_) => "sales.order.confirmed",
            SaleOrderEvent::OrderCancelled(_) => "sales.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SaleOrderEvent::SaleOrderCreated(e) => e.occurred_at,
            SaleOrderEvent::DeliveryModeChanged(e) => e.occurred_at,
            SaleOrderEvent::StakeholderAdded(e) => e.occurred_at,
            SaleOrderEvent::StakeholderRemoved(e) => e.occurred_at,
            SaleOrderEvent::LineAdded(e) => e.occurred_at,
            SaleOrderEvent::LineUpdated(e) => e.occurred_at,
            SaleOrderEvent::DispatchGroupCreated(e) => e.occurred_at,
            SaleOrderEvent::DispatchGroupRemoved(e) => e.occurred_at,
            SaleOrderEvent::DispatchCreated(e) => e.occurred_at,
            SaleOrderEvent::DispatchUpdated(e) => e.occurred_at,
            SaleOrderEvent::DispatchRemoved(e) => e.occurred_at,
            SaleOrderEvent::DispatchStateChanged(e) => e.occurred_at,
            SaleOrderEvent::OrderConfirmed(e) => e.occurred_at,
            SaleOrderEvent::OrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SaleOrder {
    type Command = SaleOrderCommand;
    type Event = SaleOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SaleOrderEvent::SaleOrderCreated(e) => {
                self.id = e.order_id;
                self.name = e.name.clone();
                self.customer_id = Some(e.customer_id);
                self.delivery_mode = e.delivery_mode;
                self.status = SaleOrderStatus::Draft;
                self.lines.clear();
                self.created = true;
            }
            SaleOrderEvent::DeliveryModeChanged(e) => {
                self.delivery_mode = e.delivery_mode;
            }
            SaleOrderEvent::StakeholderAdded(e) => {
                self.stakeholders.insert(
                    e.partner_id,
                    Stakeholder {
                        partner_id: e.partner_id,
                        name: e.name.clone(),
                    },
                );
            }
            SaleOrderEvent::StakeholderRemoved(e) => {
                self.stakeholders.remove(&e.partner_id);
            }
            SaleOrderEvent::LineAdded(e) => {
                self.lines.push(OrderLine {
                    line_no: e.line_no,
                    product_id: e.product_id,
                    dispatchable: e.dispatchable,
                    product_zone_ids: e.product_zone_ids.clone(),
                    quantity: e.quantity,
                    unit_price: e.unit_price,
                });
            }
            SaleOrderEvent::LineUpdated(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    line.quantity = e.quantity;
                    line.unit_price = e.unit_price;
                }
            }
            SaleOrderEvent::DispatchGroupCreated(e) => {
                self.group_sequence = self.group_sequence.max(e.sequence);
                self.groups.insert(
                    e.group_id,
                    DispatchGroup {
                        id: e.group_id,
                        name: e.name.clone(),
                        sequence: e.sequence,
                        key: e.key,
                        dispatch_ids: BTreeSet::new(),
                    },
                );
            }
            SaleOrderEvent::DispatchGroupRemoved(e) => {
                self.groups.remove(&e.group_id);
            }
            SaleOrderEvent::DispatchCreated(e) => {
                if let Some(group) = self.groups.get_mut(&e.dispatch.group_id) {
                    group.dispatch_ids.insert(e.dispatch.id);
                }
                self.dispatches.insert(e.dispatch.id, e.dispatch.clone());
            }
            SaleOrderEvent::DispatchUpdated(e) => {
                if let Some(dispatch) = self.dispatches.get_mut(&e.dispatch_id) {
                    if let Some(old) = self.groups.get_mut(&dispatch.group_id) {
                        old.dispatch_ids.remove(&e.dispatch_id);
                    }
                    dispatch.address_id = e.address_id;
                    dispatch.quantity = e.quantity;
                    dispatch.date = e.date;
                    dispatch.slot_id = e.slot_id;
                    dispatch.zone_id = e.zone_id;
                    dispatch.carrier_id = e.carrier_id;
                    dispatch.group_id = e.group_id;
                    if let Some(new) = self.groups.get_mut(&e.group_id) {
                        new.dispatch_ids.insert(e.dispatch_id);
                    }
                }
            }
            SaleOrderEvent::DispatchRemoved(e) => {
                if let Some(dispatch) = self.dispatches.remove(&e.dispatch_id) {
                    if let Some(group) = self.groups.get_mut(&dispatch.group_id) {
                        group.dispatch_ids.remove(&e.dispatch_id);
                    }
                }
            }
            SaleOrderEvent::DispatchStateChanged(e) => {
                for id in &e.dispatch_ids {
                    if let Some(dispatch) = self.dispatches.get_mut(id) {
                        dispatch.state = e.state;
                    }
                }
            }
            SaleOrderEvent::OrderConfirmed(_) => {
                self.status = SaleOrderStatus::Confirmed;
            }
            SaleOrderEvent::OrderCancelled(_) => {
                self.status = SaleOrderStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SaleOrderCommand::CreateSaleOrder(cmd) => self.handle_create(cmd),
            SaleOrderCommand::SetDeliveryMode(cmd) => self.handle_set_delivery_mode(cmd),
            SaleOrderCommand::AddStakeholder(cmd) => self.handle_add_stakeholder(cmd),
            SaleOrderCommand::RemoveStakeholder(cmd) => self.handle_remove_stakeholder(cmd),
            SaleOrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            SaleOrderCommand::UpdateLine(cmd) => self.handle_update_line(cmd),
            SaleOrderCommand::ExpandLine(cmd) => self.handle_expand_line(cmd),
            SaleOrderCommand::MassDispatch(cmd) => self.handle_mass_dispatch(cmd),
            SaleOrderCommand::UpdateDispatch(cmd) => self.handle_update_dispatch(cmd),
            SaleOrderCommand::RemoveDispatch(cmd) => self.handle_remove_dispatch(cmd),
            SaleOrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            SaleOrderCommand::MarkDispatchesInTransit(cmd) => self.handle_transition(
                cmd.order_id,
                &cmd.dispatch_ids,
                DispatchState::InTransit,
                cmd.occurred_at,
            ),
            SaleOrderCommand::MarkDispatchesDone(cmd) => self.handle_transition(
                cmd.order_id,
                &cmd.dispatch_ids,
                DispatchState::Done,
                cmd.occurred_at,
            ),
            SaleOrderCommand::CancelDispatches(cmd) => self.handle_transition(
                cmd.order_id,
                &cmd.dispatch_ids,
                DispatchState::Cancelled,
                cmd.occurred_at,
            ),
            SaleOrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

/// Events produced so far by one command, applied to a scratch copy so later
/// steps see earlier ones (a group opened by the first target is reused by
/// the second).
struct Pending {
    state: SaleOrder,
    events: Vec<SaleOrderEvent>,
}

impl Pending {
    fn new(order: &SaleOrder) -> Self {
        Self {
            state: order.clone(),
            events: Vec::new(),
        }
    }

    fn push(&mut self, event: SaleOrderEvent) {
        self.state.apply(&event);
        self.events.push(event);
    }

    /// Group for `key`: the order's existing one, else a new group.
    fn assign_group(
        &mut self,
        key: GroupKey,
        address_name: &str,
        requested: Option<DispatchGroupId>,
        seed: DispatchId,
        occurred_at: DateTime<Utc>,
    ) -> Result<DispatchGroupId, DomainError> {
        if let Some(existing) = self.state.group_for_key(&key) {
            if let Some(requested) = requested {
                if requested != existing {
                    return Err(DomainError::conflict(format!(
                        "group {requested} does not match the order's group {existing} for this destination"
                    )));
                }
            }
            return Ok(existing);
        }

        let sequence = self.state.group_sequence + 1;
        let group_id = requested.unwrap_or_else(|| {
            DispatchGroupId::new(seed.aggregate_id().derive(u64::from(sequence)))
        });
        if self.state.groups.contains_key(&group_id) {
            return Err(DomainError::conflict(format!(
                "group {group_id} already serves another destination"
            )));
        }
        let order_id = self.state.id;
        let name = group_name(&self.state.name, address_name, key.date, sequence);
        self.push(SaleOrderEvent::DispatchGroupCreated(DispatchGroupCreated {
            order_id,
            group_id,
            name,
            sequence,
            key,
            occurred_at,
        }));
        Ok(group_id)
    }

    fn release_group(&mut self, group_id: DispatchGroupId, occurred_at: DateTime<Utc>) {
        let order_id = self.state.id;
        if let Some(group) = self.state.groups.get(&group_id) {
            if group.is_empty() {
                let key = group.key;
                self.push(SaleOrderEvent::DispatchGroupRemoved(DispatchGroupRemoved {
                    order_id,
                    group_id,
                    key,
                    occurred_at,
                }));
            }
        }
    }

    fn create_dispatch(
        &mut self,
        line: &OrderLine,
        target: &DispatchTarget,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let group_id = self.assign_group(
            target.group_key(),
            &target.address.name,
            target.group_id,
            target.dispatch_id,
            occurred_at,
        )?;
        let stakeholder_name = self
            .state
            .stakeholders
            .get(&target.stakeholder_id)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let order_id = self.state.id;
        let dispatch = Dispatch {
            id: target.dispatch_id,
            name: dispatch_name(&self.state.name, line.line_no, &stakeholder_name),
            line_no: line.line_no,
            product_id: line.product_id,
            stakeholder_id: target.stakeholder_id,
            address_id: target.address.address_id,
            quantity: target.quantity,
            date: target.date,
            slot_id: target.slot_id,
            zone_id: target.zone_id,
            carrier_id: target.carrier_id,
            group_id,
            state: DispatchState::Draft,
        };
        self.push(SaleOrderEvent::DispatchCreated(DispatchCreated {
            order_id,
            dispatch,
            occurred_at,
        }));
        Ok(())
    }

    fn finish(self) -> Vec<SaleOrderEvent> {
        self.events
    }
}

/// Identity-free view of a dispatch, used to recognise a replayed expansion.
type PartitionEntry = (
    PartnerId,
    AddressId,
    NaiveDate,
    Option<SlotId>,
    Option<ZoneId>,
    Option<CarrierId>,
    Decimal,
);

fn partition_of(entries: impl Iterator<Item = PartitionEntry>) -> Vec<PartitionEntry> {
    let mut entries: Vec<_> = entries.collect();
    entries.sort();
    entries
}

impl SaleOrder {
    fn ensure_order_id(&self, order_id: SaleOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, order_id: SaleOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(order_id)
    }

    fn ensure_draft(&self) -> Result<(), DomainError> {
        if !self.is_modifiable() {
            return Err(DomainError::invariant(
                "cannot modify order once it is confirmed or cancelled",
            ));
        }
        Ok(())
    }

    fn ensure_dispatch_mode(&self) -> Result<(), DomainError> {
        if self.delivery_mode != DeliveryMode::Dispatch {
            return Err(DomainError::invariant("order is not in dispatch delivery mode"));
        }
        Ok(())
    }

    fn find_line(&self, line_no: u32) -> Result<&OrderLine, DomainError> {
        self.line(line_no)
            .ok_or_else(|| DomainError::validation(format!("order has no line {line_no}")))
    }

    fn ensure_dispatchable(line: &OrderLine) -> Result<(), DomainError> {
        if !line.dispatchable {
            return Err(DomainError::validation(format!(
                "product of line {} is not dispatchable",
                line.line_no
            )));
        }
        Ok(())
    }

    /// Stakeholder membership, address ownership, quantity and date checks
    /// shared by every way of creating or moving a dispatch.
    fn check_destination(
        &self,
        stakeholder_id: PartnerId,
        address: &AddressRef,
        quantity: Decimal,
        date: NaiveDate,
        business_date: NaiveDate,
    ) -> Result<(), DomainError> {
        if !self.is_stakeholder(stakeholder_id) {
            return Err(DomainError::validation(format!(
                "partner {stakeholder_id} is not a stakeholder of this order"
            )));
        }
        let owned_by_customer = self.customer_id.is_some_and(|c| address.owned_by(c));
        if !address.owned_by(stakeholder_id) && !owned_by_customer {
            return Err(DomainError::validation(format!(
                "address '{}' belongs neither to the stakeholder nor to the customer",
                address.name
            )));
        }
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("dispatch quantity must be positive"));
        }
        if date < business_date {
            return Err(DomainError::validation(format!(
                "dispatch date {date} is in the past"
            )));
        }
        Ok(())
    }

    fn ensure_new_dispatch_ids<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a DispatchId>,
    ) -> Result<(), DomainError> {
        let mut seen = BTreeSet::new();
        for id in ids {
            if self.dispatches.contains_key(id) || !seen.insert(*id) {
                return Err(DomainError::conflict(format!("dispatch {id} already exists")));
            }
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateSaleOrder) -> Result<Vec<SaleOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sale order already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("order name cannot be empty"));
        }

        Ok(vec![SaleOrderEvent::SaleOrderCreated(SaleOrderCreated {
            order_id: cmd.order_id,
            name: cmd.name.trim().to_string(),
            customer_id: cmd.customer_id,
            delivery_mode: cmd.delivery_mode,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_delivery_mode(
        &self,
        cmd: &SetDeliveryMode,
    ) -> Result<Vec<SaleOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_draft()?;

        if cmd.delivery_mode == self.delivery_mode {
            return Ok(vec![]);
        }
        if cmd.delivery_mode == DeliveryMode::Standard && !self.dispatches.is_empty() {
            return Err(DomainError::invariant(
                "remove the order's dispatches before leaving dispatch mode",
            ));
        }

        Ok(vec![SaleOrderEvent::DeliveryModeChanged(DeliveryModeChanged {
            order_id: cmd.order_id,
            delivery_mode: cmd.delivery_mode,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_stakeholder(
        &self,
        cmd: &AddStakeholder,
    ) -> Result<Vec<SaleOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_draft()?;

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("stakeholder name cannot be empty"));
        }
        if self.is_stakeholder(cmd.partner_id) {
            return Ok(vec![]);
        }

        Ok(vec![SaleOrderEvent::StakeholderAdded(StakeholderAdded {
            order_id: cmd.order_id,
            partner_id: cmd.partner_id,
            name: cmd.name.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_stakeholder(
        &self,
        cmd: &RemoveStakeholder,
    ) -> Result<Vec<SaleOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_draft()?;

        if !self.is_stakeholder(cmd.partner_id) {
            return Err(DomainError::not_found());
        }
        if self
            .dispatches
            .values()
            .any(|d| d.stakeholder_id == cmd.partner_id)
        {
            return Err(DomainError::invariant(
                "stakeholder still receives dispatches on this order",
            ));
        }

        Ok(vec![SaleOrderEvent::StakeholderRemoved(StakeholderRemoved {
            order_id: cmd.order_id,
            partner_id: cmd.partner_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<SaleOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_draft()?;

        if cmd.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.unit_price < Decimal::ZERO {
            return Err(DomainError::validation("unit_price cannot be negative"));
        }

        let next_line_no = self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;

        Ok(vec![SaleOrderEvent::LineAdded(LineAdded {
            order_id: cmd.order_id,
            line_no: next_line_no,
            product_id: cmd.product.product_id,
            dispatchable: cmd.product.dispatchable,
            product_zone_ids: cmd.product.zone_ids.iter().copied().collect(),
            quantity: cmd.quantity,
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_line(&self, cmd: &UpdateLine) -> Result<Vec<SaleOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_draft()?;
        self.find_line(cmd.line_no)?;

        if cmd.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.unit_price < Decimal::ZERO {
            return Err(DomainError::validation("unit_price cannot be negative"));
        }

        Ok(vec![SaleOrderEvent::LineUpdated(LineUpdated {
            order_id: cmd.order_id,
            line_no: cmd.line_no,
            quantity: cmd.quantity,
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expand_line(&self, cmd: &ExpandLine) -> Result<Vec<SaleOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_draft()?;
        self.ensure_dispatch_mode()?;
        let line = self.find_line(cmd.line_no)?;
        Self::ensure_dispatchable(line)?;

        if cmd.targets.is_empty() {
            return Err(DomainError::validation("expansion needs at least one target"));
        }
        let total: Decimal = cmd.targets.iter().map(|t| t.quantity).sum();
        if total != line.quantity {
            return Err(DomainError::validation(format!(
                "dispatched quantities ({total}) do not match line {} quantity ({})",
                line.line_no, line.quantity
            )));
        }
        for target in &cmd.targets {
            self.check_destination(
                target.stakeholder_id,
                &target.address,
                target.quantity,
                target.date,
                cmd.business_date,
            )?;
        }

        let existing: Vec<&Dispatch> = self
            .dispatches_for_line(line.line_no)
            .filter(|d| d.is_active())
            .collect();
        if !existing.is_empty() {
            let current = partition_of(existing.iter().map(|d| {
                (
                    d.stakeholder_id,
                    d.address_id,
                    d.date,
                    d.slot_id,
                    d.zone_id,
                    d.carrier_id,
                    d.quantity.normalize(),
                )
            }));
            let requested = partition_of(cmd.targets.iter().map(|t| {
                (
                    t.stakeholder_id,
                    t.address.address_id,
                    t.date,
                    t.slot_id,
                    t.zone_id,
                    t.carrier_id,
                    t.quantity.normalize(),
                )
            }));
            if current == requested {
                return Ok(vec![]);
            }
            return Err(DomainError::conflict(format!(
                "line {} is already dispatched; remove its dispatches first",
                line.line_no
            )));
        }

        self.ensure_new_dispatch_ids(cmd.targets.iter().map(|t| &t.dispatch_id))?;

        let mut pending = Pending::new(self);
        for target in &cmd.targets {
            pending.create_dispatch(line, target, cmd.occurred_at)?;
        }
        Ok(pending.finish())
    }

    fn handle_mass_dispatch(&self, cmd: &MassDispatch) -> Result<Vec<SaleOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_draft()?;
        self.ensure_dispatch_mode()?;

        if cmd.lines.is_empty() {
            return Err(DomainError::validation("select at least one line"));
        }
        if cmd.allocations.is_empty() {
            return Err(DomainError::validation("mass dispatch needs at least one allocation"));
        }
        for allocation in &cmd.allocations {
            self.check_destination(
                allocation.stakeholder_id,
                &cmd.address,
                allocation.quantity,
                cmd.date,
                cmd.business_date,
            )?;
        }

        let total: Decimal = cmd.allocations.iter().map(|a| a.quantity).sum();
        let mut seen_lines = BTreeSet::new();
        for selected in &cmd.lines {
            if !seen_lines.insert(selected.line_no) {
                return Err(DomainError::validation(format!(
                    "line {} is selected twice",
                    selected.line_no
                )));
            }
            let line = self.find_line(selected.line_no)?;
            Self::ensure_dispatchable(line)?;
            if selected.dispatch_ids.len() != cmd.allocations.len() {
                return Err(DomainError::validation(format!(
                    "line {} needs {} dispatch ids",
                    line.line_no,
                    cmd.allocations.len()
                )));
            }
            let available = self.available_qty(line.line_no);
            if total != available {
                return Err(DomainError::validation(format!(
                    "mass dispatch quantities ({total}) do not match available quantity ({available}) on line {}",
                    line.line_no
                )));
            }
        }
        self.ensure_new_dispatch_ids(cmd.lines.iter().flat_map(|l| l.dispatch_ids.iter()))?;

        let mut pending = Pending::new(self);
        for selected in &cmd.lines {
            let line = self.find_line(selected.line_no)?;
            for (allocation, dispatch_id) in cmd.allocations.iter().zip(&selected.dispatch_ids) {
                let target = DispatchTarget {
                    dispatch_id: *dispatch_id,
                    stakeholder_id: allocation.stakeholder_id,
                    address: cmd.address.clone(),
                    date: cmd.date,
                    slot_id: cmd.slot_id,
                    zone_id: cmd.zone_id,
                    carrier_id: cmd.carrier_id,
                    quantity: allocation.quantity,
                    group_id: cmd.group_id,
                };
                pending.create_dispatch(line, &target, cmd.occurred_at)?;
            }
        }
        Ok(pending.finish())
    }

    fn handle_update_dispatch(
        &self,
        cmd: &UpdateDispatch,
    ) -> Result<Vec<SaleOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_draft()?;

        let dispatch = self
            .dispatches
            .get(&cmd.dispatch_id)
            .ok_or_else(DomainError::not_found)?;
        if dispatch.state != DispatchState::Draft {
            return Err(DomainError::invariant("only draft dispatches can be modified"));
        }
        let quantity = cmd.quantity.unwrap_or(dispatch.quantity);
        self.check_destination(
            dispatch.stakeholder_id,
            &cmd.address,
            quantity,
            cmd.date,
            cmd.business_date,
        )?;

        let key = GroupKey {
            address_id: cmd.address.address_id,
            zone_id: cmd.zone_id,
            date: cmd.date,
            slot_id: cmd.slot_id,
            carrier_id: cmd.carrier_id,
        };
        let previous_group = dispatch.group_id;

        let mut pending = Pending::new(self);
        let group_id = if key == dispatch.group_key() {
            previous_group
        } else {
            pending.assign_group(
                key,
                &cmd.address.name,
                cmd.group_id,
                cmd.dispatch_id,
                cmd.occurred_at,
            )?
        };

        pending.push(SaleOrderEvent::DispatchUpdated(DispatchUpdated {
            order_id: cmd.order_id,
            dispatch_id: cmd.dispatch_id,
            address_id: cmd.address.address_id,
            quantity,
            date: cmd.date,
            slot_id: cmd.slot_id,
            zone_id: cmd.zone_id,
            carrier_id: cmd.carrier_id,
            group_id,
            occurred_at: cmd.occurred_at,
        }));
        if group_id != previous_group {
            pending.release_group(previous_group, cmd.occurred_at);
        }
        Ok(pending.finish())
    }

    fn handle_remove_dispatch(
        &self,
        cmd: &RemoveDispatch,
    ) -> Result<Vec<SaleOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;

        let dispatch = self
            .dispatches
            .get(&cmd.dispatch_id)
            .ok_or_else(DomainError::not_found)?;
        if !matches!(dispatch.state, DispatchState::Draft | DispatchState::Cancelled) {
            return Err(DomainError::invariant(
                "only draft or cancelled dispatches can be deleted",
            ));
        }

        let mut pending = Pending::new(self);
        pending.push(SaleOrderEvent::DispatchRemoved(DispatchRemoved {
            order_id: cmd.order_id,
            dispatch_id: cmd.dispatch_id,
            occurred_at: cmd.occurred_at,
        }));
        pending.release_group(dispatch.group_id, cmd.occurred_at);
        Ok(pending.finish())
    }

    fn handle_confirm(&self, cmd: &ConfirmOrder) -> Result<Vec<SaleOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;

        if self.status != SaleOrderStatus::Draft {
            return Err(DomainError::invariant("only draft orders can be confirmed"));
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot confirm order without lines"));
        }

        let mut to_confirm = Vec::new();
        if self.delivery_mode == DeliveryMode::Dispatch {
            for line in &self.lines {
                let dispatched = self.dispatched_qty(line.line_no);
                if dispatched.is_zero() {
                    return Err(DomainError::validation(format!(
                        "line {} has no dispatches",
                        line.line_no
                    )));
                }
                if dispatched != line.quantity {
                    return Err(DomainError::validation(format!(
                        "line {} is dispatched for {dispatched} of {}",
                        line.line_no, line.quantity
                    )));
                }
            }

            let routes: BTreeSet<Route> = cmd.routes.iter().copied().collect();
            for dispatch in self.dispatches.values().filter(|d| d.is_active()) {
                let zone_id = dispatch.zone_id.ok_or_else(|| {
                    DomainError::validation(format!(
                        "dispatch {} has no delivery zone",
                        dispatch.name
                    ))
                })?;
                let carrier_id = dispatch.carrier_id.ok_or_else(|| {
                    DomainError::validation(format!("dispatch {} has no carrier", dispatch.name))
                })?;
                if !routes.contains(&Route {
                    zone_id,
                    carrier_id,
                }) {
                    return Err(DomainError::validation(format!(
                        "carrier of dispatch {} does not serve its zone",
                        dispatch.name
                    )));
                }
                let line = self.find_line(dispatch.line_no)?;
                if !line.deliverable_to(zone_id) {
                    return Err(DomainError::validation(format!(
                        "product of dispatch {} cannot be delivered to its zone",
                        dispatch.name
                    )));
                }
                if dispatch.state == DispatchState::Draft {
                    to_confirm.push(dispatch.id);
                }
            }
        }

        let mut events = vec![SaleOrderEvent::OrderConfirmed(OrderConfirmed {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })];
        if !to_confirm.is_empty() {
            events.push(SaleOrderEvent::DispatchStateChanged(DispatchStateChanged {
                order_id: cmd.order_id,
                dispatch_ids: to_confirm,
                state: DispatchState::Confirmed,
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    /// Picking-driven dispatch transitions. Dispatches already in the
    /// target state are skipped.
    fn handle_transition(
        &self,
        order_id: SaleOrderId,
        dispatch_ids: &[DispatchId],
        target: DispatchState,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<SaleOrderEvent>, DomainError> {
        self.ensure_exists(order_id)?;
        if self.status != SaleOrderStatus::Confirmed && target != DispatchState::Cancelled {
            return Err(DomainError::invariant(format!(
                "dispatches of an unconfirmed order cannot become {}",
                target.as_str()
            )));
        }

        let mut changed = Vec::new();
        for id in dispatch_ids {
            let dispatch = self.dispatches.get(id).ok_or_else(DomainError::not_found)?;
            if dispatch.state == target || changed.contains(id) {
                continue;
            }
            if !dispatch.state.can_transition_to(target) {
                return Err(DomainError::invariant(format!(
                    "dispatch {} cannot go from {} to {}",
                    dispatch.name,
                    dispatch.state.as_str(),
                    target.as_str()
                )));
            }
            changed.push(*id);
        }

        if changed.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![SaleOrderEvent::DispatchStateChanged(DispatchStateChanged {
            order_id,
            dispatch_ids: changed,
            state: target,
            occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<SaleOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        if self.status == SaleOrderStatus::Cancelled {
            return Err(DomainError::conflict("order is already cancelled"));
        }

        let open: Vec<DispatchId> = self
            .dispatches
            .values()
            .filter(|d| !d.state.is_terminal())
            .map(|d| d.id)
            .collect();

        let mut events = vec![SaleOrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })];
        if !open.is_empty() {
            events.push(SaleOrderEvent::DispatchStateChanged(DispatchStateChanged {
                order_id: cmd.order_id,
                dispatch_ids: open,
                state: DispatchState::Cancelled,
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 9, 0, 0).unwrap()
    }

    fn business_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()
    }

    fn delivery_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    struct Fixture {
        order: SaleOrder,
        customer: PartnerId,
        a: PartnerId,
        b: PartnerId,
        addr_a: AddressRef,
        addr_b: AddressRef,
        zone: ZoneId,
        carrier: CarrierId,
        morning: SlotId,
    }

    fn run(order: &mut SaleOrder, command: SaleOrderCommand) -> Vec<SaleOrderEvent> {
        let events = order.handle(&command).unwrap();
        for e in &events {
            order.apply(e);
        }
        events
    }

    fn address(name: &str, owner: PartnerId) -> AddressRef {
        AddressRef {
            address_id: AddressId::generate(),
            name: name.to_string(),
            owners: vec![owner],
        }
    }

    /// Dispatch-mode order with stakeholders {A, B} and one line of
    /// `quantity` units of a dispatchable product.
    fn fixture(quantity: Decimal) -> Fixture {
        let order_id = SaleOrderId::generate();
        let customer = PartnerId::generate();
        let a = PartnerId::generate();
        let b = PartnerId::generate();
        let mut order = SaleOrder::empty(order_id);
        run(
            &mut order,
            SaleOrderCommand::CreateSaleOrder(CreateSaleOrder {
                order_id,
                name: "S00042".to_string(),
                customer_id: customer,
                delivery_mode: DeliveryMode::Dispatch,
                occurred_at: test_time(),
            }),
        );
        for (partner, name) in [(a, "A"), (b, "B")] {
            run(
                &mut order,
                SaleOrderCommand::AddStakeholder(AddStakeholder {
                    order_id,
                    partner_id: partner,
                    name: name.to_string(),
                    occurred_at: test_time(),
                }),
            );
        }
        run(
            &mut order,
            SaleOrderCommand::AddLine(AddLine {
                order_id,
                product: LineProduct {
                    product_id: ProductId::generate(),
                    dispatchable: true,
                    zone_ids: vec![],
                },
                quantity,
                unit_price: dec!(12.50),
                occurred_at: test_time(),
            }),
        );
        Fixture {
            order,
            customer,
            a,
            b,
            addr_a: address("Entrepôt A", a),
            addr_b: address("Entrepôt B", b),
            zone: ZoneId::generate(),
            carrier: CarrierId::generate(),
            morning: SlotId::generate(),
        }
    }

    impl Fixture {
        fn target(&self, stakeholder: PartnerId, address: &AddressRef, qty: Decimal) -> DispatchTarget {
            DispatchTarget {
                dispatch_id: DispatchId::generate(),
                stakeholder_id: stakeholder,
                address: address.clone(),
                date: delivery_date(),
                slot_id: Some(self.morning),
                zone_id: Some(self.zone),
                carrier_id: Some(self.carrier),
                quantity: qty,
                group_id: None,
            }
        }

        fn expand(&self, targets: Vec<DispatchTarget>) -> SaleOrderCommand {
            SaleOrderCommand::ExpandLine(ExpandLine {
                order_id: self.order.id_typed(),
                line_no: 1,
                targets,
                business_date: business_date(),
                occurred_at: test_time(),
            })
        }

        fn confirm(&self) -> SaleOrderCommand {
            SaleOrderCommand::ConfirmOrder(ConfirmOrder {
                order_id: self.order.id_typed(),
                routes: vec![Route {
                    zone_id: self.zone,
                    carrier_id: self.carrier,
                }],
                occurred_at: test_time(),
            })
        }

        fn expand_split(&mut self) {
            let cmd = self.expand(vec![
                self.target(self.a, &self.addr_a, dec!(4)),
                self.target(self.b, &self.addr_b, dec!(6)),
            ]);
            run(&mut self.order, cmd);
        }

        fn dispatch_ids(&self) -> Vec<DispatchId> {
            self.order.dispatches().map(|d| d.id).collect()
        }
    }

    fn expect_validation(err: DomainError, needle: &str) {
        match err {
            DomainError::Validation(msg) if msg.contains(needle) => {}
            other => panic!("expected validation error containing '{needle}', got {other:?}"),
        }
    }

    #[test]
    fn create_sale_order_emits_created_event() {
        let order_id = SaleOrderId::generate();
        let customer = PartnerId::generate();
        let events = SaleOrder::empty(order_id)
            .handle(&SaleOrderCommand::CreateSaleOrder(CreateSaleOrder {
                order_id,
                name: " S00001 ".to_string(),
                customer_id: customer,
                delivery_mode: DeliveryMode::Standard,
                occurred_at: test_time(),
            }))
            .unwrap();
        match &events[..] {
            [SaleOrderEvent::SaleOrderCreated(e)] => {
                assert_eq!(e.name, "S00001");
                assert_eq!(e.customer_id, customer);
            }
            other => panic!("expected SaleOrderCreated, got {other:?}"),
        }
    }

    #[test]
    fn expand_line_creates_one_dispatch_per_target() {
        let mut f = fixture(dec!(10));
        f.expand_split();

        assert_eq!(f.order.dispatches().count(), 2);
        assert_eq!(f.order.groups().count(), 2);
        assert_eq!(f.order.dispatched_qty(1), dec!(10));
        let names: BTreeSet<_> = f.order.dispatches().map(|d| d.name.clone()).collect();
        assert!(names.contains("S00042-L1-A"));
        assert!(names.contains("S00042-L1-B"));
        let group_names: Vec<_> = f.order.groups().map(|g| g.name.clone()).collect();
        assert!(group_names.contains(&"GRP/S00042/Entrepôt A/20240601/1".to_string()));
        assert!(group_names.contains(&"GRP/S00042/Entrepôt B/20240601/2".to_string()));

        let cmd = f.confirm();
        run(&mut f.order, cmd);
        assert_eq!(f.order.status(), SaleOrderStatus::Confirmed);
        assert!(f.order.dispatches().all(|d| d.state == DispatchState::Confirmed));
    }

    #[test]
    fn dispatches_to_the_same_destination_share_a_group() {
        let mut f = fixture(dec!(10));
        let shared = AddressRef {
            address_id: AddressId::generate(),
            name: "Siège".to_string(),
            owners: vec![f.a, f.b],
        };
        let cmd = f.expand(vec![
            f.target(f.a, &shared, dec!(4)),
            f.target(f.b, &shared, dec!(6)),
        ]);
        run(&mut f.order, cmd);

        assert_eq!(f.order.groups().count(), 1);
        let group = f.order.groups().next().unwrap();
        assert_eq!(group.dispatch_ids.len(), 2);
        assert!(f.order.dispatches().all(|d| d.group_id == group.id));
    }

    #[test]
    fn supplied_group_id_is_used_for_a_new_key() {
        let mut f = fixture(dec!(10));
        let group_id = DispatchGroupId::generate();
        let mut t1 = f.target(f.a, &f.addr_a, dec!(4));
        t1.group_id = Some(group_id);
        let t2 = f.target(f.a, &f.addr_a, dec!(6));
        let cmd = f.expand(vec![t1, t2]);
        run(&mut f.order, cmd);

        assert!(f.order.group(group_id).is_some());
        assert!(f.order.dispatches().all(|d| d.group_id == group_id));
    }

    #[test]
    fn conflicting_group_id_is_rejected() {
        let f = fixture(dec!(10));
        let mut t1 = f.target(f.a, &f.addr_a, dec!(4));
        t1.group_id = Some(DispatchGroupId::generate());
        let mut t2 = f.target(f.a, &f.addr_a, dec!(6));
        t2.group_id = Some(DispatchGroupId::generate());
        let err = f.order.handle(&f.expand(vec![t1, t2])).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(f.order.dispatches().count(), 0);
    }

    #[test]
    fn expansion_rejects_mismatched_total() {
        let f = fixture(dec!(10));
        let err = f
            .order
            .handle(&f.expand(vec![
                f.target(f.a, &f.addr_a, dec!(4)),
                f.target(f.b, &f.addr_b, dec!(5)),
            ]))
            .unwrap_err();
        expect_validation(err, "do not match");
    }

    #[test]
    fn expansion_rejects_non_dispatchable_product() {
        let mut f = fixture(dec!(10));
        let order_id = f.order.id_typed();
        run(
            &mut f.order,
            SaleOrderCommand::AddLine(AddLine {
                order_id,
                product: LineProduct {
                    product_id: ProductId::generate(),
                    dispatchable: false,
                    zone_ids: vec![],
                },
                quantity: dec!(1),
                unit_price: dec!(1),
                occurred_at: test_time(),
            }),
        );
        let err = f
            .order
            .handle(&SaleOrderCommand::ExpandLine(ExpandLine {
                order_id,
                line_no: 2,
                targets: vec![f.target(f.a, &f.addr_a, dec!(1))],
                business_date: business_date(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        expect_validation(err, "not dispatchable");
    }

    #[test]
    fn expansion_rejects_partner_outside_stakeholders() {
        let f = fixture(dec!(10));
        let stranger = PartnerId::generate();
        let addr = address("Ailleurs", stranger);
        let err = f
            .order
            .handle(&f.expand(vec![f.target(stranger, &addr, dec!(10))]))
            .unwrap_err();
        expect_validation(err, "not a stakeholder");
    }

    #[test]
    fn address_must_belong_to_stakeholder_or_customer() {
        let f = fixture(dec!(10));
        let err = f
            .order
            .handle(&f.expand(vec![f.target(f.a, &f.addr_b, dec!(10))]))
            .unwrap_err();
        expect_validation(err, "belongs neither");

        let customer_address = address("Client", f.customer);
        assert!(
            f.order
                .handle(&f.expand(vec![f.target(f.a, &customer_address, dec!(10))]))
                .is_ok()
        );
    }

    #[test]
    fn expansion_rejects_past_dates_and_empty_quantities() {
        let f = fixture(dec!(10));
        let mut past = f.target(f.a, &f.addr_a, dec!(10));
        past.date = NaiveDate::from_ymd_opt(2024, 5, 19).unwrap();
        expect_validation(f.order.handle(&f.expand(vec![past])).unwrap_err(), "in the past");

        let zero = f.target(f.a, &f.addr_a, dec!(0));
        let rest = f.target(f.b, &f.addr_b, dec!(10));
        expect_validation(
            f.order.handle(&f.expand(vec![zero, rest])).unwrap_err(),
            "must be positive",
        );
    }

    #[test]
    fn expansion_requires_dispatch_mode() {
        let mut f = fixture(dec!(10));
        let order_id = f.order.id_typed();
        run(
            &mut f.order,
            SaleOrderCommand::SetDeliveryMode(SetDeliveryMode {
                order_id,
                delivery_mode: DeliveryMode::Standard,
                occurred_at: test_time(),
            }),
        );
        let err = f
            .order
            .handle(&f.expand(vec![f.target(f.a, &f.addr_a, dec!(10))]))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn replayed_expansion_is_idempotent() {
        let mut f = fixture(dec!(10));
        let t1 = f.target(f.a, &f.addr_a, dec!(4));
        let t2 = f.target(f.b, &f.addr_b, dec!(6));
        let cmd = f.expand(vec![t1.clone(), t2.clone()]);
        run(&mut f.order, cmd.clone());

        assert!(f.order.handle(&cmd).unwrap().is_empty());

        // Same partition, fresh ids: still a no-op.
        let replay = f.expand(vec![
            DispatchTarget {
                dispatch_id: DispatchId::generate(),
                quantity: dec!(6.0),
                ..t2
            },
            DispatchTarget {
                dispatch_id: DispatchId::generate(),
                ..t1
            },
        ]);
        assert!(f.order.handle(&replay).unwrap().is_empty());

        let different = f.expand(vec![f.target(f.a, &f.addr_a, dec!(10))]);
        assert!(matches!(
            f.order.handle(&different).unwrap_err(),
            DomainError::Conflict(_)
        ));
    }

    #[test]
    fn expand_remove_reexpand_round_trips() {
        let mut f = fixture(dec!(10));
        f.expand_split();
        let before: Vec<_> = f
            .order
            .dispatches()
            .map(|d| (d.stakeholder_id, d.address_id, d.quantity, d.group_key()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let order_id = f.order.id_typed();
        for id in f.dispatch_ids() {
            run(
                &mut f.order,
                SaleOrderCommand::RemoveDispatch(RemoveDispatch {
                    order_id,
                    dispatch_id: id,
                    occurred_at: test_time(),
                }),
            );
        }
        assert_eq!(f.order.dispatches().count(), 0);
        assert_eq!(f.order.groups().count(), 0);

        f.expand_split();
        let after: Vec<_> = f
            .order
            .dispatches()
            .map(|d| (d.stakeholder_id, d.address_id, d.quantity, d.group_key()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn group_is_removed_with_its_last_dispatch() {
        let mut f = fixture(dec!(10));
        f.expand_split();
        let order_id = f.order.id_typed();
        let victim = f.order.dispatches().find(|d| d.stakeholder_id == f.a).unwrap().clone();

        let events = run(
            &mut f.order,
            SaleOrderCommand::RemoveDispatch(RemoveDispatch {
                order_id,
                dispatch_id: victim.id,
                occurred_at: test_time(),
            }),
        );
        assert!(events.iter().any(|e| matches!(
            e,
            SaleOrderEvent::DispatchGroupRemoved(g) if g.group_id == victim.group_id
        )));
        assert!(f.order.group(victim.group_id).is_none());
        assert_eq!(f.order.groups().count(), 1);
        assert_eq!(f.order.available_qty(1), dec!(4));
    }

    #[test]
    fn update_dispatch_regroups_and_releases_the_old_group() {
        let mut f = fixture(dec!(10));
        f.expand_split();
        let order_id = f.order.id_typed();
        let moving = f.order.dispatches().find(|d| d.stakeholder_id == f.b).unwrap().clone();
        let staying = f.order.dispatches().find(|d| d.stakeholder_id == f.a).unwrap().clone();

        // B's dispatch goes to A's destination: one group remains.
        let shared = AddressRef {
            owners: vec![f.a, f.b],
            ..f.addr_a.clone()
        };
        run(
            &mut f.order,
            SaleOrderCommand::UpdateDispatch(UpdateDispatch {
                order_id,
                dispatch_id: moving.id,
                address: shared,
                date: delivery_date(),
                slot_id: Some(f.morning),
                zone_id: Some(f.zone),
                carrier_id: Some(f.carrier),
                quantity: None,
                group_id: None,
                business_date: business_date(),
                occurred_at: test_time(),
            }),
        );
        assert_eq!(f.order.groups().count(), 1);
        assert_eq!(f.order.dispatch(moving.id).unwrap().group_id, staying.group_id);
        assert!(f.order.group(moving.group_id).is_none());
    }

    #[test]
    fn update_dispatch_to_a_new_slot_opens_a_new_group() {
        let mut f = fixture(dec!(10));
        let cmd = f.expand(vec![f.target(f.a, &f.addr_a, dec!(10))]);
        run(&mut f.order, cmd);
        let order_id = f.order.id_typed();
        let dispatch = f.order.dispatches().next().unwrap().clone();

        run(
            &mut f.order,
            SaleOrderCommand::UpdateDispatch(UpdateDispatch {
                order_id,
                dispatch_id: dispatch.id,
                address: f.addr_a.clone(),
                date: delivery_date(),
                slot_id: Some(SlotId::generate()),
                zone_id: Some(f.zone),
                carrier_id: Some(f.carrier),
                quantity: None,
                group_id: None,
                business_date: business_date(),
                occurred_at: test_time(),
            }),
        );
        let updated = f.order.dispatch(dispatch.id).unwrap();
        assert_ne!(updated.group_id, dispatch.group_id);
        assert_eq!(f.order.groups().count(), 1);
        assert_eq!(f.order.group(updated.group_id).unwrap().sequence, 2);
    }

    #[test]
    fn cannot_confirm_with_uncovered_line() {
        let f = fixture(dec!(10));
        expect_validation(f.order.handle(&f.confirm()).unwrap_err(), "has no dispatches");
    }

    #[test]
    fn cannot_confirm_with_partially_dispatched_line() {
        let mut f = fixture(dec!(10));
        f.expand_split();
        let order_id = f.order.id_typed();
        let id = f.dispatch_ids()[0];
        run(
            &mut f.order,
            SaleOrderCommand::RemoveDispatch(RemoveDispatch {
                order_id,
                dispatch_id: id,
                occurred_at: test_time(),
            }),
        );
        expect_validation(f.order.handle(&f.confirm()).unwrap_err(), "is dispatched for");
    }

    #[test]
    fn confirmation_requires_zone_and_reachable_carrier() {
        let mut f = fixture(dec!(10));
        let mut unzoned = f.target(f.a, &f.addr_a, dec!(10));
        unzoned.zone_id = None;
        let cmd = f.expand(vec![unzoned]);
        run(&mut f.order, cmd);
        expect_validation(f.order.handle(&f.confirm()).unwrap_err(), "no delivery zone");

        let mut f = fixture(dec!(10));
        f.expand_split();
        let cmd = SaleOrderCommand::ConfirmOrder(ConfirmOrder {
            order_id: f.order.id_typed(),
            routes: vec![Route {
                zone_id: f.zone,
                carrier_id: CarrierId::generate(),
            }],
            occurred_at: test_time(),
        });
        expect_validation(f.order.handle(&cmd).unwrap_err(), "does not serve");
    }

    #[test]
    fn confirmation_rejects_zone_outside_product_zones() {
        let order_id = SaleOrderId::generate();
        let mut f = fixture(dec!(10));
        // Rebuild with a zone-restricted product.
        let a = f.a;
        let mut order = SaleOrder::empty(order_id);
        run(
            &mut order,
            SaleOrderCommand::CreateSaleOrder(CreateSaleOrder {
                order_id,
                name: "S00043".to_string(),
                customer_id: f.customer,
                delivery_mode: DeliveryMode::Dispatch,
                occurred_at: test_time(),
            }),
        );
        run(
            &mut order,
            SaleOrderCommand::AddStakeholder(AddStakeholder {
                order_id,
                partner_id: a,
                name: "A".to_string(),
                occurred_at: test_time(),
            }),
        );
        run(
            &mut order,
            SaleOrderCommand::AddLine(AddLine {
                order_id,
                product: LineProduct {
                    product_id: ProductId::generate(),
                    dispatchable: true,
                    zone_ids: vec![ZoneId::generate()],
                },
                quantity: dec!(10),
                unit_price: dec!(1),
                occurred_at: test_time(),
            }),
        );
        f.order = order;
        let cmd = f.expand(vec![f.target(a, &f.addr_a, dec!(10))]);
        run(&mut f.order, cmd);
        expect_validation(f.order.handle(&f.confirm()).unwrap_err(), "cannot be delivered");
    }

    #[test]
    fn standard_orders_confirm_without_dispatches() {
        let order_id = SaleOrderId::generate();
        let mut order = SaleOrder::empty(order_id);
        run(
            &mut order,
            SaleOrderCommand::CreateSaleOrder(CreateSaleOrder {
                order_id,
                name: "S1".to_string(),
                customer_id: PartnerId::generate(),
                delivery_mode: DeliveryMode::Standard,
                occurred_at: test_time(),
            }),
        );
        let confirm = SaleOrderCommand::ConfirmOrder(ConfirmOrder {
            order_id,
            routes: vec![],
            occurred_at: test_time(),
        });
        expect_validation(order.handle(&confirm).unwrap_err(), "without lines");

        run(
            &mut order,
            SaleOrderCommand::AddLine(AddLine {
                order_id,
                product: LineProduct {
                    product_id: ProductId::generate(),
                    dispatchable: false,
                    zone_ids: vec![],
                },
                quantity: dec!(2),
                unit_price: dec!(3),
                occurred_at: test_time(),
            }),
        );
        run(&mut order, confirm);
        assert_eq!(order.status(), SaleOrderStatus::Confirmed);
        assert_eq!(order.amount_untaxed(), dec!(6));
    }

    #[test]
    fn mass_dispatch_creates_one_dispatch_per_line_and_stakeholder() {
        let mut f = fixture(dec!(4));
        let order_id = f.order.id_typed();
        run(
            &mut f.order,
            SaleOrderCommand::AddLine(AddLine {
                order_id,
                product: LineProduct {
                    product_id: ProductId::generate(),
                    dispatchable: true,
                    zone_ids: vec![],
                },
                quantity: dec!(4),
                unit_price: dec!(1),
                occurred_at: test_time(),
            }),
        );
        let shared = address("Client", f.customer);
        let cmd = SaleOrderCommand::MassDispatch(MassDispatch {
            order_id,
            lines: vec![
                MassDispatchLine {
                    line_no: 1,
                    dispatch_ids: vec![DispatchId::generate(), DispatchId::generate()],
                },
                MassDispatchLine {
                    line_no: 2,
                    dispatch_ids: vec![DispatchId::generate(), DispatchId::generate()],
                },
            ],
            address: shared,
            date: delivery_date(),
            slot_id: Some(f.morning),
            zone_id: Some(f.zone),
            carrier_id: Some(f.carrier),
            group_id: None,
            allocations: vec![
                MassAllocation {
                    stakeholder_id: f.a,
                    quantity: dec!(1),
                },
                MassAllocation {
                    stakeholder_id: f.b,
                    quantity: dec!(3),
                },
            ],
            business_date: business_date(),
            occurred_at: test_time(),
        });
        run(&mut f.order, cmd);

        assert_eq!(f.order.dispatches().count(), 4);
        assert_eq!(f.order.groups().count(), 1);
        assert_eq!(f.order.dispatch_completion(), Decimal::ONE);
        let confirm = f.confirm();
        run(&mut f.order, confirm);
    }

    #[test]
    fn mass_dispatch_mismatch_creates_nothing() {
        let mut f = fixture(dec!(4));
        let order_id = f.order.id_typed();
        run(
            &mut f.order,
            SaleOrderCommand::AddLine(AddLine {
                order_id,
                product: LineProduct {
                    product_id: ProductId::generate(),
                    dispatchable: true,
                    zone_ids: vec![],
                },
                quantity: dec!(6),
                unit_price: dec!(1),
                occurred_at: test_time(),
            }),
        );
        let version = f.order.version();
        let err = f
            .order
            .handle(&SaleOrderCommand::MassDispatch(MassDispatch {
                order_id,
                lines: vec![
                    MassDispatchLine {
                        line_no: 1,
                        dispatch_ids: vec![DispatchId::generate(), DispatchId::generate()],
                    },
                    MassDispatchLine {
                        line_no: 2,
                        dispatch_ids: vec![DispatchId::generate(), DispatchId::generate()],
                    },
                ],
                address: address("Client", f.customer),
                date: delivery_date(),
                slot_id: None,
                zone_id: Some(f.zone),
                carrier_id: Some(f.carrier),
                group_id: None,
                allocations: vec![
                    MassAllocation {
                        stakeholder_id: f.a,
                        quantity: dec!(2),
                    },
                    MassAllocation {
                        stakeholder_id: f.b,
                        quantity: dec!(4),
                    },
                ],
                business_date: business_date(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        expect_validation(err, "on line 1");
        assert_eq!(f.order.dispatches().count(), 0);
        assert_eq!(f.order.version(), version);
    }

    #[test]
    fn picking_driven_transitions() {
        let mut f = fixture(dec!(10));
        f.expand_split();
        let order_id = f.order.id_typed();
        let ids = f.dispatch_ids();

        let early = SaleOrderCommand::MarkDispatchesInTransit(MarkDispatchesInTransit {
            order_id,
            dispatch_ids: ids.clone(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            f.order.handle(&early).unwrap_err(),
            DomainError::InvariantViolation(_)
        ));

        let confirm = f.confirm();
        run(&mut f.order, confirm);
        let done_too_soon = SaleOrderCommand::MarkDispatchesDone(MarkDispatchesDone {
            order_id,
            dispatch_ids: vec![ids[0]],
            occurred_at: test_time(),
        });
        assert!(f.order.handle(&done_too_soon).is_err());

        run(&mut f.order, early.clone());
        assert!(f.order.handle(&early).unwrap().is_empty());
        run(&mut f.order, done_too_soon);
        assert_eq!(f.order.dispatch(ids[0]).unwrap().state, DispatchState::Done);

        run(
            &mut f.order,
            SaleOrderCommand::CancelDispatches(CancelDispatches {
                order_id,
                dispatch_ids: vec![ids[1]],
                occurred_at: test_time(),
            }),
        );
        assert_eq!(f.order.dispatch(ids[1]).unwrap().state, DispatchState::Cancelled);
        assert_eq!(f.order.dispatched_qty(1), f.order.dispatch(ids[0]).unwrap().quantity);

        let cancel_done = SaleOrderCommand::CancelDispatches(CancelDispatches {
            order_id,
            dispatch_ids: vec![ids[0]],
            occurred_at: test_time(),
        });
        assert!(f.order.handle(&cancel_done).is_err());
    }

    #[test]
    fn only_draft_or_cancelled_dispatches_can_be_removed() {
        let mut f = fixture(dec!(10));
        f.expand_split();
        let confirm = f.confirm();
        run(&mut f.order, confirm);
        let order_id = f.order.id_typed();
        let id = f.dispatch_ids()[0];
        let remove = SaleOrderCommand::RemoveDispatch(RemoveDispatch {
            order_id,
            dispatch_id: id,
            occurred_at: test_time(),
        });
        assert!(matches!(
            f.order.handle(&remove).unwrap_err(),
            DomainError::InvariantViolation(_)
        ));

        run(
            &mut f.order,
            SaleOrderCommand::CancelDispatches(CancelDispatches {
                order_id,
                dispatch_ids: vec![id],
                occurred_at: test_time(),
            }),
        );
        run(&mut f.order, remove);
        assert!(f.order.dispatch(id).is_none());
    }

    #[test]
    fn cancelling_the_order_cancels_open_dispatches() {
        let mut f = fixture(dec!(10));
        f.expand_split();
        let confirm = f.confirm();
        run(&mut f.order, confirm);
        let order_id = f.order.id_typed();
        let ids = f.dispatch_ids();
        run(
            &mut f.order,
            SaleOrderCommand::MarkDispatchesInTransit(MarkDispatchesInTransit {
                order_id,
                dispatch_ids: vec![ids[0]],
                occurred_at: test_time(),
            }),
        );
        run(
            &mut f.order,
            SaleOrderCommand::MarkDispatchesDone(MarkDispatchesDone {
                order_id,
                dispatch_ids: vec![ids[0]],
                occurred_at: test_time(),
            }),
        );
        run(
            &mut f.order,
            SaleOrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at: test_time(),
            }),
        );
        assert_eq!(f.order.status(), SaleOrderStatus::Cancelled);
        assert_eq!(f.order.dispatch(ids[0]).unwrap().state, DispatchState::Done);
        assert_eq!(f.order.dispatch(ids[1]).unwrap().state, DispatchState::Cancelled);
    }

    #[test]
    fn stakeholder_with_dispatches_cannot_be_removed() {
        let mut f = fixture(dec!(10));
        f.expand_split();
        let err = f
            .order
            .handle(&SaleOrderCommand::RemoveStakeholder(RemoveStakeholder {
                order_id: f.order.id_typed(),
                partner_id: f.a,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn cannot_leave_dispatch_mode_with_dispatches() {
        let mut f = fixture(dec!(10));
        f.expand_split();
        let err = f
            .order
            .handle(&SaleOrderCommand::SetDeliveryMode(SetDeliveryMode {
                order_id: f.order.id_typed(),
                delivery_mode: DeliveryMode::Standard,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn version_increments_on_apply() {
        let f = fixture(dec!(10));
        // created + 2 stakeholders + 1 line
        assert_eq!(f.order.version(), 4);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let f = fixture(dec!(10));
        let before = f.order.clone();
        let cmd = f.expand(vec![
            f.target(f.a, &f.addr_a, dec!(4)),
            f.target(f.b, &f.addr_b, dec!(6)),
        ]);
        let events1 = f.order.handle(&cmd).unwrap();
        let events2 = f.order.handle(&cmd).unwrap();
        assert_eq!(f.order, before);
        assert_eq!(events1, events2);
    }

    #[test]
    fn apply_is_deterministic() {
        let mut f = fixture(dec!(10));
        let cmd = f.expand(vec![
            f.target(f.a, &f.addr_a, dec!(4)),
            f.target(f.b, &f.addr_b, dec!(6)),
        ]);
        let events = f.order.handle(&cmd).unwrap();

        let mut o1 = f.order.clone();
        let mut o2 = f.order.clone();
        for e in &events {
            o1.apply(e);
            o2.apply(e);
        }
        assert_eq!(o1, o2);
        run(&mut f.order, cmd);
        assert_eq!(f.order, o1);
    }
}
