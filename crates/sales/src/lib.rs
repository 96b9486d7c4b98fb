//! Sales domain module (event-sourced): sale orders in standard or dispatch
//! delivery mode.
//!
//! In dispatch mode each order line is split into dispatches, one per
//! (stakeholder, address, date, slot) share, and dispatches sharing a
//! destination are gathered into dispatch groups.
//!
//! Deterministic domain logic only (no IO, no HTTP, no storage).

pub mod dispatch;
pub mod group;
pub mod order;
pub mod pricing;

pub use dispatch::{
    AddressRef, Dispatch, DispatchId, DispatchState, DispatchTarget, dispatch_name,
};
pub use group::{DispatchGroup, DispatchGroupId, GroupKey, group_name};
pub use order::{
    AddLine, AddStakeholder, CancelDispatches, CancelOrder, ConfirmOrder, CreateSaleOrder,
    DeliveryMode, DeliveryModeChanged, DispatchCreated, DispatchGroupCreated,
    DispatchGroupRemoved, DispatchRemoved, DispatchStateChanged, DispatchUpdated, ExpandLine,
    LineAdded, LineProduct, LineUpdated, MarkDispatchesDone, MarkDispatchesInTransit,
    MassAllocation, MassDispatch, MassDispatchLine, OrderCancelled, OrderConfirmed, OrderLine,
    RemoveDispatch, RemoveStakeholder, Route, SaleOrder, SaleOrderCommand, SaleOrderCreated,
    SaleOrderEvent, SaleOrderId, SaleOrderStatus, SetDeliveryMode, Stakeholder, StakeholderAdded,
    StakeholderRemoved, UpdateDispatch, UpdateLine,
};
pub use pricing::{DispatchPrice, price_dispatch};
