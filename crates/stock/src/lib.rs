//! Stock domain module (event-sourced): outgoing pickings planned from
//! dispatch groups, their moves and delivery slips.
//!
//! A picking's lifecycle drives the state of the dispatches it delivers; the
//! coordination itself lives in the service layer.
//!
//! Deterministic domain logic only (no IO, no HTTP, no storage).

pub mod merge;
pub mod picking;
pub mod plan;
pub mod slip;

pub use merge::{MergeKey, merge_moves};
pub use picking::{
    AddressSnapshot, AssignPicking, CancelPicking, ConfirmPicking, CreatePicking, MergeMoves,
    MoveId, MovesMerged, PickingAssigned, PickingCancelled, PickingCommand, PickingConfirmed,
    PickingCreated, PickingEvent, PickingId, PickingState, PickingValidated, PlannedPicking,
    StockMove, StockPicking, ValidatePicking,
};
pub use plan::{picking_name, plan_pickings, plan_standard_picking};
pub use slip::{
    DeliverySlip, SlipLine, ValorisedLine, ValorisedSlip, delivery_slip, slip_file_name,
    valorised_slip,
};
