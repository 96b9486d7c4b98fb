use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use watergile_core::{Aggregate, AggregateRoot, DomainError};
use watergile_delivery::{CarrierId, SlotId, ZoneId};
use watergile_events::Event;
use watergile_parties::PartnerAddress;
use watergile_products::ProductId;
use watergile_sales::{DispatchGroupId, DispatchId, SaleOrderId};

use crate::merge::merge_moves;

watergile_core::domain_id!(
    /// Stock picking identifier.
    PickingId
);

watergile_core::domain_id!(
    /// Stock move identifier.
    MoveId
);

/// Picking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickingState {
    Draft,
    Confirmed,
    Assigned,
    Done,
    Cancelled,
}

impl PickingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PickingState::Done | PickingState::Cancelled)
    }
}

/// Delivery address copied onto the picking when it is planned.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub name: String,
    pub street: Option<String>,
    pub street2: Option<String>,
    pub zip: Option<String>,
    pub city: Option<String>,
    pub country: String,
}

impl From<&PartnerAddress> for AddressSnapshot {
    fn from(address: &PartnerAddress) -> Self {
        Self {
            name: address.name.clone(),
            street: address.street.clone(),
            street2: address.street2.clone(),
            zip: address.zip.clone(),
            city: address.city.clone(),
            country: address.country.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMove {
    pub id: MoveId,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Dispatch this move delivers, if any. Nulled when the picking is
    /// cancelled; never cascades.
    pub dispatch_id: Option<DispatchId>,
    /// Source document (order name).
    pub origin: String,
}

/// Everything needed to open a picking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPicking {
    pub picking_id: PickingId,
    pub name: String,
    pub order_id: SaleOrderId,
    pub group_id: Option<DispatchGroupId>,
    /// Set iff the picking delivers exactly one dispatch.
    pub dispatch_id: Option<DispatchId>,
    pub address: AddressSnapshot,
    pub scheduled_date: NaiveDate,
    pub slot_id: Option<SlotId>,
    pub zone_id: Option<ZoneId>,
    pub carrier_id: Option<CarrierId>,
    pub moves: Vec<StockMove>,
}

/// Aggregate root: StockPicking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockPicking {
    id: PickingId,
    name: String,
    order_id: Option<SaleOrderId>,
    group_id: Option<DispatchGroupId>,
    dispatch_id: Option<DispatchId>,
    address: AddressSnapshot,
    scheduled_date: Option<NaiveDate>,
    slot_id: Option<SlotId>,
    zone_id: Option<ZoneId>,
    carrier_id: Option<CarrierId>,
    moves: Vec<StockMove>,
    state: PickingState,
    version: u64,
    created: bool,
}

impl StockPicking {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PickingId) -> Self {
        Self {
            id,
            name: String::new(),
            order_id: None,
            group_id: None,
            dispatch_id: None,
            address: AddressSnapshot::default(),
            scheduled_date: None,
            slot_id: None,
            zone_id: None,
            carrier_id: None,
            moves: Vec::new(),
            state: PickingState::Draft,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PickingId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order_id(&self) -> Option<SaleOrderId> {
        self.order_id
    }

    pub fn group_id(&self) -> Option<DispatchGroupId> {
        self.group_id
    }

    pub fn dispatch_id(&self) -> Option<DispatchId> {
        self.dispatch_id
    }

    pub fn address(&self) -> &AddressSnapshot {
        &self.address
    }

    pub fn scheduled_date(&self) -> Option<NaiveDate> {
        self.scheduled_date
    }

    pub fn slot_id(&self) -> Option<SlotId> {
        self.slot_id
    }

    pub fn zone_id(&self) -> Option<ZoneId> {
        self.zone_id
    }

    pub fn carrier_id(&self) -> Option<CarrierId> {
        self.carrier_id
    }

    pub fn moves(&self) -> &[StockMove] {
        &self.moves
    }

    pub fn state(&self) -> PickingState {
        self.state
    }

    /// Dispatches referenced by the picking's moves.
    pub fn dispatch_ids(&self) -> BTreeSet<DispatchId> {
        self.moves.iter().filter_map(|m| m.dispatch_id).collect()
    }
}

impl AggregateRoot for StockPicking {
    type Id = PickingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePicking {
    pub plan: PlannedPicking,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPicking {
    pub picking_id: PickingId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignPicking. Stock is reserved and the dispatches leave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignPicking {
    pub picking_id: PickingId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ValidatePicking.
///
/// `in_transit` lists the picking's dispatches the order reports as in
/// transit; each referenced dispatch must be among them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatePicking {
    pub picking_id: PickingId,
    pub in_transit: Vec<DispatchId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPicking {
    pub picking_id: PickingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeMoves {
    pub picking_id: PickingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickingCommand {
    CreatePicking(CreatePicking),
    ConfirmPicking(ConfirmPicking),
    AssignPicking(AssignPicking),
    ValidatePicking(ValidatePicking),
    CancelPicking(CancelPicking),
    MergeMoves(MergeMoves),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickingCreated {
    pub plan: PlannedPicking,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickingConfirmed {
    pub picking_id: PickingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickingAssigned {
    pub picking_id: PickingId,
    pub dispatch_ids: Vec<DispatchId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickingValidated {
    pub picking_id: PickingId,
    pub dispatch_ids: Vec<DispatchId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PickingCancelled. The listed dispatches were detached from the
/// picking and its moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickingCancelled {
    pub picking_id: PickingId,
    pub detached_dispatch_ids: Vec<DispatchId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovesMerged {
    pub picking_id: PickingId,
    pub moves: Vec<StockMove>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickingEvent {
    PickingCreated(PickingCreated),
    PickingConfirmed(PickingConfirmed),
    PickingAssigned(PickingAssigned),
    PickingValidated(PickingValidated),
    PickingCancelled(PickingCancelled),
    MovesMerged(MovesMerged),
}

impl Event for PickingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PickingEvent::PickingCreated(_) => "stock.picking.created",
            PickingEvent::PickingConfirmed(_) => "stock.picking.confirmed",
            PickingEvent::PickingAssigned(_) => "stock.picking.assigned",
            PickingEvent::PickingValidated(_) => "stock.picking.validated",
            PickingEvent::PickingCancelled(_) => "stock.picking.cancelled",
            PickingEvent::MovesMerged(_) => "stock.picking.moves_merged",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PickingEvent::PickingCreated(e) => e.occurred_at,
            PickingEvent::PickingConfirmed(e) => e.occurred_at,
            PickingEvent::PickingAssigned(e) => e.occurred_at,
            PickingEvent::PickingValidated(e) => e.occurred_at,
            PickingEvent::PickingCancelled(e) => e.occurred_at,
            PickingEvent::MovesMerged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockPicking {
    type Command = PickingCommand;
    type Event = PickingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PickingEvent::PickingCreated(e) => {
                let plan = &e.plan;
                self.id = plan.picking_id;
                self.name = plan.name.clone();
                self.order_id = Some(plan.order_id);
                self.group_id = plan.group_id;
                self.dispatch_id = plan.dispatch_id;
                self.address = plan.address.clone();
                self.scheduled_date = Some(plan.scheduled_date);
                self.slot_id = plan.slot_id;
                self.zone_id = plan.zone_id;
                self.carrier_id = plan.carrier_id;
                self.moves = plan.moves.clone();
                self.state = PickingState::Draft;
                self.created = true;
            }
            PickingEvent::PickingConfirmed(_) => {
                self.state = PickingState::Confirmed;
            }
            PickingEvent::PickingAssigned(_) => {
                self.state = PickingState::Assigned;
            }
            PickingEvent::PickingValidated(_) => {
                self.state = PickingState::Done;
            }
            PickingEvent::PickingCancelled(_) => {
                self.state = PickingState::Cancelled;
                self.dispatch_id = None;
                for mv in &mut self.moves {
                    mv.dispatch_id = None;
                }
            }
            PickingEvent::MovesMerged(e) => {
                self.moves = e.moves.clone();
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PickingCommand::CreatePicking(cmd) => self.handle_create(cmd),
            PickingCommand::ConfirmPicking(cmd) => self.handle_confirm(cmd),
            PickingCommand::AssignPicking(cmd) => self.handle_assign(cmd),
            PickingCommand::ValidatePicking(cmd) => self.handle_validate(cmd),
            PickingCommand::CancelPicking(cmd) => self.handle_cancel(cmd),
            PickingCommand::MergeMoves(cmd) => self.handle_merge(cmd),
        }
    }
}

impl StockPicking {
    fn ensure_exists(&self, picking_id: PickingId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != picking_id {
            return Err(DomainError::invariant("picking_id mismatch"));
        }
        Ok(())
    }

    fn ensure_state(&self, expected: PickingState, action: &str) -> Result<(), DomainError> {
        if self.state != expected {
            return Err(DomainError::invariant(format!(
                "cannot {action} a picking in state {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePicking) -> Result<Vec<PickingEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("picking already exists"));
        }
        let plan = &cmd.plan;
        if plan.moves.is_empty() {
            return Err(DomainError::validation("a picking needs at least one move"));
        }
        if plan.moves.iter().any(|m| m.quantity <= Decimal::ZERO) {
            return Err(DomainError::validation("move quantities must be positive"));
        }
        if let Some(dispatch_id) = plan.dispatch_id {
            let referenced: BTreeSet<_> = plan.moves.iter().filter_map(|m| m.dispatch_id).collect();
            if referenced.len() != 1 || !referenced.contains(&dispatch_id) {
                return Err(DomainError::invariant(
                    "a picking references a dispatch only when all its moves deliver that dispatch",
                ));
            }
        }

        Ok(vec![PickingEvent::PickingCreated(PickingCreated {
            plan: plan.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmPicking) -> Result<Vec<PickingEvent>, DomainError> {
        self.ensure_exists(cmd.picking_id)?;
        self.ensure_state(PickingState::Draft, "confirm")?;
        Ok(vec![PickingEvent::PickingConfirmed(PickingConfirmed {
            picking_id: cmd.picking_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign(&self, cmd: &AssignPicking) -> Result<Vec<PickingEvent>, DomainError> {
        self.ensure_exists(cmd.picking_id)?;
        self.ensure_state(PickingState::Confirmed, "assign")?;
        Ok(vec![PickingEvent::PickingAssigned(PickingAssigned {
            picking_id: cmd.picking_id,
            dispatch_ids: self.dispatch_ids().into_iter().collect(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_validate(&self, cmd: &ValidatePicking) -> Result<Vec<PickingEvent>, DomainError> {
        self.ensure_exists(cmd.picking_id)?;
        self.ensure_state(PickingState::Assigned, "validate")?;

        let in_transit: BTreeSet<_> = cmd.in_transit.iter().copied().collect();
        if let Some(missing) = self.dispatch_ids().into_iter().find(|d| !in_transit.contains(d)) {
            return Err(DomainError::invariant(format!(
                "dispatch {missing} is not in transit"
            )));
        }

        Ok(vec![PickingEvent::PickingValidated(PickingValidated {
            picking_id: cmd.picking_id,
            dispatch_ids: self.dispatch_ids().into_iter().collect(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelPicking) -> Result<Vec<PickingEvent>, DomainError> {
        self.ensure_exists(cmd.picking_id)?;
        if self.state.is_terminal() {
            return Err(DomainError::invariant(format!(
                "cannot cancel a picking in state {:?}",
                self.state
            )));
        }
        Ok(vec![PickingEvent::PickingCancelled(PickingCancelled {
            picking_id: cmd.picking_id,
            detached_dispatch_ids: self.dispatch_ids().into_iter().collect(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_merge(&self, cmd: &MergeMoves) -> Result<Vec<PickingEvent>, DomainError> {
        self.ensure_exists(cmd.picking_id)?;
        if self.state.is_terminal() {
            return Ok(vec![]);
        }
        let merged = merge_moves(&self.moves);
        if merged.len() == self.moves.len() {
            return Ok(vec![]);
        }
        Ok(vec![PickingEvent::MovesMerged(MovesMerged {
            picking_id: cmd.picking_id,
            moves: merged,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn mv(dispatch: Option<DispatchId>, qty: Decimal) -> StockMove {
        StockMove {
            id: MoveId::generate(),
            product_id: ProductId::generate(),
            quantity: qty,
            unit_price: dec!(10),
            dispatch_id: dispatch,
            origin: "S00042".to_string(),
        }
    }

    fn plan(dispatch_id: Option<DispatchId>, moves: Vec<StockMove>) -> PlannedPicking {
        PlannedPicking {
            picking_id: PickingId::generate(),
            name: "WH/OUT/S00042/001".to_string(),
            order_id: SaleOrderId::generate(),
            group_id: Some(DispatchGroupId::generate()),
            dispatch_id,
            address: AddressSnapshot {
                name: "Entrepôt A".to_string(),
                city: Some("Lyon".to_string()),
                country: "FR".to_string(),
                ..AddressSnapshot::default()
            },
            scheduled_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            slot_id: None,
            zone_id: None,
            carrier_id: None,
            moves,
        }
    }

    fn run(picking: &mut StockPicking, command: PickingCommand) -> Vec<PickingEvent> {
        let events = picking.handle(&command).unwrap();
        for e in &events {
            picking.apply(e);
        }
        events
    }

    fn created(plan: PlannedPicking) -> StockPicking {
        let mut picking = StockPicking::empty(plan.picking_id);
        run(
            &mut picking,
            PickingCommand::CreatePicking(CreatePicking {
                plan,
                occurred_at: test_time(),
            }),
        );
        picking
    }

    #[test]
    fn create_picking_copies_the_plan() {
        let d = DispatchId::generate();
        let picking = created(plan(Some(d), vec![mv(Some(d), dec!(4))]));
        assert_eq!(picking.dispatch_id(), Some(d));
        assert_eq!(picking.state(), PickingState::Draft);
        assert_eq!(picking.address().city.as_deref(), Some("Lyon"));
        assert_eq!(picking.version(), 1);
    }

    #[test]
    fn picking_dispatch_reference_must_match_its_moves() {
        let d1 = DispatchId::generate();
        let d2 = DispatchId::generate();
        let bad = plan(Some(d1), vec![mv(Some(d1), dec!(1)), mv(Some(d2), dec!(1))]);
        let err = StockPicking::empty(bad.picking_id)
            .handle(&PickingCommand::CreatePicking(CreatePicking {
                plan: bad,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn lifecycle_reports_dispatches() {
        let d = DispatchId::generate();
        let mut picking = created(plan(Some(d), vec![mv(Some(d), dec!(4))]));
        let id = picking.id_typed();
        run(
            &mut picking,
            PickingCommand::ConfirmPicking(ConfirmPicking {
                picking_id: id,
                occurred_at: test_time(),
            }),
        );
        let events = run(
            &mut picking,
            PickingCommand::AssignPicking(AssignPicking {
                picking_id: id,
                occurred_at: test_time(),
            }),
        );
        match &events[..] {
            [PickingEvent::PickingAssigned(e)] => assert_eq!(e.dispatch_ids, vec![d]),
            other => panic!("expected PickingAssigned, got {other:?}"),
        }

        let not_in_transit = PickingCommand::ValidatePicking(ValidatePicking {
            picking_id: id,
            in_transit: vec![],
            occurred_at: test_time(),
        });
        assert!(picking.handle(&not_in_transit).is_err());

        run(
            &mut picking,
            PickingCommand::ValidatePicking(ValidatePicking {
                picking_id: id,
                in_transit: vec![d],
                occurred_at: test_time(),
            }),
        );
        assert_eq!(picking.state(), PickingState::Done);
    }

    #[test]
    fn cancel_detaches_dispatches_without_dropping_moves() {
        let d1 = DispatchId::generate();
        let d2 = DispatchId::generate();
        let mut picking = created(plan(None, vec![mv(Some(d1), dec!(4)), mv(Some(d2), dec!(6))]));
        let id = picking.id_typed();
        let events = run(
            &mut picking,
            PickingCommand::CancelPicking(CancelPicking {
                picking_id: id,
                occurred_at: test_time(),
            }),
        );
        match &events[..] {
            [PickingEvent::PickingCancelled(e)] => {
                let detached: BTreeSet<_> = e.detached_dispatch_ids.iter().copied().collect();
                assert_eq!(detached, BTreeSet::from([d1, d2]));
            }
            other => panic!("expected PickingCancelled, got {other:?}"),
        }
        assert_eq!(picking.state(), PickingState::Cancelled);
        assert_eq!(picking.moves().len(), 2);
        assert!(picking.moves().iter().all(|m| m.dispatch_id.is_none()));
        assert!(picking.dispatch_ids().is_empty());
    }

    #[test]
    fn merge_keeps_dispatches_apart() {
        let d1 = DispatchId::generate();
        let d2 = DispatchId::generate();
        let product = ProductId::generate();
        let mut m1 = mv(Some(d1), dec!(4));
        let mut m2 = mv(Some(d2), dec!(6));
        let mut m3 = mv(Some(d2), dec!(1));
        m1.product_id = product;
        m2.product_id = product;
        m3.product_id = product;
        let mut picking = created(plan(None, vec![m1, m2, m3]));
        let id = picking.id_typed();

        run(
            &mut picking,
            PickingCommand::MergeMoves(MergeMoves {
                picking_id: id,
                occurred_at: test_time(),
            }),
        );
        assert_eq!(picking.moves().len(), 2);
        assert_eq!(picking.dispatch_ids(), BTreeSet::from([d1, d2]));

        let again = picking
            .handle(&PickingCommand::MergeMoves(MergeMoves {
                picking_id: id,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn cannot_assign_a_draft_picking() {
        let picking = created(plan(None, vec![mv(None, dec!(1))]));
        let err = picking
            .handle(&PickingCommand::AssignPicking(AssignPicking {
                picking_id: picking.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
