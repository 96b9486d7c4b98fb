//! Picking planning: turns a confirmed order into pickings.
//!
//! Dispatch-mode orders get one picking per dispatch group and one move per
//! dispatch; standard orders get a single picking with one move per line.
//! Identifiers are derived from the group, dispatch or line they come from,
//! so planning the same order twice yields the same pickings.

use std::collections::BTreeMap;

use watergile_core::DomainError;
use watergile_parties::{AddressId, PartnerAddress};
use watergile_products::Pricelist;
use watergile_sales::{DeliveryMode, SaleOrder, SaleOrderStatus, price_dispatch};

use crate::picking::{AddressSnapshot, MoveId, PickingId, PlannedPicking, StockMove};

const PICKING_SALT: u64 = 0x5049_434b;
const MOVE_SALT: u64 = 0x4d4f_5645;

pub fn picking_name(order_name: &str, sequence: u32) -> String {
    format!("WH/OUT/{order_name}/{sequence:03}")
}

fn ensure_confirmed(order: &SaleOrder) -> Result<(), DomainError> {
    if order.status() != SaleOrderStatus::Confirmed {
        return Err(DomainError::invariant("only confirmed orders can be planned"));
    }
    Ok(())
}

fn snapshot(
    addresses: &BTreeMap<AddressId, PartnerAddress>,
    address_id: AddressId,
) -> Result<AddressSnapshot, DomainError> {
    addresses
        .get(&address_id)
        .map(AddressSnapshot::from)
        .ok_or_else(|| DomainError::validation(format!("delivery address {address_id} is unknown")))
}

/// One picking per dispatch group of a confirmed dispatch-mode order.
///
/// Cancelled dispatches are left out; a group without active dispatches
/// yields no picking.
pub fn plan_pickings(
    order: &SaleOrder,
    addresses: &BTreeMap<AddressId, PartnerAddress>,
    pricelists: &[Pricelist],
) -> Result<Vec<PlannedPicking>, DomainError> {
    ensure_confirmed(order)?;
    if order.delivery_mode() != DeliveryMode::Dispatch {
        return Err(DomainError::invariant("order is not in dispatch delivery mode"));
    }

    let mut groups: Vec<_> = order.groups().collect();
    groups.sort_by_key(|g| g.sequence);

    let mut planned = Vec::with_capacity(groups.len());
    for group in groups {
        let dispatches: Vec<_> = group
            .dispatch_ids
            .iter()
            .filter_map(|id| order.dispatch(*id))
            .filter(|d| d.is_active())
            .collect();
        if dispatches.is_empty() {
            continue;
        }

        let mut moves = Vec::with_capacity(dispatches.len());
        for dispatch in &dispatches {
            let line = order.line(dispatch.line_no).ok_or_else(|| {
                DomainError::invariant(format!("dispatch {} points to a missing line", dispatch.name))
            })?;
            let price = price_dispatch(pricelists, line, dispatch);
            moves.push(StockMove {
                id: MoveId::new(dispatch.id.aggregate_id().derive(MOVE_SALT)),
                product_id: dispatch.product_id,
                quantity: dispatch.quantity,
                unit_price: price.unit_price,
                dispatch_id: Some(dispatch.id),
                origin: order.name().to_string(),
            });
        }

        let dispatch_id = match dispatches.as_slice() {
            [only] => Some(only.id),
            _ => None,
        };
        planned.push(PlannedPicking {
            picking_id: PickingId::new(group.id.aggregate_id().derive(PICKING_SALT)),
            name: picking_name(order.name(), group.sequence),
            order_id: order.id_typed(),
            group_id: Some(group.id),
            dispatch_id,
            address: snapshot(addresses, group.key.address_id)?,
            scheduled_date: group.key.date,
            slot_id: group.key.slot_id,
            zone_id: group.key.zone_id,
            carrier_id: group.key.carrier_id,
            moves,
        });
    }
    Ok(planned)
}

/// Single picking for a confirmed standard-mode order.
pub fn plan_standard_picking(
    order: &SaleOrder,
    address: &PartnerAddress,
    scheduled_date: chrono::NaiveDate,
) -> Result<PlannedPicking, DomainError> {
    ensure_confirmed(order)?;
    if order.delivery_mode() != DeliveryMode::Standard {
        return Err(DomainError::invariant("dispatch orders are planned per group"));
    }

    let order_id = order.id_typed();
    let moves = order
        .lines()
        .iter()
        .map(|line| StockMove {
            id: MoveId::new(order_id.aggregate_id().derive(MOVE_SALT + u64::from(line.line_no))),
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
            dispatch_id: None,
            origin: order.name().to_string(),
        })
        .collect();

    Ok(PlannedPicking {
        picking_id: PickingId::new(order_id.aggregate_id().derive(PICKING_SALT)),
        name: picking_name(order.name(), 1),
        order_id,
        group_id: None,
        dispatch_id: None,
        address: AddressSnapshot::from(address),
        scheduled_date,
        slot_id: None,
        zone_id: None,
        carrier_id: None,
        moves,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use watergile_core::{Aggregate, CountryCode};
    use watergile_delivery::{CarrierId, SlotId, ZoneId};
    use watergile_parties::{AddressInput, AddressType, PartnerId};
    use watergile_products::ProductId;
    use watergile_sales::{
        AddLine, AddStakeholder, AddressRef, ConfirmOrder, CreateSaleOrder, DispatchId,
        DispatchTarget, ExpandLine, LineProduct, Route, SaleOrderCommand, SaleOrderId,
    };

    fn addr(owner: PartnerId, name: &str) -> PartnerAddress {
        PartnerAddress::new(
            AddressId::generate(),
            AddressInput {
                name: name.to_string(),
                owners: vec![owner],
                street: Some("12 rue de la Paix".to_string()),
                street2: None,
                zip: Some("69001".to_string()),
                city: Some("Lyon".to_string()),
                country: CountryCode::france(),
                address_type: AddressType::Delivery,
            },
        )
        .unwrap()
    }

    fn run(order: &mut SaleOrder, cmd: SaleOrderCommand) {
        for e in order.handle(&cmd).unwrap() {
            order.apply(&e);
        }
    }

    /// Confirmed order: one line of 10 split 4/6 between A and B.
    fn confirmed_order(shared_address: bool) -> (SaleOrder, BTreeMap<AddressId, PartnerAddress>) {
        let at = Utc.with_ymd_and_hms(2024, 5, 20, 9, 0, 0).unwrap();
        let order_id = SaleOrderId::generate();
        let a = PartnerId::generate();
        let b = PartnerId::generate();
        let zone = ZoneId::generate();
        let carrier = CarrierId::generate();
        let slot = SlotId::generate();
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let mut addr_a = addr(a, "Entrepôt A");
        let addr_b = if shared_address {
            addr_a.owners.push(b);
            addr_a.clone()
        } else {
            addr(b, "Entrepôt B")
        };
        let mut addresses = BTreeMap::new();
        addresses.insert(addr_a.id, addr_a.clone());
        addresses.insert(addr_b.id, addr_b.clone());

        let mut order = SaleOrder::empty(order_id);
        run(
            &mut order,
            SaleOrderCommand::CreateSaleOrder(CreateSaleOrder {
                order_id,
                name: "S00042".to_string(),
                customer_id: PartnerId::generate(),
                delivery_mode: DeliveryMode::Dispatch,
                occurred_at: at,
            }),
        );
        for (p, n) in [(a, "A"), (b, "B")] {
            run(
                &mut order,
                SaleOrderCommand::AddStakeholder(AddStakeholder {
                    order_id,
                    partner_id: p,
                    name: n.to_string(),
                    occurred_at: at,
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
                quantity: dec!(10),
                unit_price: dec!(5),
                occurred_at: at,
            }),
        );
        let target = |p: PartnerId, address: &PartnerAddress, qty: Decimal| DispatchTarget {
            dispatch_id: DispatchId::generate(),
            stakeholder_id: p,
            address: AddressRef::from(address),
            date,
            slot_id: Some(slot),
            zone_id: Some(zone),
            carrier_id: Some(carrier),
            quantity: qty,
            group_id: None,
        };
        run(
            &mut order,
            SaleOrderCommand::ExpandLine(ExpandLine {
                order_id,
                line_no: 1,
                targets: vec![target(a, &addr_a, dec!(4)), target(b, &addr_b, dec!(6))],
                business_date: NaiveDate::from_ymd_opt(2024, 5, 20).unwrap(),
                occurred_at: at,
            }),
        );
        run(
            &mut order,
            SaleOrderCommand::ConfirmOrder(ConfirmOrder {
                order_id,
                routes: vec![Route {
                    zone_id: zone,
                    carrier_id: carrier,
                }],
                occurred_at: at,
            }),
        );
        (order, addresses)
    }

    #[test]
    fn one_picking_per_group_each_carrying_its_dispatch() {
        let (order, addresses) = confirmed_order(false);
        let planned = plan_pickings(&order, &addresses, &[]).unwrap();
        assert_eq!(planned.len(), 2);
        for picking in &planned {
            assert_eq!(picking.moves.len(), 1);
            assert_eq!(picking.dispatch_id, picking.moves[0].dispatch_id);
            assert!(picking.dispatch_id.is_some());
            assert_eq!(picking.address.city.as_deref(), Some("Lyon"));
            assert_eq!(picking.order_id, order.id_typed());
        }
        assert_eq!(planned[0].name, "WH/OUT/S00042/001");
        assert_eq!(planned[1].name, "WH/OUT/S00042/002");
    }

    #[test]
    fn shared_destination_gives_one_picking_with_two_moves() {
        let (order, addresses) = confirmed_order(true);
        let planned = plan_pickings(&order, &addresses, &[]).unwrap();
        assert_eq!(planned.len(), 1);
        let picking = &planned[0];
        assert_eq!(picking.moves.len(), 2);
        assert_eq!(picking.dispatch_id, None);
        assert_eq!(crate::merge_moves(&picking.moves).len(), 2);
    }

    #[test]
    fn planning_is_deterministic() {
        let (order, addresses) = confirmed_order(false);
        assert_eq!(
            plan_pickings(&order, &addresses, &[]).unwrap(),
            plan_pickings(&order, &addresses, &[]).unwrap()
        );
    }

    #[test]
    fn draft_orders_cannot_be_planned() {
        let order = SaleOrder::empty(SaleOrderId::generate());
        let err = plan_pickings(&order, &BTreeMap::new(), &[]).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
