//! Pricing of dispatch lines through zone- and partner-gated pricelists.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use watergile_products::{Pricelist, PricelistId, select_pricelist};

use crate::dispatch::Dispatch;
use crate::order::OrderLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPrice {
    /// Pricelist that supplied the price, if any.
    pub pricelist_id: Option<PricelistId>,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

/// Price of `dispatch`: the first pricelist applicable to its stakeholder and
/// zone, falling back to the line price when none applies or the pricelist
/// has no item for the product.
pub fn price_dispatch(pricelists: &[Pricelist], line: &OrderLine, dispatch: &Dispatch) -> DispatchPrice {
    let selected = select_pricelist(pricelists, dispatch.stakeholder_id, dispatch.zone_id);
    let (pricelist_id, unit_price) = match selected.and_then(|pl| {
        pl.price_for(line.product_id).map(|price| (pl.id, price))
    }) {
        Some((id, price)) => (Some(id), price),
        None => (None, line.unit_price),
    };
    DispatchPrice {
        pricelist_id,
        unit_price,
        subtotal: unit_price * dispatch.quantity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchId, DispatchState};
    use crate::group::DispatchGroupId;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;
    use watergile_delivery::ZoneId;
    use watergile_parties::{AddressId, PartnerId};
    use watergile_products::{PricelistInput, PricelistItem, ProductId};

    fn line(product_id: ProductId) -> OrderLine {
        OrderLine {
            line_no: 1,
            product_id,
            dispatchable: true,
            product_zone_ids: BTreeSet::new(),
            quantity: dec!(10),
            unit_price: dec!(12.00),
        }
    }

    fn dispatch(stakeholder: PartnerId, zone: Option<ZoneId>) -> Dispatch {
        Dispatch {
            id: DispatchId::generate(),
            name: "S1-L1-A".to_string(),
            line_no: 1,
            product_id: ProductId::generate(),
            stakeholder_id: stakeholder,
            address_id: AddressId::generate(),
            quantity: dec!(4),
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            slot_id: None,
            zone_id: zone,
            carrier_id: None,
            group_id: DispatchGroupId::generate(),
            state: DispatchState::Draft,
        }
    }

    #[test]
    fn applicable_pricelist_price_wins() {
        let product = ProductId::generate();
        let a = PartnerId::generate();
        let z1 = ZoneId::generate();
        let pl = Pricelist::new(
            PricelistId::generate(),
            PricelistInput {
                name: "Nord".to_string(),
                partner_ids: vec![a],
                zone_ids: vec![z1],
                items: vec![PricelistItem {
                    product_id: product,
                    fixed_price: dec!(10.00),
                }],
            },
        )
        .unwrap();
        let pricelists = vec![pl.clone()];

        let price = price_dispatch(&pricelists, &line(product), &dispatch(a, Some(z1)));
        assert_eq!(price.pricelist_id, Some(pl.id));
        assert_eq!(price.unit_price, dec!(10.00));
        assert_eq!(price.subtotal, dec!(40.00));

        let price = price_dispatch(&pricelists, &line(product), &dispatch(a, Some(ZoneId::generate())));
        assert_eq!(price.pricelist_id, None);
        assert_eq!(price.unit_price, dec!(12.00));
    }

    #[test]
    fn pricelist_without_item_falls_back_to_line_price() {
        let pl = Pricelist::new(
            PricelistId::generate(),
            PricelistInput {
                name: "Public".to_string(),
                partner_ids: vec![],
                zone_ids: vec![],
                items: vec![],
            },
        )
        .unwrap();
        let product = ProductId::generate();
        let price = price_dispatch(&[pl], &line(product), &dispatch(PartnerId::generate(), None));
        assert_eq!(price.pricelist_id, None);
        assert_eq!(price.subtotal, dec!(48.00));
    }
}
