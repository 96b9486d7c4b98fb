//! Dispatch records: one share of an order line routed to a stakeholder.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use watergile_delivery::{CarrierId, SlotId, ZoneId};
use watergile_parties::{AddressId, PartnerAddress, PartnerId};
use watergile_products::ProductId;

use crate::group::{DispatchGroupId, GroupKey};

watergile_core::domain_id!(
    /// Dispatch identifier.
    DispatchId
);

/// Per-dispatch lifecycle.
///
/// `draft → confirmed → in_transit → done`, with `cancelled` reachable from
/// every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    #[default]
    Draft,
    Confirmed,
    InTransit,
    Done,
    Cancelled,
}

impl DispatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchState::Done | DispatchState::Cancelled)
    }

    pub fn can_transition_to(self, target: DispatchState) -> bool {
        use DispatchState::*;
        match (self, target) {
            (Draft, Confirmed) | (Confirmed, InTransit) | (InTransit, Done) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DispatchState::Draft => "draft",
            DispatchState::Confirmed => "confirmed",
            DispatchState::InTransit => "in_transit",
            DispatchState::Done => "done",
            DispatchState::Cancelled => "cancelled",
        }
    }
}

/// Snapshot of a delivery address as seen by the order: identity, display
/// name and owning partners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRef {
    pub address_id: AddressId,
    pub name: String,
    pub owners: Vec<PartnerId>,
}

impl AddressRef {
    pub fn owned_by(&self, partner: PartnerId) -> bool {
        self.owners.contains(&partner)
    }
}

impl From<&PartnerAddress> for AddressRef {
    fn from(address: &PartnerAddress) -> Self {
        Self {
            address_id: address.id,
            name: address.name.clone(),
            owners: address.owners.clone(),
        }
    }
}

/// One requested share of a line.
///
/// Zone and carrier are resolved by the caller (zone from the address when
/// not chosen explicitly). `group_id` is the registry's answer for the group
/// key; when absent the order reuses its group for the key or opens one named
/// after the dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTarget {
    pub dispatch_id: DispatchId,
    pub stakeholder_id: PartnerId,
    pub address: AddressRef,
    pub date: NaiveDate,
    pub slot_id: Option<SlotId>,
    pub zone_id: Option<ZoneId>,
    pub carrier_id: Option<CarrierId>,
    pub quantity: Decimal,
    #[serde(default)]
    pub group_id: Option<DispatchGroupId>,
}

impl DispatchTarget {
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            address_id: self.address.address_id,
            zone_id: self.zone_id,
            date: self.date,
            slot_id: self.slot_id,
            carrier_id: self.carrier_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: DispatchId,
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

impl Dispatch {
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            address_id: self.address_id,
            zone_id: self.zone_id,
            date: self.date,
            slot_id: self.slot_id,
            carrier_id: self.carrier_id,
        }
    }

    /// Cancelled dispatches no longer count towards their line.
    pub fn is_active(&self) -> bool {
        self.state != DispatchState::Cancelled
    }
}

pub fn dispatch_name(order_name: &str, line_no: u32, stakeholder_name: &str) -> String {
    format!("{order_name}-L{line_no}-{stakeholder_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        use DispatchState::*;
        assert!(Draft.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(InTransit));
        assert!(InTransit.can_transition_to(Done));
        assert!(Draft.can_transition_to(Cancelled));
        assert!(InTransit.can_transition_to(Cancelled));

        assert!(!Draft.can_transition_to(InTransit));
        assert!(!Confirmed.can_transition_to(Done));
        assert!(!Done.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Draft));
    }

    #[test]
    fn dispatch_name_format() {
        assert_eq!(dispatch_name("S00042", 3, "Dupont SA"), "S00042-L3-Dupont SA");
    }
}
