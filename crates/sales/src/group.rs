//! Dispatch groups: the unit of picking assembly.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use watergile_delivery::{CarrierId, SlotId, ZoneId};
use watergile_parties::AddressId;

use crate::dispatch::DispatchId;

watergile_core::domain_id!(
    /// Dispatch group identifier.
    DispatchGroupId
);

/// Two dispatches of an order share a group iff their keys are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub address_id: AddressId,
    pub zone_id: Option<ZoneId>,
    pub date: NaiveDate,
    pub slot_id: Option<SlotId>,
    pub carrier_id: Option<CarrierId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchGroup {
    pub id: DispatchGroupId,
    pub name: String,
    pub sequence: u32,
    pub key: GroupKey,
    pub dispatch_ids: BTreeSet<DispatchId>,
}

impl DispatchGroup {
    pub fn is_empty(&self) -> bool {
        self.dispatch_ids.is_empty()
    }
}

/// `GRP/{order}/{address}/{YYYYMMDD}/{seq}`
pub fn group_name(order_name: &str, address_name: &str, date: NaiveDate, sequence: u32) -> String {
    format!(
        "GRP/{order_name}/{address_name}/{}/{sequence}",
        date.format("%Y%m%d")
    )
}
