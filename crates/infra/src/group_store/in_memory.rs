use std::collections::BTreeMap;
use std::sync::Mutex;

use watergile_sales::{DispatchGroupId, GroupKey, SaleOrderId};

use super::{GroupStore, GroupStoreError};

#[derive(Debug, Default)]
pub struct InMemoryGroupStore {
    groups: Mutex<BTreeMap<(SaleOrderId, GroupKey), DispatchGroupId>>,
}

impl InMemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> GroupStoreError {
    GroupStoreError::Backend("lock poisoned".to_string())
}

impl GroupStore for InMemoryGroupStore {
    fn lookup_or_create(
        &self,
        order_id: SaleOrderId,
        key: &GroupKey,
    ) -> Result<DispatchGroupId, GroupStoreError> {
        let mut groups = self.groups.lock().map_err(|_| poisoned())?;
        Ok(*groups
            .entry((order_id, *key))
            .or_insert_with(DispatchGroupId::generate))
    }

    fn lookup(
        &self,
        order_id: SaleOrderId,
        key: &GroupKey,
    ) -> Result<Option<DispatchGroupId>, GroupStoreError> {
        let groups = self.groups.lock().map_err(|_| poisoned())?;
        Ok(groups.get(&(order_id, *key)).copied())
    }

    fn release(
        &self,
        order_id: SaleOrderId,
        key: &GroupKey,
        group_id: DispatchGroupId,
    ) -> Result<(), GroupStoreError> {
        let mut groups = self.groups.lock().map_err(|_| poisoned())?;
        if groups.get(&(order_id, *key)) == Some(&group_id) {
            groups.remove(&(order_id, *key));
        }
        Ok(())
    }
}
