//! Dispatch-group registry.
//!
//! One group per (order, address, zone, date, slot, carrier). The registry
//! hands out the group id that the sale order aggregate then records, so two
//! writers racing on the same destination end up with the same group.

pub mod in_memory;
pub mod postgres;

use thiserror::Error;

use watergile_core::DomainError;
use watergile_sales::{DispatchGroupId, GroupKey, SaleOrderId};

pub use in_memory::InMemoryGroupStore;
pub use postgres::PostgresGroupStore;

#[derive(Debug, Error)]
pub enum GroupStoreError {
    /// Racing inserts and deletes kept the lookup from settling.
    #[error("dispatch group for this destination is contended; retry the operation")]
    Contention,
    #[error("group store backend error: {0}")]
    Backend(String),
}

impl From<GroupStoreError> for DomainError {
    fn from(value: GroupStoreError) -> Self {
        match value {
            GroupStoreError::Contention => DomainError::validation(
                "another user is creating the same dispatch group; please retry",
            ),
            GroupStoreError::Backend(msg) => {
                DomainError::validation(format!("dispatch group registry unavailable: {msg}"))
            }
        }
    }
}

pub trait GroupStore: Send + Sync {
    /// Return the group registered for `key`, creating it when absent.
    fn lookup_or_create(
        &self,
        order_id: SaleOrderId,
        key: &GroupKey,
    ) -> Result<DispatchGroupId, GroupStoreError>;

    fn lookup(
        &self,
        order_id: SaleOrderId,
        key: &GroupKey,
    ) -> Result<Option<DispatchGroupId>, GroupStoreError>;

    /// Forget a group after the order dropped it. A no-op when `group_id`
    /// is no longer the registered group for `key`.
    fn release(
        &self,
        order_id: SaleOrderId,
        key: &GroupKey,
        group_id: DispatchGroupId,
    ) -> Result<(), GroupStoreError>;
}

impl<S> GroupStore for std::sync::Arc<S>
where
    S: GroupStore + ?Sized,
{
    fn lookup_or_create(
        &self,
        order_id: SaleOrderId,
        key: &GroupKey,
    ) -> Result<DispatchGroupId, GroupStoreError> {
        (**self).lookup_or_create(order_id, key)
    }

    fn lookup(
        &self,
        order_id: SaleOrderId,
        key: &GroupKey,
    ) -> Result<Option<DispatchGroupId>, GroupStoreError> {
        (**self).lookup(order_id, key)
    }

    fn release(
        &self,
        order_id: SaleOrderId,
        key: &GroupKey,
        group_id: DispatchGroupId,
    ) -> Result<(), GroupStoreError> {
        (**self).release(order_id, key, group_id)
    }
}
