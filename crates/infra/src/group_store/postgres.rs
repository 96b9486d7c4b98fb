use std::sync::Arc;

use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use watergile_core::AggregateId;
use watergile_sales::{DispatchGroupId, GroupKey, SaleOrderId};

use super::{GroupStore, GroupStoreError};
use crate::event_store::postgres::block_on;

const MAX_ATTEMPTS: u32 = 5;

/// Registry backed by the `dispatch_groups` table and its unique key.
#[derive(Debug, Clone)]
pub struct PostgresGroupStore {
    pool: Arc<PgPool>,
}

impl PostgresGroupStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Insert-or-nothing, then read back. A racing insert makes the
    /// `ON CONFLICT DO NOTHING` return no row; the follow-up select then
    /// sees the winner. A racing delete between the two can leave both
    /// empty, so the pair is retried.
    #[instrument(skip(self), fields(%order_id), err)]
    pub async fn lookup_or_create_async(
        &self,
        order_id: SaleOrderId,
        key: &GroupKey,
    ) -> Result<DispatchGroupId, GroupStoreError> {
        for attempt in 1..=MAX_ATTEMPTS {
            let candidate = DispatchGroupId::generate();
            let inserted = sqlx::query(
                r#"
                INSERT INTO dispatch_groups
                    (group_id, order_id, address_id, zone_id, planned_on, slot_id, carrier_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT ON CONSTRAINT dispatch_groups_key DO NOTHING
                RETURNING group_id
                "#,
            )
            .bind(*candidate.aggregate_id().as_uuid())
            .bind(*order_id.aggregate_id().as_uuid())
            .bind(*key.address_id.aggregate_id().as_uuid())
            .bind(key.zone_id.map(|z| *z.aggregate_id().as_uuid()))
            .bind(key.date)
            .bind(key.slot_id.map(|s| *s.aggregate_id().as_uuid()))
            .bind(key.carrier_id.map(|c| *c.aggregate_id().as_uuid()))
            .fetch_optional(&*self.pool)
            .await
            .map_err(backend)?;

            if inserted.is_some() {
                return Ok(candidate);
            }
            if let Some(existing) = self.lookup_async(order_id, key).await? {
                return Ok(existing);
            }
            debug!(attempt, "dispatch group vanished between insert and lookup; retrying");
        }
        Err(GroupStoreError::Contention)
    }

    pub async fn lookup_async(
        &self,
        order_id: SaleOrderId,
        key: &GroupKey,
    ) -> Result<Option<DispatchGroupId>, GroupStoreError> {
        let row = sqlx::query(
            r#"
            SELECT group_id FROM dispatch_groups
            WHERE order_id = $1 AND address_id = $2
              AND zone_id IS NOT DISTINCT FROM $3
              AND planned_on = $4
              AND slot_id IS NOT DISTINCT FROM $5
              AND carrier_id IS NOT DISTINCT FROM $6
            "#,
        )
        .bind(*order_id.aggregate_id().as_uuid())
        .bind(*key.address_id.aggregate_id().as_uuid())
        .bind(key.zone_id.map(|z| *z.aggregate_id().as_uuid()))
        .bind(key.date)
        .bind(key.slot_id.map(|s| *s.aggregate_id().as_uuid()))
        .bind(key.carrier_id.map(|c| *c.aggregate_id().as_uuid()))
        .fetch_optional(&*self.pool)
        .await
        .map_err(backend)?;

        row.map(|r| {
            r.try_get::<uuid::Uuid, _>("group_id")
                .map(|u| DispatchGroupId::new(AggregateId::from_uuid(u)))
                .map_err(backend)
        })
        .transpose()
    }

    pub async fn release_async(
        &self,
        order_id: SaleOrderId,
        group_id: DispatchGroupId,
    ) -> Result<(), GroupStoreError> {
        sqlx::query("DELETE FROM dispatch_groups WHERE order_id = $1 AND group_id = $2")
            .bind(*order_id.aggregate_id().as_uuid())
            .bind(*group_id.aggregate_id().as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

fn backend(err: sqlx::Error) -> GroupStoreError {
    GroupStoreError::Backend(err.to_string())
}

impl GroupStore for PostgresGroupStore {
    fn lookup_or_create(
        &self,
        order_id: SaleOrderId,
        key: &GroupKey,
    ) -> Result<DispatchGroupId, GroupStoreError> {
        block_on(self.lookup_or_create_async(order_id, key)).map_err(GroupStoreError::Backend)?
    }

    fn lookup(
        &self,
        order_id: SaleOrderId,
        key: &GroupKey,
    ) -> Result<Option<DispatchGroupId>, GroupStoreError> {
        block_on(self.lookup_async(order_id, key)).map_err(GroupStoreError::Backend)?
    }

    fn release(
        &self,
        order_id: SaleOrderId,
        _key: &GroupKey,
        group_id: DispatchGroupId,
    ) -> Result<(), GroupStoreError> {
        block_on(self.release_async(order_id, group_id)).map_err(GroupStoreError::Backend)?
    }
}
