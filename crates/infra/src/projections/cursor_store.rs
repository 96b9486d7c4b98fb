//! Projection cursor/offset persistence.
//!
//! Tracks the last processed sequence_number per (projection, aggregate)
//! stream so that:
//! - replays at or below the cursor are ignored (idempotent projections)
//! - a restarted worker resumes where it stopped
//! - a rebuild starts from scratch once the cursors are cleared

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use sqlx::{PgPool, Row};

use watergile_core::AggregateId;

use crate::event_store::postgres::block_on;
use crate::read_model::StoreError;

pub trait ProjectionCursorStore: Send + Sync {
    /// Last processed sequence_number of one stream, `None` before the first.
    fn get_cursor(
        &self,
        projection_name: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<u64>, StoreError>;

    fn update_cursor(
        &self,
        projection_name: &str,
        aggregate_id: AggregateId,
        sequence_number: u64,
    ) -> Result<(), StoreError>;

    /// Forget every cursor of a projection (for rebuilds).
    fn clear_cursors(&self, projection_name: &str) -> Result<(), StoreError>;
}

impl<C> ProjectionCursorStore for Arc<C>
where
    C: ProjectionCursorStore + ?Sized,
{
    fn get_cursor(
        &self,
        projection_name: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<u64>, StoreError> {
        (**self).get_cursor(projection_name, aggregate_id)
    }

    fn update_cursor(
        &self,
        projection_name: &str,
        aggregate_id: AggregateId,
        sequence_number: u64,
    ) -> Result<(), StoreError> {
        (**self).update_cursor(projection_name, aggregate_id, sequence_number)
    }

    fn clear_cursors(&self, projection_name: &str) -> Result<(), StoreError> {
        (**self).clear_cursors(projection_name)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<BTreeMap<(String, AggregateId), u64>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

impl ProjectionCursorStore for InMemoryCursorStore {
    fn get_cursor(
        &self,
        projection_name: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<u64>, StoreError> {
        let cursors = self.cursors.read().map_err(|_| poisoned())?;
        Ok(cursors
            .get(&(projection_name.to_string(), aggregate_id))
            .copied())
    }

    fn update_cursor(
        &self,
        projection_name: &str,
        aggregate_id: AggregateId,
        sequence_number: u64,
    ) -> Result<(), StoreError> {
        let mut cursors = self.cursors.write().map_err(|_| poisoned())?;
        cursors.insert((projection_name.to_string(), aggregate_id), sequence_number);
        Ok(())
    }

    fn clear_cursors(&self, projection_name: &str) -> Result<(), StoreError> {
        let mut cursors = self.cursors.write().map_err(|_| poisoned())?;
        cursors.retain(|(name, _), _| name != projection_name);
        Ok(())
    }
}

/// Postgres-backed cursor store (`projection_offsets`).
#[derive(Debug, Clone)]
pub struct PostgresCursorStore {
    pool: Arc<PgPool>,
}

impl PostgresCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl ProjectionCursorStore for PostgresCursorStore {
    fn get_cursor(
        &self,
        projection_name: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<u64>, StoreError> {
        let pool = self.pool.clone();
        let aggregate_uuid = *aggregate_id.as_uuid();
        block_on(async move {
            let row = sqlx::query(
                r#"
                SELECT last_sequence_number
                FROM projection_offsets
                WHERE projection_name = $1 AND aggregate_id = $2
                "#,
            )
            .bind(projection_name)
            .bind(aggregate_uuid)
            .fetch_optional(&*pool)
            .await
            .map_err(backend)?;

            row.map(|r| r.try_get::<i64, _>("last_sequence_number").map(|s| s as u64))
                .transpose()
                .map_err(backend)
        })
        .map_err(StoreError::Backend)?
    }

    fn update_cursor(
        &self,
        projection_name: &str,
        aggregate_id: AggregateId,
        sequence_number: u64,
    ) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        let aggregate_uuid = *aggregate_id.as_uuid();
        block_on(async move {
            sqlx::query(
                r#"
                INSERT INTO projection_offsets (projection_name, aggregate_id, last_sequence_number)
                VALUES ($1, $2, $3)
                ON CONFLICT (projection_name, aggregate_id)
                DO UPDATE SET
                    last_sequence_number = EXCLUDED.last_sequence_number,
                    updated_at = NOW()
                "#,
            )
            .bind(projection_name)
            .bind(aggregate_uuid)
            .bind(sequence_number as i64)
            .execute(&*pool)
            .await
            .map(|_| ())
            .map_err(backend)
        })
        .map_err(StoreError::Backend)?
    }

    fn clear_cursors(&self, projection_name: &str) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        block_on(async move {
            sqlx::query("DELETE FROM projection_offsets WHERE projection_name = $1")
                .bind(projection_name)
                .execute(&*pool)
                .await
                .map(|_| ())
                .map_err(backend)
        })
        .map_err(StoreError::Backend)?
    }
}
