use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use sqlx::{PgPool, Row};

use crate::event_store::postgres::block_on;
use crate::read_model::StoreError;

/// Last committed cursor per job.
pub trait CheckpointStore: Send + Sync {
    fn load(&self, job: &str) -> Result<Option<String>, StoreError>;
    fn save(&self, job: &str, cursor: &str) -> Result<(), StoreError>;
    fn clear(&self, job: &str) -> Result<(), StoreError>;
}

impl<C> CheckpointStore for Arc<C>
where
    C: CheckpointStore + ?Sized,
{
    fn load(&self, job: &str) -> Result<Option<String>, StoreError> {
        (**self).load(job)
    }

    fn save(&self, job: &str, cursor: &str) -> Result<(), StoreError> {
        (**self).save(job, cursor)
    }

    fn clear(&self, job: &str) -> Result<(), StoreError> {
        (**self).clear(job)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    cursors: RwLock<BTreeMap<String, String>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, job: &str) -> Result<Option<String>, StoreError> {
        Ok(self.cursors.read().map_err(|_| poisoned())?.get(job).cloned())
    }

    fn save(&self, job: &str, cursor: &str) -> Result<(), StoreError> {
        self.cursors
            .write()
            .map_err(|_| poisoned())?
            .insert(job.to_string(), cursor.to_string());
        Ok(())
    }

    fn clear(&self, job: &str) -> Result<(), StoreError> {
        self.cursors.write().map_err(|_| poisoned())?.remove(job);
        Ok(())
    }
}

/// `job_checkpoints` table.
#[derive(Debug, Clone)]
pub struct PostgresCheckpointStore {
    pool: Arc<PgPool>,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl CheckpointStore for PostgresCheckpointStore {
    fn load(&self, job: &str) -> Result<Option<String>, StoreError> {
        let pool = self.pool.clone();
        block_on(async move {
            let row = sqlx::query("SELECT cursor FROM job_checkpoints WHERE job_name = $1")
                .bind(job)
                .fetch_optional(&*pool)
                .await
                .map_err(backend)?;
            row.map(|r| r.try_get::<String, _>("cursor"))
                .transpose()
                .map_err(backend)
        })
        .map_err(StoreError::Backend)?
    }

    fn save(&self, job: &str, cursor: &str) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        block_on(async move {
            sqlx::query(
                r#"
                INSERT INTO job_checkpoints (job_name, cursor)
                VALUES ($1, $2)
                ON CONFLICT (job_name)
                DO UPDATE SET cursor = EXCLUDED.cursor, updated_at = NOW()
                "#,
            )
            .bind(job)
            .bind(cursor)
            .execute(&*pool)
            .await
            .map(|_| ())
            .map_err(backend)
        })
        .map_err(StoreError::Backend)?
    }

    fn clear(&self, job: &str) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        block_on(async move {
            sqlx::query("DELETE FROM job_checkpoints WHERE job_name = $1")
                .bind(job)
                .execute(&*pool)
                .await
                .map(|_| ())
                .map_err(backend)
        })
        .map_err(StoreError::Backend)?
    }
}
