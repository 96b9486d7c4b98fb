//! Postgres-backed record store: one JSON document per key, partitioned by
//! collection name in the `records` table.

use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{PgPool, Row};

use super::store::{RecordStore, StoreError};
use crate::event_store::postgres::block_on;

pub struct PostgresRecordStore<K, V> {
    pool: Arc<PgPool>,
    collection: String,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> PostgresRecordStore<K, V> {
    pub fn new(pool: PgPool, collection: impl Into<String>) -> Self {
        Self {
            pool: Arc::new(pool),
            collection: collection.into(),
            _marker: PhantomData,
        }
    }
}

fn backend(op: &str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("{op}: {err}"))
}

impl<K, V> PostgresRecordStore<K, V>
where
    K: Display,
    V: Serialize + DeserializeOwned,
{
    async fn get_async(&self, key: &K) -> Result<Option<V>, StoreError> {
        let row = sqlx::query("SELECT document FROM records WHERE collection = $1 AND record_key = $2")
            .bind(&self.collection)
            .bind(key.to_string())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| backend("get", e))?;
        row.map(|r| decode(&r)).transpose()
    }

    async fn upsert_async(&self, key: K, value: V) -> Result<(), StoreError> {
        let document = serde_json::to_value(&value).map_err(|e| StoreError::Codec(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO records (collection, record_key, document)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, record_key)
            DO UPDATE SET document = EXCLUDED.document, updated_at = NOW()
            "#,
        )
        .bind(&self.collection)
        .bind(key.to_string())
        .bind(document)
        .execute(&*self.pool)
        .await
        .map_err(|e| backend("upsert", e))?;
        Ok(())
    }

    async fn remove_async(&self, key: &K) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM records WHERE collection = $1 AND record_key = $2")
            .bind(&self.collection)
            .bind(key.to_string())
            .execute(&*self.pool)
            .await
            .map_err(|e| backend("remove", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_async(&self) -> Result<Vec<V>, StoreError> {
        let rows = sqlx::query("SELECT document FROM records WHERE collection = $1 ORDER BY record_key")
            .bind(&self.collection)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| backend("list", e))?;
        rows.iter().map(decode).collect()
    }

    async fn clear_async(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM records WHERE collection = $1")
            .bind(&self.collection)
            .execute(&*self.pool)
            .await
            .map_err(|e| backend("clear", e))?;
        Ok(())
    }
}

fn decode<V: DeserializeOwned>(row: &sqlx::postgres::PgRow) -> Result<V, StoreError> {
    let document: serde_json::Value = row.try_get("document").map_err(|e| backend("decode", e))?;
    serde_json::from_value(document).map_err(|e| StoreError::Codec(e.to_string()))
}

impl<K, V> RecordStore<K, V> for PostgresRecordStore<K, V>
where
    K: Display + Send + Sync,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        block_on(self.get_async(key)).map_err(StoreError::Backend)?
    }

    fn upsert(&self, key: K, value: V) -> Result<(), StoreError> {
        block_on(self.upsert_async(key, value)).map_err(StoreError::Backend)?
    }

    fn remove(&self, key: &K) -> Result<bool, StoreError> {
        block_on(self.remove_async(key)).map_err(StoreError::Backend)?
    }

    fn list(&self) -> Result<Vec<V>, StoreError> {
        block_on(self.list_async()).map_err(StoreError::Backend)?
    }

    fn clear(&self) -> Result<(), StoreError> {
        block_on(self.clear_async()).map_err(StoreError::Backend)?
    }
}
