//! Record storage for entities and read models.

pub mod postgres;
pub mod store;

pub use postgres::PostgresRecordStore;
pub use store::{InMemoryRecordStore, RecordStore, StoreError};
