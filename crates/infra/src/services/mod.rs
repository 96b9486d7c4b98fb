//! Application services: the write and query paths behind the HTTP API.
//!
//! Every service runs commands through the shared [`CommandDispatcher`],
//! keeps plain records in [`RecordStore`]s and refreshes the projections it
//! reads from right after its own writes.
//!
//! ```text
//! request
//!   ↓
//! service (lookups: addresses, zones, group registry)
//!   ↓
//! CommandDispatcher → event store → bus → projection worker
//!   ↓
//! inline projection refresh (read-your-writes)
//! ```

pub mod addresses;
pub mod app;
pub mod catalog;
pub mod delivery;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod partners;
pub mod sales;
pub mod stock;

use std::fmt::Display;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use thiserror::Error;

use watergile_core::DomainError;
use watergile_events::{EventEnvelope, InMemoryEventBus};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use crate::external::ExternalError;
use crate::group_store::{GroupStore, GroupStoreError, InMemoryGroupStore, PostgresGroupStore};
use crate::projections::{
    InMemoryCursorStore, PostgresCursorStore, ProjectionCursorStore, ProjectionFailure,
};
use crate::read_model::{InMemoryRecordStore, PostgresRecordStore, RecordStore, StoreError};
use crate::sync::{CheckpointStore, InMemoryCheckpointStore, PostgresCheckpointStore};

pub use addresses::AddressService;
pub use app::{AppServices, Clients};
pub use catalog::{CatalogService, EquipmentView, NewProduct};
pub use delivery::DeliveryService;
pub use partners::{NewPartner, PartnerService};
pub use sales::{
    DispatchRequest, MassDispatchRequest, NewSaleOrder, PricedDispatch, SalesService,
    UpdateDispatchRequest,
};
pub use stock::StockService;

pub type SharedEventStore = Arc<dyn EventStore>;
pub type SharedEventBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Dispatcher = CommandDispatcher<SharedEventStore, SharedEventBus>;
pub type SharedRecords<K, V> = Arc<dyn RecordStore<K, V>>;
pub type SharedCursors = Arc<dyn ProjectionCursorStore>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("projection update failed: {0}")]
    Projection(#[from] ProjectionFailure),

    #[error(transparent)]
    External(#[from] ExternalError),
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        ServiceError::Dispatch(value.into())
    }
}

impl From<GroupStoreError> for ServiceError {
    fn from(value: GroupStoreError) -> Self {
        match value {
            GroupStoreError::Backend(msg) => ServiceError::Store(StoreError::Backend(msg)),
            contention => DomainError::from(contention).into(),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub(crate) fn not_found() -> ServiceError {
    ServiceError::Dispatch(DispatchError::NotFound)
}

/// Storage backends shared by every service: all in memory, or all on one
/// Postgres pool.
#[derive(Clone)]
pub struct Backends {
    pub events: SharedEventStore,
    pub bus: SharedEventBus,
    pub cursors: SharedCursors,
    pub groups: Arc<dyn GroupStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pool: Option<PgPool>,
}

impl Backends {
    pub fn in_memory() -> Self {
        Self {
            events: Arc::new(InMemoryEventStore::new()),
            bus: Arc::new(InMemoryEventBus::new()),
            cursors: Arc::new(InMemoryCursorStore::new()),
            groups: Arc::new(InMemoryGroupStore::new()),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            pool: None,
        }
    }

    /// The schema must exist (see [`PostgresEventStore::migrate`]).
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            events: Arc::new(PostgresEventStore::new(pool.clone())),
            bus: Arc::new(InMemoryEventBus::new()),
            cursors: Arc::new(PostgresCursorStore::new(pool.clone())),
            groups: Arc::new(PostgresGroupStore::new(pool.clone())),
            checkpoints: Arc::new(PostgresCheckpointStore::new(pool.clone())),
            pool: Some(pool),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.pool.is_some()
    }

    /// Record store for one collection.
    pub fn records<K, V>(&self, collection: &str) -> SharedRecords<K, V>
    where
        K: Ord + Clone + Display + Send + Sync + 'static,
        V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        match &self.pool {
            Some(pool) => Arc::new(PostgresRecordStore::new(pool.clone(), collection)),
            None => Arc::new(InMemoryRecordStore::new()),
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        CommandDispatcher::new(self.events.clone(), self.bus.clone())
    }
}

impl core::fmt::Debug for Backends {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Backends")
            .field("persistent", &self.is_persistent())
            .finish_non_exhaustive()
    }
}
