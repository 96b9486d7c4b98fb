//! Projection implementations (read model builders).
//!
//! Projections consume published envelopes and build query-optimised read
//! models. All projections are:
//! - **Rebuildable**: reconstructed from the event store on demand
//! - **Idempotent**: a per-stream cursor drops redelivered envelopes

pub mod cursor_store;
pub mod dispatches;
pub mod partners;
pub mod sales_orders;

use std::sync::Mutex;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use watergile_core::AggregateId;
use watergile_events::EventEnvelope;

use crate::event_store::{EventStore, EventStoreError};
use crate::read_model::StoreError;

pub use cursor_store::{InMemoryCursorStore, PostgresCursorStore, ProjectionCursorStore};
pub use dispatches::{DispatchReadModel, DispatchesProjection};
pub use partners::{PartnerDirectory, PartnerSummary};
pub use sales_orders::{SaleOrderLineReadModel, SaleOrderReadModel, SalesOrdersProjection};

#[derive(Debug, Error)]
pub enum ProjectionFailure {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence for {aggregate_id} (last={last}, found={found})")]
    NonMonotonicSequence {
        aggregate_id: AggregateId,
        last: u64,
        found: u64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error("projection lock poisoned")]
    Poisoned,
}

/// A read model fed by the events of one aggregate type.
///
/// `apply_event` only sees envelopes that passed the cursor check, in stream
/// order.
pub trait ReadModel: Send + Sync {
    /// Cursor namespace; must be unique per read model.
    fn name(&self) -> &'static str;

    fn aggregate_type(&self) -> &'static str;

    fn apply_event(
        &self,
        aggregate_id: AggregateId,
        payload: &JsonValue,
    ) -> Result<(), ProjectionFailure>;

    /// Drop every row (rebuilds).
    fn clear(&self) -> Result<(), StoreError>;
}

/// Read model plus the cursors that make it idempotent.
///
/// Envelopes are applied one at a time: the cursor check, the read model
/// update and the cursor write happen under one lock, so the bus worker and
/// an inline [`Checkpointed::refresh_stream`] can feed the same projection.
#[derive(Debug)]
pub struct Checkpointed<P, C> {
    read_model: P,
    cursors: C,
    gate: Mutex<()>,
}

impl<P, C> Checkpointed<P, C>
where
    P: ReadModel,
    C: ProjectionCursorStore,
{
    pub fn new(read_model: P, cursors: C) -> Self {
        Self {
            read_model,
            cursors,
            gate: Mutex::new(()),
        }
    }

    pub fn read_model(&self) -> &P {
        &self.read_model
    }

    /// Apply one envelope. Returns `false` when it was ignored (other
    /// aggregate type, or already applied).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<bool, ProjectionFailure> {
        if envelope.aggregate_type() != self.read_model.aggregate_type() {
            return Ok(false);
        }
        let _guard = self.gate.lock().map_err(|_| ProjectionFailure::Poisoned)?;

        let name = self.read_model.name();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = self.cursors.get_cursor(name, aggregate_id)?.unwrap_or(0);

        if seq == 0 {
            return Err(ProjectionFailure::NonMonotonicSequence {
                aggregate_id,
                last,
                found: seq,
            });
        }
        if seq <= last {
            debug!(projection = name, %aggregate_id, seq, "duplicate envelope ignored");
            return Ok(false);
        }
        if seq != last + 1 && last != 0 {
            return Err(ProjectionFailure::NonMonotonicSequence {
                aggregate_id,
                last,
                found: seq,
            });
        }

        self.read_model.apply_event(aggregate_id, envelope.payload())?;
        self.cursors.update_cursor(name, aggregate_id, seq)?;
        Ok(true)
    }

    /// Apply whatever the store holds beyond the cursors (startup catch-up).
    pub fn catch_up<S: EventStore + ?Sized>(&self, store: &S) -> Result<usize, ProjectionFailure> {
        let mut applied = 0;
        for event in store.load_by_type(self.read_model.aggregate_type())? {
            if self.apply_envelope(&event.to_envelope())? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Apply whatever one stream holds beyond its cursor.
    ///
    /// Services call this right after a command so their own writes are
    /// visible to the next query.
    pub fn refresh_stream<S: EventStore + ?Sized>(
        &self,
        store: &S,
        aggregate_id: AggregateId,
    ) -> Result<usize, ProjectionFailure> {
        let mut applied = 0;
        for event in store.load_stream(aggregate_id)? {
            if self.apply_envelope(&event.to_envelope())? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Clear the read model and its cursors, then replay the full history.
    pub fn rebuild_from_scratch<S: EventStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<usize, ProjectionFailure> {
        {
            let _guard = self.gate.lock().map_err(|_| ProjectionFailure::Poisoned)?;
            self.read_model.clear()?;
            self.cursors.clear_cursors(self.read_model.name())?;
        }
        self.catch_up(store)
    }
}

pub(crate) fn decode<E: serde::de::DeserializeOwned>(
    payload: &JsonValue,
) -> Result<E, ProjectionFailure> {
    serde_json::from_value(payload.clone())
        .map_err(|e| ProjectionFailure::Deserialize(e.to_string()))
}
