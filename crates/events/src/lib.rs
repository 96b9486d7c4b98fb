//! `watergile-events` — event mechanics shared by every aggregate.
//!
//! Storage-agnostic: the event store and projections' persistence live in
//! `watergile-infra`.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
