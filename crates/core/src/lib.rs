//! `watergile-core` — domain foundation building blocks.
//!
//! Pure domain primitives shared by every business crate: identifiers, the
//! domain error model and the aggregate/entity/value-object traits.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::AggregateId;
pub use value_object::{CountryCode, ValueObject};
