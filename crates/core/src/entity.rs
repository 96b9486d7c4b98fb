//! Entity trait: identity + continuity across state changes.
//!
//! Implemented by the records kept in key/value repositories rather than
//! event streams (addresses, zones, carriers, slots, ...).

pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
