//! Infrastructure layer: event store, projections, record stores, external
//! validation clients, configuration and the application services.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod external;
pub mod group_store;
pub mod projections;
pub mod read_model;
pub mod services;
pub mod sync;
pub mod workers;

/// Aggregate type tags stored with every event.
pub mod aggregate_types {
    pub const SALE_ORDER: &str = "sales.order";
    pub const PARTNER: &str = "parties.partner";
    pub const PICKING: &str = "stock.picking";
    pub const PRODUCT: &str = "products.product";
}
