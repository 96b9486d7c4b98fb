use axum::Router;

pub mod addresses;
pub mod catalog;
pub mod delivery;
pub mod partners;
pub mod sales;
pub mod stock;
pub mod system;

/// Router for the JSON API.
pub fn router() -> Router {
    Router::new()
        .nest("/partners", partners::router())
        .nest("/blazes", partners::blaz_router())
        .nest("/siret", partners::siret_router())
        .nest("/addresses", addresses::router())
        .nest("/delivery", delivery::router())
        .nest("/products", catalog::products_router())
        .nest("/pricelists", catalog::pricelists_router())
        .nest("/equipment", catalog::equipment_router())
        .nest("/sales", sales::router())
        .nest("/stock", stock::router())
        .nest("/contact-messages", crate::app::website::messages_router())
}
