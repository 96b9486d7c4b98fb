//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend selection and the service graph
//! - `routes/`: JSON API handlers, one file per domain area
//! - `website.rs`: public pages and the contact form
//! - `dto.rs`: request bodies and JSON mapping of aggregates
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use watergile_infra::services::AppServices;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;
pub mod website;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    let messages: website::ContactMessages = services.backends.records("contact_messages");

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/info", get(routes::system::info))
        .merge(website::router())
        .merge(routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services))
                .layer(Extension(messages)),
        )
}
