//! Backend selection and service graph construction.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use watergile_infra::config::AppConfig;
use watergile_infra::event_store::PostgresEventStore;
use watergile_infra::services::{AppServices, Backends, Clients};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Postgres when `database.url` is set, in-memory otherwise. Projections are
/// caught up before the services are returned.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let backends = match config.database.url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
                .connect(url)
                .await
                .context("failed to connect to Postgres (APP__DATABASE__URL)")?;
            PostgresEventStore::migrate(&pool)
                .await
                .context("failed to create the database schema")?;
            info!("using Postgres storage");
            Backends::postgres(pool)
        }
        None => Backends::in_memory(),
    };

    let clients = Clients::from_config(config).context("failed to build external clients")?;
    let services = AppServices::build(backends, clients);

    let applied = services.catch_up().context("projection catch-up failed")?;
    info!(applied, "services ready");
    Ok(services)
}
