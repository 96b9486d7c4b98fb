use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;

use watergile_api::app::{build_app, services::build_services};
use watergile_infra::config::load_config;
use watergile_infra::sync::CancellationFlag;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    watergile_observability::init();

    let config = load_config().context("loading configuration")?;
    let services = Arc::new(build_services(&config).await?);

    let _projections = services
        .spawn_projection_worker()
        .context("spawning projection worker")?;

    if let Some(job) = services.siret_sync_job(&config)? {
        let interval = Duration::from_secs(config.insee.sync_interval_secs);
        tokio::spawn(async move {
            let cancel = CancellationFlag::new();
            loop {
                match job.run(Utc::now(), &cancel).await {
                    Ok(report) => tracing::info!(
                        enriched = report.enriched,
                        pending_retry = report.pending_retry,
                        invalid = report.invalid,
                        "siret sync finished"
                    ),
                    Err(err) => tracing::warn!(error = %err, "siret sync failed"),
                }
                tokio::time::sleep(interval).await;
            }
        });
    } else {
        tracing::info!("siret enrichment disabled (no insee.api_key)");
    }

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    tracing::info!(address = %listener.local_addr()?, "listening");

    axum::serve(listener, build_app(services)).await?;
    Ok(())
}
