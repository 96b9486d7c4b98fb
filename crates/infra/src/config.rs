//! Application configuration.
//!
//! Layers, lowest precedence first:
//! 1. built-in defaults
//! 2. `config/default`, `config/{APP_ENV}`, `config/local` (all optional)
//! 3. environment variables `APP__SECTION__KEY` (e.g. `APP__SERVER__PORT=8081`)
//!
//! A `.env` file is loaded into the environment first when present.

use std::env;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::external::RetryPolicy;
use crate::sync::MAX_BATCH_SIZE;

const CONFIG_DIR: &str = "config";
const DEFAULT_ENV: &str = "development";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// No URL means in-memory backends.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InseeConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub batch_size: usize,
    pub resync_after_days: i64,
    /// Pause between two runs of the SIRET sync job.
    pub sync_interval_secs: u64,
}

impl Default for InseeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.insee.fr".to_string(),
            api_key: None,
            timeout_secs: 10,
            batch_size: MAX_BATCH_SIZE,
            resync_after_days: 30,
            sync_interval_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BanConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-adresse.data.gouv.fr".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NominatimConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: concat!("watergile/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpRetryConfig {
    pub max_attempts: u32,
    /// Seconds.
    pub backoff_factor: f64,
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_factor: 0.5,
        }
    }
}

impl HttpRetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff_factor: Duration::from_secs_f64(self.backoff_factor.max(0.0)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub validator_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            validator_ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn validator_ttl(&self) -> Duration {
        Duration::from_secs(self.validator_ttl_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MondialRelayConfig {
    pub merchant_code: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub insee: InseeConfig,
    pub ban: BanConfig,
    pub nominatim: NominatimConfig,
    pub http_retry: HttpRetryConfig,
    pub cache: CacheConfig,
    pub mondial_relay: MondialRelayConfig,
}

impl AppConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn siret_enrichment_enabled(&self) -> bool {
        self.insee
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }

    /// Startup checks. Errors abort startup; degraded features are only
    /// reported with a warning.
    pub fn check(&self) -> Result<(), AppConfigError> {
        if self.insee.batch_size == 0 || self.insee.batch_size > MAX_BATCH_SIZE {
            return Err(AppConfigError::Invalid(format!(
                "insee.batch_size must be between 1 and {MAX_BATCH_SIZE} (got {}); set APP__INSEE__BATCH_SIZE",
                self.insee.batch_size
            )));
        }
        if self.insee.resync_after_days <= 0 {
            return Err(AppConfigError::Invalid(format!(
                "insee.resync_after_days must be positive (got {})",
                self.insee.resync_after_days
            )));
        }
        if self.insee.sync_interval_secs == 0 {
            return Err(AppConfigError::Invalid(
                "insee.sync_interval_secs must be positive".to_string(),
            ));
        }
        if self.http_retry.backoff_factor < 0.0 || !self.http_retry.backoff_factor.is_finite() {
            return Err(AppConfigError::Invalid(
                "http_retry.backoff_factor must be a non-negative number of seconds".to_string(),
            ));
        }
        if !self.siret_enrichment_enabled() {
            warn!("no INSEE API key configured (APP__INSEE__API_KEY); SIRET enrichment is disabled");
        }
        if self.database.url.is_none() {
            warn!("no database configured (APP__DATABASE__URL); using in-memory storage");
        }
        Ok(())
    }
}

/// Load and check the configuration.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // A missing .env file is the normal case outside development.
    let _ = dotenvy::dotenv();

    let run_env = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!(environment = %run_env, "loading configuration");

    let config = Config::builder()
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/local")).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.check()?;
    Ok(app_config)
}
