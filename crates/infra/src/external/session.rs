use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::ExternalError;

/// Retry policy of an [`HttpSession`].
///
/// Exponential: the wait after attempt `n` is `backoff_factor × 2^(n−1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_factor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_factor: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay after a failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.backoff_factor
            .saturating_mul(2_u32.saturating_pow(attempt - 1))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// HTTP client bound to one service.
///
/// The underlying connection pool is released when the session is dropped.
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
}

impl HttpSession {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        policy: RetryPolicy,
        user_agent: Option<&str>,
    ) -> Result<Self, ExternalError> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(ua) = user_agent {
            builder = builder.user_agent(ua.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| ExternalError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            policy,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// `GET {base_url}{path}` and decode the JSON body, retrying per policy.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        headers: &[(&str, &str)],
    ) -> Result<T, ExternalError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut request = self.client.get(&url).query(query);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }

            let failure = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(%url, attempt, "external call succeeded");
                    return response
                        .json::<T>()
                        .await
                        .map_err(|e| ExternalError::Decode(e.to_string()));
                }
                Ok(response) if response.status().is_server_error() => {
                    format!("status {}", response.status())
                }
                Ok(response) => {
                    let status = response.status();
                    let message = response.text().await.unwrap_or_default();
                    return Err(permanent(status, message));
                }
                Err(err) if err.is_timeout() || err.is_connect() => err.to_string(),
                Err(err) => return Err(ExternalError::Config(err.to_string())),
            };

            if !self.policy.should_retry(attempt) {
                warn!(%url, attempt, error = %failure, "external call failed; giving up");
                return Err(ExternalError::Transient(failure));
            }
            let delay = self.policy.delay_for_attempt(attempt);
            warn!(%url, attempt, error = %failure, delay_ms = delay.as_millis() as u64, "external call failed; retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

fn permanent(status: StatusCode, message: String) -> ExternalError {
    ExternalError::Permanent {
        status: status.as_u16(),
        message: if message.is_empty() {
            status.canonical_reason().unwrap_or("").to_string()
        } else {
            message
        },
    }
}
