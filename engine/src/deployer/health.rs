use crate::config::DeployConfig;
use std::time::Duration;

/// HTTP readiness probe against `{base_url}/health`
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
    pub attempts: u32,
    pub delay: Duration,
}

impl HealthProbe {
    pub fn new(attempts: u32, delay: Duration, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            attempts,
            delay,
        }
    }

    pub fn from_config(config: &DeployConfig) -> Self {
        Self::new(
            config.health_attempts,
            config.health_delay(),
            config.health_request_timeout(),
        )
    }

    /// True if `GET {base_url}/health` answers 200
    pub async fn probe_once(&self, base_url: &str) -> bool {
        let url = format!("{}/health", base_url.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(response) => {
                tracing::debug!(%url, status = %response.status(), "Health probe answered");
                response.status() == reqwest::StatusCode::OK
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, "Health probe failed");
                false
            }
        }
    }
}
