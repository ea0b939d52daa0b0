//! HTTP result sink for the project backend.
//!
//! Records are POSTed as JSON to `{base}/api/v1/projects/save-generated`;
//! readiness comes from `GET {base}/health` answering `{"ready": true}`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::storage_traits::{ResultSink, RunRecord, StorageResult};

/// Default backend location when nothing else is configured.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Environment variable consulted by [`HttpSinkConfig::from_env`].
pub const BACKEND_URL_ENV: &str = "CONDUCTOR_BACKEND_URL";

/// Connection settings for [`HttpResultSink`]
#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    /// Base URL without trailing slash
    pub base_url: String,
    /// Total request timeout
    pub timeout: Duration,
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl HttpSinkConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Read the base URL from `CONDUCTOR_BACKEND_URL`, falling back to the default.
    pub fn from_env() -> Self {
        match std::env::var(BACKEND_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn save_url(&self) -> String {
        format!("{}/api/v1/projects/save-generated", self.base_url)
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}

/// Result sink backed by the project backend's REST API.
pub struct HttpResultSink {
    config: HttpSinkConfig,
    http_client: reqwest::Client,
}

impl HttpResultSink {
    pub fn new(config: HttpSinkConfig) -> StorageResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("conductor-state/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &HttpSinkConfig {
        &self.config
    }
}

#[async_trait]
impl ResultSink for HttpResultSink {
    async fn save(&self, record: &RunRecord) -> StorageResult<()> {
        let url = self.config.save_url();
        info!(url = %url, execution_id = %record.execution_id, "saving run record");

        let response = self.http_client.post(&url).json(record).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!(execution_id = %record.execution_id, "run record saved");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(StorageError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn health_check(&self) -> bool {
        let url = self.config.health_url();
        let response = match self.http_client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %url, error = %e, "backend health check failed");
                return false;
            }
        };

        if !response.status().is_success() {
            warn!(url = %url, status = %response.status(), "backend health check failed");
            return false;
        }

        match response.json::<serde_json::Value>().await {
            Ok(body) => {
                let ready = body
                    .get("ready")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if !ready {
                    warn!(url = %url, body = %body, "backend not ready");
                }
                ready
            }
            Err(e) => {
                warn!(url = %url, error = %e, "backend health response unreadable");
                false
            }
        }
    }
}
