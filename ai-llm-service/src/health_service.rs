//! Universal health service for LLM backends (Ollama, OpenAI-compatible).
//!
//! Probes list the served models and check that the configured one is there:
//! - Ollama: `GET {endpoint}/api/tags`
//! - OpenAI/vLLM: `GET {endpoint}/v1/models`
//!
//! [`HealthService::check`] never fails; errors become `ok = false` with a
//! message. [`HealthService::probe`] is the strict variant used by readiness.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::llm_model_config::LlmModelConfig;
use crate::error_handler::{AiLlmError, HealthError, Result, validate_http_endpoint};
use crate::services::fetch_model_names;

/// A serializable health snapshot for a single provider/config.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Backend/provider (e.g., "Ollama", "OpenAI").
    pub provider: String,
    pub endpoint: String,
    pub model: Option<String>,
    pub ok: bool,
    /// Latency of the probe request in milliseconds.
    pub latency_ms: u128,
    pub message: String,
}

impl HealthStatus {
    fn new(cfg: &LlmModelConfig, ok: bool, latency_ms: u128, message: impl Into<String>) -> Self {
        Self {
            provider: format!("{:?}", cfg.provider),
            endpoint: cfg.endpoint.clone(),
            model: Some(cfg.model.clone()),
            ok,
            latency_ms,
            message: message.into(),
        }
    }
}

/// A health checker that reuses a single HTTP client.
pub struct HealthService {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HealthService {
    /// Creates a new health service with an optional client timeout (seconds).
    ///
    /// # Errors
    /// Returns [`AiLlmError::HttpTransport`] if the HTTP client cannot be built.
    pub fn new(timeout_secs: Option<u64>) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs.unwrap_or(10));
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        info!(
            default_timeout_secs = timeout.as_secs(),
            "HealthService initialized"
        );

        Ok(Self {
            client,
            default_timeout: timeout,
        })
    }

    /// Strict probe: the backend answered and serves `cfg.model`.
    ///
    /// # Errors
    /// - [`HealthError::InvalidEndpoint`] for a malformed endpoint
    /// - [`HealthError::Decode`] when the model is not served
    /// - transport / status errors from the listing call
    pub async fn probe(&self, cfg: &LlmModelConfig, timeout: Option<Duration>) -> Result<Duration> {
        if validate_http_endpoint("endpoint", &cfg.endpoint).is_err() {
            return Err(HealthError::InvalidEndpoint(cfg.endpoint.clone()).into());
        }

        let started = Instant::now();
        debug!(provider = ?cfg.provider, endpoint = %cfg.endpoint, model = %cfg.model, "listing models");
        let models = fetch_model_names(
            &self.client,
            cfg,
            Some(timeout.unwrap_or(self.default_timeout)),
        )
        .await?;
        let latency = started.elapsed();

        if models.iter().any(|m| m == &cfg.model) {
            Ok(latency)
        } else {
            Err(AiLlmError::from(HealthError::Decode(format!(
                "{:?} is up, but model `{}` is not served",
                cfg.provider, cfg.model
            ))))
        }
    }

    /// Checks health for a single config. Never returns an error.
    pub async fn check(&self, cfg: &LlmModelConfig) -> HealthStatus {
        let started = Instant::now();
        match self.probe(cfg, None).await {
            Ok(latency) => {
                let status = HealthStatus::new(cfg, true, latency.as_millis(), "model is available");
                info!(
                    provider = %status.provider,
                    endpoint = %status.endpoint,
                    latency_ms = status.latency_ms,
                    "health probe completed"
                );
                status
            }
            Err(err) => {
                let status =
                    HealthStatus::new(cfg, false, started.elapsed().as_millis(), err.to_string());
                warn!(
                    provider = %status.provider,
                    endpoint = %status.endpoint,
                    latency_ms = status.latency_ms,
                    message = %status.message,
                    "health probe failed"
                );
                status
            }
        }
    }

    /// Checks several configs concurrently.
    pub async fn check_many(&self, configs: &[LlmModelConfig]) -> Vec<HealthStatus> {
        debug!(count = configs.len(), "running batch health probes");
        futures::future::join_all(configs.iter().map(|c| self.check(c))).await
    }
}
