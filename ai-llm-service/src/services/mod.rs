//! HTTP clients for the supported backends.
//!
//! - [`open_ai_service::OpenAiService`]: OpenAI-compatible servers (vLLM).
//! - [`ollama_service::OllamaService`]: native Ollama API.
//!
//! Both implement [`crate::CompletionBackend`] and expose `embeddings`.

pub mod ollama_service;
pub mod open_ai_service;

use std::time::Duration;

use reqwest::header;
use serde::Deserialize;

use crate::config::llm_model_config::LlmModelConfig;
use crate::config::llm_provider::LlmProvider;
use crate::error_handler::{AiLlmError, HttpError, ProviderError, ProviderErrorKind, make_snippet};

pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Builds a client with compression, the config timeout and an optional
/// bearer token.
pub(crate) fn build_client(cfg: &LlmModelConfig) -> Result<reqwest::Client, AiLlmError> {
    let endpoint = cfg.endpoint.trim();
    if endpoint.is_empty() || !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
    {
        return Err(ProviderError::new(
            cfg.provider,
            ProviderErrorKind::InvalidEndpoint(cfg.endpoint.clone()),
        )
        .into());
    }

    let mut headers = header::HeaderMap::new();
    if let Some(key) = cfg.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        let value = header::HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
            ProviderError::new(
                cfg.provider,
                ProviderErrorKind::Decode(format!("invalid API key header: {e}")),
            )
        })?;
        headers.insert(header::AUTHORIZATION, value);
    }

    let timeout = Duration::from_secs(cfg.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()?)
}

/// Turns a non-2xx reply into a provider error carrying a body snippet.
pub(crate) async fn status_error(
    provider: LlmProvider,
    url: &str,
    resp: reqwest::Response,
) -> AiLlmError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    ProviderError::new(
        provider,
        ProviderErrorKind::HttpStatus(HttpError {
            status,
            url: url.to_string(),
            snippet: make_snippet(&text),
        }),
    )
    .into()
}

pub(crate) fn decode_error(provider: LlmProvider, detail: impl Into<String>) -> AiLlmError {
    ProviderError::new(provider, ProviderErrorKind::Decode(detail.into())).into()
}

/// `GET /v1/models` body: `{ "data": [ { "id": "<model>" } ] }`.
#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiModels {
    #[serde(default)]
    pub data: Vec<OpenAiModelItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiModelItem {
    pub id: String,
}

/// `GET /api/tags` body: `{ "models": [ { "name": "<model>" } ] }`.
#[derive(Debug, Deserialize)]
pub(crate) struct OllamaTags {
    #[serde(default)]
    pub models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OllamaTag {
    pub name: String,
}

/// Lists served model names for either provider.
pub(crate) async fn fetch_model_names(
    client: &reqwest::Client,
    cfg: &LlmModelConfig,
    timeout: Option<Duration>,
) -> Result<Vec<String>, AiLlmError> {
    let url = match cfg.provider {
        LlmProvider::OpenAI => format!("{}/v1/models", cfg.base_url()),
        LlmProvider::Ollama => format!("{}/api/tags", cfg.base_url()),
    };

    let mut req = client.get(&url);
    if let Some(key) = cfg.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        req = req.bearer_auth(key);
    }
    if let Some(t) = timeout {
        req = req.timeout(t);
    }
    let resp = req.send().await?;
    if !resp.status().is_success() {
        return Err(status_error(cfg.provider, &url, resp).await);
    }

    match cfg.provider {
        LlmProvider::OpenAI => {
            let models: OpenAiModels = resp
                .json()
                .await
                .map_err(|e| decode_error(cfg.provider, format!("{url}: {e}")))?;
            Ok(models.data.into_iter().map(|m| m.id).collect())
        }
        LlmProvider::Ollama => {
            let tags: OllamaTags = resp
                .json()
                .await
                .map_err(|e| decode_error(cfg.provider, format!("{url}: {e}")))?;
            Ok(tags.models.into_iter().map(|m| m.name).collect())
        }
    }
}
