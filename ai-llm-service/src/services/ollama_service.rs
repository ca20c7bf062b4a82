//! Lightweight Ollama client for text generation and embeddings.
//!
//! This module implements a thin client for the local Ollama API:
//! - `POST {endpoint}/api/generate`  : synchronous text generation (`stream=false`)
//! - `GET  {endpoint}/api/tags`      : locally available models
//! - `POST {endpoint}/api/embeddings`: embeddings retrieval
//!
//! # Examples
//!
//! ```no_run
//! use ai_llm_service::{LlmModelConfig, LlmProvider};
//! use ai_llm_service::services::ollama_service::OllamaService;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = LlmModelConfig {
//!     provider: LlmProvider::Ollama,
//!     model: "nomic-embed-text".into(),
//!     endpoint: "http://localhost:11434".into(),
//!     api_key: None,
//!     timeout_secs: Some(30),
//! };
//!
//! let svc = OllamaService::new(cfg)?;
//! let vec = svc.embeddings("Ferris is a friendly crab.").await?;
//! println!("Embeddings dimension = {}", vec.len());
//! # Ok(()) }
//! ```

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{AiLlmError, ProviderError, ProviderErrorKind},
    generation::{Completion, CompletionBackend, CompletionRequest},
    services::{build_client, decode_error, fetch_model_names, status_error},
};

/// Thin client for Ollama.
///
/// Reuses one HTTP client with the config timeout. Generation takes the model
/// from each request; embeddings use the config model.
#[derive(Debug)]
pub struct OllamaService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_generate: String,
    url_embeddings: String,
}

impl OllamaService {
    /// Creates a new [`OllamaService`] from the given config.
    ///
    /// # Errors
    /// - [`ProviderErrorKind::InvalidProvider`] if `cfg.provider` is not `Ollama`
    /// - [`ProviderErrorKind::InvalidEndpoint`] if `cfg.endpoint` is invalid
    /// - [`AiLlmError::HttpTransport`] if HTTP client cannot be built
    pub fn new(cfg: LlmModelConfig) -> Result<Self, AiLlmError> {
        if cfg.provider != LlmProvider::Ollama {
            return Err(
                ProviderError::new(cfg.provider, ProviderErrorKind::InvalidProvider).into(),
            );
        }
        let client = build_client(&cfg)?;
        let base = cfg.base_url().to_string();

        Ok(Self {
            client,
            url_generate: format!("{base}/api/generate"),
            url_embeddings: format!("{base}/api/embeddings"),
            cfg,
        })
    }

    pub fn config(&self) -> &LlmModelConfig {
        &self.cfg
    }

    /// Performs a **non-streaming** generation request via `/api/generate`.
    ///
    /// Mapped options:
    /// - `temperature`, `top_p`, `top_k` ← same-named params
    /// - `num_predict`    ← `max_tokens`
    /// - `repeat_penalty` ← `repetition_penalty`
    ///
    /// # Errors
    /// - [`ProviderErrorKind::HttpStatus`] for non-2xx responses
    /// - [`AiLlmError::HttpTransport`] for client errors
    /// - [`ProviderErrorKind::Decode`] if response cannot be parsed
    #[instrument(skip_all, fields(model = %req.model))]
    pub async fn generate(&self, req: &CompletionRequest) -> Result<Completion, AiLlmError> {
        let p = &req.params;
        let body = GenerateRequest {
            model: &req.model,
            prompt: &req.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: p.temperature,
                top_p: p.top_p,
                top_k: p.top_k,
                num_predict: p.max_tokens,
                repeat_penalty: p.repetition_penalty,
            },
        };

        debug!("POST {}", self.url_generate);
        let resp = self
            .client
            .post(&self.url_generate)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(LlmProvider::Ollama, &self.url_generate, resp).await);
        }

        let out: GenerateResponse = resp.json().await.map_err(|e| {
            decode_error(
                LlmProvider::Ollama,
                format!("serde error: {e}; ensure `stream=false` is used"),
            )
        })?;

        Ok(Completion {
            text: out.response,
            tokens_used: out.eval_count,
        })
    }

    /// Lists local models via `/api/tags`.
    pub async fn list_models(&self) -> Result<Vec<String>, AiLlmError> {
        fetch_model_names(&self.client, &self.cfg, None).await
    }

    /// Retrieves embeddings via `/api/embeddings`.
    ///
    /// # Errors
    /// - [`ProviderErrorKind::HttpStatus`] for non-2xx responses
    /// - [`AiLlmError::HttpTransport`] for client errors
    /// - [`ProviderErrorKind::Decode`] if response cannot be parsed
    #[instrument(skip_all, fields(model = %self.cfg.model))]
    pub async fn embeddings(&self, input: &str) -> Result<Vec<f32>, AiLlmError> {
        let body = EmbeddingsRequest {
            model: &self.cfg.model,
            prompt: input,
        };

        debug!("POST {}", self.url_embeddings);
        let resp = self
            .client
            .post(&self.url_embeddings)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(LlmProvider::Ollama, &self.url_embeddings, resp).await);
        }

        let out: EmbeddingsResponse = resp.json().await.map_err(|e| {
            decode_error(
                LlmProvider::Ollama,
                format!("serde error: {e}; expected `{{ embedding: number[] }}`"),
            )
        })?;

        Ok(out.embedding)
    }
}

impl CompletionBackend for OllamaService {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn complete<'a>(
        &'a self,
        req: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<Completion, AiLlmError>> {
        Box::pin(self.generate(req))
    }

    fn list_models(&self) -> BoxFuture<'_, Result<Vec<String>, AiLlmError>> {
        Box::pin(OllamaService::list_models(self))
    }
}

/* ==========================
HTTP payloads & options
========================== */

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

/// Subset of Ollama `options`.
#[derive(Debug, Default, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_penalty: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    eval_count: Option<u32>,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}
