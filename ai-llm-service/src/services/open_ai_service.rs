//! Client for OpenAI-compatible servers (vLLM).
//!
//! Endpoints are derived from `LlmModelConfig::endpoint`:
//! - POST {endpoint}/v1/completions: plain-prompt completion (non-streaming)
//! - GET  {endpoint}/v1/models     : served models
//! - POST {endpoint}/v1/embeddings : embeddings retrieval
//!
//! The API key is optional; vLLM deployments usually run without one.

use std::time::Instant;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{AiLlmError, ProviderError, ProviderErrorKind},
    generation::{Completion, CompletionBackend, CompletionRequest},
    services::{build_client, decode_error, fetch_model_names, status_error},
};

#[derive(Debug)]
pub struct OpenAiService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_completions: String,
    url_embeddings: String,
}

impl OpenAiService {
    /// # Errors
    /// - [`ProviderErrorKind::InvalidProvider`] if `cfg.provider` is not OpenAI
    /// - [`ProviderErrorKind::InvalidEndpoint`] if `cfg.endpoint` is not http(s)
    /// - [`AiLlmError::HttpTransport`] if the HTTP client cannot be built
    pub fn new(cfg: LlmModelConfig) -> Result<Self, AiLlmError> {
        if cfg.provider != LlmProvider::OpenAI {
            return Err(
                ProviderError::new(cfg.provider, ProviderErrorKind::InvalidProvider).into(),
            );
        }
        let client = build_client(&cfg)?;

        let base = cfg.base_url().to_string();
        debug!(model = %cfg.model, endpoint = %base, "OpenAiService initialized");

        Ok(Self {
            client,
            url_completions: format!("{base}/v1/completions"),
            url_embeddings: format!("{base}/v1/embeddings"),
            cfg,
        })
    }

    pub fn config(&self) -> &LlmModelConfig {
        &self.cfg
    }

    /// Performs a **non-streaming** `/v1/completions` call.
    ///
    /// The model comes from the request, not from the config: the generator
    /// may select any allow-listed model served by the same endpoint.
    ///
    /// # Errors
    /// - [`ProviderErrorKind::HttpStatus`] for non-2xx responses
    /// - [`AiLlmError::HttpTransport`] for network failures
    /// - [`ProviderErrorKind::Decode`] / [`ProviderErrorKind::EmptyChoices`]
    #[instrument(skip_all, fields(model = %req.model))]
    pub async fn complete(&self, req: &CompletionRequest) -> Result<Completion, AiLlmError> {
        let started = Instant::now();
        let body = CompletionBody {
            model: &req.model,
            prompt: &req.prompt,
            temperature: req.params.temperature,
            top_p: req.params.top_p,
            top_k: req.params.top_k,
            max_tokens: req.params.max_tokens,
            repetition_penalty: req.params.repetition_penalty,
            stream: false,
        };

        debug!(prompt_len = req.prompt.len(), "POST {}", self.url_completions);
        let resp = self
            .client
            .post(&self.url_completions)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(LlmProvider::OpenAI, &self.url_completions, resp).await);
        }

        let out: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| decode_error(LlmProvider::OpenAI, format!("completions: {e}")))?;

        let choice = out.choices.into_iter().next().ok_or_else(|| {
            AiLlmError::from(ProviderError::new(
                LlmProvider::OpenAI,
                ProviderErrorKind::EmptyChoices,
            ))
        })?;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            completion_tokens = out.usage.as_ref().map(|u| u.completion_tokens),
            "completion received"
        );

        Ok(Completion {
            text: choice.text,
            tokens_used: out.usage.map(|u| u.completion_tokens),
        })
    }

    /// Lists models served at `/v1/models`.
    pub async fn list_models(&self) -> Result<Vec<String>, AiLlmError> {
        fetch_model_names(&self.client, &self.cfg, None).await
    }

    /// Retrieves one embedding vector via `/v1/embeddings` using the config model.
    #[instrument(skip_all, fields(model = %self.cfg.model))]
    pub async fn embeddings(&self, input: &str) -> Result<Vec<f32>, AiLlmError> {
        let body = EmbeddingsBody {
            model: &self.cfg.model,
            input,
        };

        debug!("POST {}", self.url_embeddings);
        let resp = self
            .client
            .post(&self.url_embeddings)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(LlmProvider::OpenAI, &self.url_embeddings, resp).await);
        }

        let out: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| decode_error(LlmProvider::OpenAI, format!("embeddings: {e}")))?;

        out.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| decode_error(LlmProvider::OpenAI, "embeddings: empty `data` array"))
    }
}

impl CompletionBackend for OpenAiService {
    fn name(&self) -> &'static str {
        "vllm"
    }

    fn complete<'a>(
        &'a self,
        req: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<Completion, AiLlmError>> {
        Box::pin(OpenAiService::complete(self, req))
    }

    fn list_models(&self) -> BoxFuture<'_, Result<Vec<String>, AiLlmError>> {
        Box::pin(OpenAiService::list_models(self))
    }
}

/* ==========================
HTTP payloads
========================== */

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repetition_penalty: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingsBody<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::llm_model_config::GenerationParams;
    use mockito::Matcher;
    use serde_json::json;

    fn cfg(endpoint: String) -> LlmModelConfig {
        LlmModelConfig {
            provider: LlmProvider::OpenAI,
            model: "granite".into(),
            endpoint,
            api_key: None,
            timeout_secs: Some(5),
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "granite".into(),
            prompt: "Question: What is OpenShift?".into(),
            params: GenerationParams {
                temperature: Some(0.2),
                top_k: Some(40),
                max_tokens: Some(64),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn completion_forwards_params_and_reads_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/completions")
            .match_body(Matcher::PartialJson(json!({
                "model": "granite",
                "temperature": 0.2,
                "top_k": 40,
                "max_tokens": 64,
                "stream": false
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{ "text": " OpenShift is a Kubernetes platform." }],
                    "usage": { "prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19 }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let svc = OpenAiService::new(cfg(server.url())).unwrap();
        let out = svc.complete(&request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(out.text, " OpenShift is a Kubernetes platform.");
        assert_eq!(out.tokens_used, Some(7));
    }

    #[tokio::test]
    async fn server_error_is_transient_and_client_error_is_not() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;
        let svc = OpenAiService::new(cfg(server.url())).unwrap();
        let err = svc.complete(&request()).await.unwrap_err();
        assert!(err.is_transient());

        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/completions")
            .with_status(400)
            .with_body("{\"error\":\"bad prompt\"}")
            .create_async()
            .await;
        let svc = OpenAiService::new(cfg(server.url())).unwrap();
        let err = svc.complete(&request()).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let svc = OpenAiService::new(cfg(server.url())).unwrap();
        let err = svc.complete(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            AiLlmError::Provider(ProviderError {
                kind: ProviderErrorKind::EmptyChoices,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn lists_served_models() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/models")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"object":"list","data":[{"id":"granite"},{"id":"mistral"}]}"#)
            .create_async()
            .await;

        let svc = OpenAiService::new(cfg(server.url())).unwrap();
        assert_eq!(svc.list_models().await.unwrap(), vec!["granite", "mistral"]);
    }

    #[test]
    fn rejects_wrong_provider_and_bad_endpoint() {
        let mut c = cfg("http://localhost:8001".into());
        c.provider = LlmProvider::Ollama;
        assert!(OpenAiService::new(c).is_err());
        assert!(OpenAiService::new(cfg("localhost:8001".into())).is_err());
    }
}
