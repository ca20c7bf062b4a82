//! Allow-listed, retrying text generation on top of a [`CompletionBackend`].
//!
//! The [`Generator`] owns no HTTP details. It resolves the model name against
//! the configured allow-list, merges sampling parameters with deployment
//! defaults, applies a per-call timeout and retries transient failures with
//! the configured [`RetryPolicy`]. Parameters are forwarded unchanged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tracing::{debug, info, instrument, warn};

use crate::config::llm_model_config::GenerationParams;
use crate::error_handler::{AiLlmError, ConfigError, Result};
use crate::retry::RetryPolicy;

/// One completion call as sent to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub params: GenerationParams,
}

/// Raw backend output.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Generated tokens as reported by the backend, when it reports them.
    pub tokens_used: Option<u32>,
}

/// A text-completion server.
///
/// Implemented by the vLLM/OpenAI and Ollama clients in [`crate::services`]
/// and by in-memory fakes in tests.
pub trait CompletionBackend: Send + Sync {
    /// Short label for logs, e.g. `"vllm"`.
    fn name(&self) -> &'static str;

    /// Performs a single, non-streaming completion.
    fn complete<'a>(&'a self, req: &'a CompletionRequest) -> BoxFuture<'a, Result<Completion>>;

    /// Model identifiers currently served.
    fn list_models(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// Input of [`Generator::generate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Requested model; `None` selects the deployment default.
    pub model_name: Option<String>,
    pub params: GenerationParams,
}

/// Output of [`Generator::generate`].
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub answer: String,
    pub model: String,
    pub tokens_used: u32,
    pub generation_time_ms: u64,
    pub attempts: u32,
}

/// Immutable generator settings captured at startup.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Model names callers may request. The default model is always allowed.
    pub allowed_models: Vec<String>,
    pub default_model: String,
    /// Timeout applied to every single backend call.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    /// Sampling parameters used where a request leaves them unset.
    pub default_params: GenerationParams,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            allowed_models: Vec::new(),
            default_model: "RedHatAI/granite-3.1-8b-instruct".to_string(),
            call_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            default_params: GenerationParams {
                temperature: Some(0.7),
                top_p: Some(0.9),
                top_k: Some(50),
                max_tokens: Some(512),
                repetition_penalty: None,
            },
        }
    }
}

pub struct Generator {
    backend: Arc<dyn CompletionBackend>,
    cfg: GeneratorConfig,
}

impl Generator {
    /// Builds a generator. The default model is added to the allow-list when
    /// missing.
    ///
    /// # Errors
    /// [`ConfigError::EmptyModel`] if the default model is blank.
    pub fn new(backend: Arc<dyn CompletionBackend>, mut cfg: GeneratorConfig) -> Result<Self> {
        if cfg.default_model.trim().is_empty() {
            return Err(ConfigError::EmptyModel.into());
        }
        if !cfg.allowed_models.iter().any(|m| m == &cfg.default_model) {
            cfg.allowed_models.insert(0, cfg.default_model.clone());
        }
        info!(
            backend = backend.name(),
            default_model = %cfg.default_model,
            allowed = cfg.allowed_models.len(),
            "generator initialized"
        );
        Ok(Self { backend, cfg })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.cfg
    }

    pub fn backend(&self) -> &Arc<dyn CompletionBackend> {
        &self.backend
    }

    /// Models the backend serves right now.
    ///
    /// # Errors
    /// The backend's error, or [`AiLlmError::Timeout`] after `timeout`.
    pub async fn served_models(&self, timeout: Duration) -> Result<Vec<String>> {
        tokio::time::timeout(timeout, self.backend.list_models())
            .await
            .map_err(|_| AiLlmError::Timeout(timeout))?
    }

    /// Maps a requested model name to the one that will be used.
    ///
    /// # Errors
    /// [`AiLlmError::InvalidModel`] when the name is not allow-listed.
    pub fn resolve_model(&self, requested: Option<&str>) -> Result<String> {
        match requested.map(str::trim).filter(|m| !m.is_empty()) {
            None => Ok(self.cfg.default_model.clone()),
            Some(m) if self.cfg.allowed_models.iter().any(|a| a == m) => Ok(m.to_string()),
            Some(m) => Err(AiLlmError::InvalidModel {
                model: m.to_string(),
                allowed: self.cfg.allowed_models.clone(),
            }),
        }
    }

    /// Runs one generation with retries.
    ///
    /// `deadline` bounds the retry loop: no new attempt starts after it.
    ///
    /// # Errors
    /// - [`AiLlmError::InvalidModel`] before any backend call
    /// - [`AiLlmError::Config`] for out-of-range parameters
    /// - [`AiLlmError::GenerationUnavailable`] once retries are exhausted or
    ///   the backend rejects the call permanently
    #[instrument(skip_all, fields(backend = self.backend.name()))]
    pub async fn generate(
        &self,
        req: GenerationRequest,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<GenerationResult> {
        let model = self.resolve_model(req.model_name.as_deref())?;
        let params = req.params.or(&self.cfg.default_params);
        params.validate()?;

        let call = CompletionRequest {
            model: model.clone(),
            prompt: req.prompt,
            params,
        };
        let call_ref = &call;
        let backend = &self.backend;
        let call_timeout = self.cfg.call_timeout;

        debug!(model = %model, prompt_len = call.prompt.len(), "generation started");
        let started = Instant::now();

        let outcome = self
            .cfg
            .retry
            .run(
                "generation",
                deadline,
                move |attempt| async move {
                    debug!(attempt, "completion attempt");
                    match tokio::time::timeout(call_timeout, backend.complete(call_ref)).await {
                        Ok(res) => res,
                        Err(_) => Err(AiLlmError::Timeout(call_timeout)),
                    }
                },
                AiLlmError::is_transient,
            )
            .await;

        let generation_time_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((completion, attempts)) => {
                let tokens_used = completion
                    .tokens_used
                    .unwrap_or_else(|| completion.text.split_whitespace().count() as u32);
                info!(
                    model = %model,
                    attempts,
                    tokens_used,
                    generation_time_ms,
                    "generation completed"
                );
                Ok(GenerationResult {
                    answer: completion.text.trim().to_string(),
                    model,
                    tokens_used,
                    generation_time_ms,
                    attempts,
                })
            }
            Err(failure) => {
                warn!(
                    model = %model,
                    attempts = failure.attempts,
                    stop = ?failure.stop,
                    error = %failure.error,
                    "generation failed"
                );
                Err(AiLlmError::GenerationUnavailable {
                    attempts: failure.attempts,
                    last_error: failure.error.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use reqwest::StatusCode;

    use crate::config::llm_provider::LlmProvider;
    use crate::error_handler::{HttpError, ProviderError, ProviderErrorKind};

    enum Step {
        Ok(&'static str),
        Status(u16),
        Hang,
    }

    struct ScriptedBackend {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicU32,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedBackend {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl CompletionBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn complete<'a>(&'a self, req: &'a CompletionRequest) -> BoxFuture<'a, Result<Completion>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(req.clone());
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Ok("done"));
            Box::pin(async move {
                match step {
                    Step::Ok(text) => Ok(Completion {
                        text: text.to_string(),
                        tokens_used: None,
                    }),
                    Step::Status(code) => Err(ProviderError::new(
                        LlmProvider::OpenAI,
                        ProviderErrorKind::HttpStatus(HttpError {
                            status: StatusCode::from_u16(code).unwrap(),
                            url: "http://fake/v1/completions".into(),
                            snippet: String::new(),
                        }),
                    )
                    .into()),
                    Step::Hang => {
                        futures::future::pending::<()>().await;
                        unreachable!()
                    }
                }
            })
        }

        fn list_models(&self) -> BoxFuture<'_, Result<Vec<String>>> {
            Box::pin(async { Ok(vec!["m-default".to_string()]) })
        }
    }

    fn cfg() -> GeneratorConfig {
        GeneratorConfig {
            allowed_models: vec!["m-other".into()],
            default_model: "m-default".into(),
            call_timeout: Duration::from_secs(2),
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(40),
                multiplier: 2.0,
                jitter: false,
            },
            default_params: GenerationParams {
                temperature: Some(0.7),
                max_tokens: Some(512),
                ..Default::default()
            },
        }
    }

    fn request(model: Option<&str>) -> GenerationRequest {
        GenerationRequest {
            prompt: "What is OpenShift?".into(),
            model_name: model.map(str::to_string),
            params: GenerationParams {
                temperature: Some(0.1),
                ..Default::default()
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_model_never_reaches_backend() {
        let backend = ScriptedBackend::new(vec![]);
        let generator = Generator::new(backend.clone(), cfg()).unwrap();

        let err = generator
            .generate(request(Some("invalid-model-12345")), None)
            .await
            .unwrap_err();

        assert!(matches!(err, AiLlmError::InvalidModel { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn default_model_and_merged_params_are_forwarded() {
        let backend = ScriptedBackend::new(vec![Step::Ok("  OpenShift is a platform.  ")]);
        let generator = Generator::new(backend.clone(), cfg()).unwrap();

        let out = generator.generate(request(None), None).await.unwrap();

        assert_eq!(out.answer, "OpenShift is a platform.");
        assert_eq!(out.model, "m-default");
        assert_eq!(out.attempts, 1);
        assert_eq!(out.tokens_used, 4);

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].params.temperature, Some(0.1));
        assert_eq!(seen[0].params.max_tokens, Some(512));
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_are_retried() {
        let backend = ScriptedBackend::new(vec![Step::Status(503), Step::Status(429), Step::Ok("ok")]);
        let generator = Generator::new(backend.clone(), cfg()).unwrap();

        let out = generator.generate(request(Some("m-other")), None).await.unwrap();

        assert_eq!(out.attempts, 3);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let backend = ScriptedBackend::new(vec![Step::Status(400)]);
        let generator = Generator::new(backend.clone(), cfg()).unwrap();

        let err = generator.generate(request(None), None).await.unwrap_err();

        assert!(matches!(err, AiLlmError::GenerationUnavailable { attempts: 1, .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_backend_times_out_and_exhausts_retries() {
        let backend = ScriptedBackend::new(vec![Step::Hang, Step::Hang, Step::Hang]);
        let generator = Generator::new(backend.clone(), cfg()).unwrap();

        let err = generator.generate(request(None), None).await.unwrap_err();

        assert!(matches!(err, AiLlmError::GenerationUnavailable { attempts: 3, .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_params_are_rejected_locally() {
        let backend = ScriptedBackend::new(vec![]);
        let generator = Generator::new(backend.clone(), cfg()).unwrap();
        let mut req = request(None);
        req.params.top_p = Some(1.5);

        let err = generator.generate(req, None).await.unwrap_err();

        assert!(matches!(err, AiLlmError::Config(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
