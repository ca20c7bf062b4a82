//! Shared LLM service: completion backends, the allow-listed [`Generator`],
//! retry/backoff policy, provider health probes and logging helpers.
//!
//! Backends speak either the OpenAI-compatible API served by vLLM or the
//! native Ollama API. Everything network-facing returns [`AiLlmError`].

pub mod config;
pub mod error_handler;
pub mod generation;
pub mod health_service;
pub mod retry;
pub mod service_profiles;
pub mod services;
pub mod telemetry;

pub use config::{
    llm_model_config::{GenerationParams, LlmModelConfig},
    llm_provider::LlmProvider,
};
pub use error_handler::{AiLlmError, Result};
pub use generation::{
    Completion, CompletionBackend, CompletionRequest, GenerationRequest, GenerationResult,
    Generator, GeneratorConfig,
};
pub use health_service::{HealthService, HealthStatus};
pub use retry::{RetryFailure, RetryPolicy, RetryStop};
pub use service_profiles::LlmServiceProfiles;
