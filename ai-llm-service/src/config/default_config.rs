//! Default LLM configs loaded strictly from environment variables.
//!
//! # Environment variables
//!
//! Common:
//! - `LLM_KIND` = generation backend (`vllm` (default), `openai`, `ollama`)
//! - `LLM_TIMEOUT_SECS` = per-call generation timeout (default 60)
//! - `LLM_MAX_RETRIES` = total generation attempts (default 3)
//! - `LLM_TEMPERATURE`, `LLM_TOP_P`, `LLM_TOP_K`, `LLM_MAX_TOKENS` = sampling defaults
//!
//! vLLM / OpenAI-compatible:
//! - `VLLM_URL` (default `http://localhost:8001`)
//! - `VLLM_MODEL` (default `RedHatAI/granite-3.1-8b-instruct`)
//! - `VLLM_ALLOWED_MODELS` = comma-separated extra model names
//! - `VLLM_API_KEY` (optional)
//!
//! Ollama:
//! - `OLLAMA_URL` or `OLLAMA_PORT` = endpoint
//! - `OLLAMA_MODEL` = generation model when `LLM_KIND=ollama`
//!
//! Embeddings:
//! - `EMBEDDING_KIND` (default `ollama`), `EMBEDDING_URL` (defaults to the
//!   provider endpoint), `EMBEDDING_MODEL` (required)

use std::time::Duration;

use crate::{
    config::{
        llm_model_config::{GenerationParams, LlmModelConfig},
        llm_provider::LlmProvider,
    },
    error_handler::{
        AiLlmError, ConfigError, env_list, env_opt, env_opt_f32, env_opt_u32, env_opt_u64,
        must_env, validate_http_endpoint,
    },
    generation::GeneratorConfig,
    retry::RetryPolicy,
};

const DEFAULT_VLLM_URL: &str = "http://localhost:8001";
const DEFAULT_VLLM_MODEL: &str = "RedHatAI/granite-3.1-8b-instruct";

/// Resolves the Ollama endpoint strictly from environment.
///
/// Precedence:
/// 1. `OLLAMA_URL` if present and non-empty
/// 2. `OLLAMA_PORT` → `http://localhost:{port}`
///
/// # Errors
///
/// - [`ConfigError::MissingVar`] if both are missing
/// - [`ConfigError::InvalidNumber`] if `OLLAMA_PORT` is invalid
fn ollama_endpoint() -> Result<String, AiLlmError> {
    if let Some(url) = env_opt("OLLAMA_URL") {
        validate_http_endpoint("OLLAMA_URL", &url)?;
        return Ok(url);
    }
    if let Some(port) = env_opt("OLLAMA_PORT") {
        port.trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidNumber {
                var: "OLLAMA_PORT",
                reason: "expected u16 (1..=65535)",
            })?;
        return Ok(format!("http://localhost:{}", port.trim()));
    }
    Err(AiLlmError::Config(ConfigError::MissingVar(
        "OLLAMA_URL or OLLAMA_PORT",
    )))
}

fn generation_provider() -> Result<LlmProvider, AiLlmError> {
    match env_opt("LLM_KIND") {
        Some(kind) => Ok(kind.parse()?),
        None => Ok(LlmProvider::OpenAI),
    }
}

/// Constructs the generation backend config from `LLM_KIND`.
///
/// # Defaults
/// - vLLM endpoint `http://localhost:8001`, model `RedHatAI/granite-3.1-8b-instruct`
/// - `timeout_secs = LLM_TIMEOUT_SECS or 60`
pub fn config_generation() -> Result<LlmModelConfig, AiLlmError> {
    let timeout_secs = Some(env_opt_u64("LLM_TIMEOUT_SECS")?.unwrap_or(60));

    match generation_provider()? {
        LlmProvider::OpenAI => {
            let endpoint = env_opt("VLLM_URL").unwrap_or_else(|| DEFAULT_VLLM_URL.to_string());
            validate_http_endpoint("VLLM_URL", &endpoint)?;
            Ok(LlmModelConfig {
                provider: LlmProvider::OpenAI,
                model: env_opt("VLLM_MODEL").unwrap_or_else(|| DEFAULT_VLLM_MODEL.to_string()),
                endpoint,
                api_key: env_opt("VLLM_API_KEY"),
                timeout_secs,
            })
        }
        LlmProvider::Ollama => Ok(LlmModelConfig {
            provider: LlmProvider::Ollama,
            model: must_env("OLLAMA_MODEL")?,
            endpoint: ollama_endpoint()?,
            api_key: None,
            timeout_secs,
        }),
    }
}

/// Constructs a config for the **embedding** model.
///
/// # Env
/// - `EMBEDDING_MODEL` (required)
/// - `EMBEDDING_KIND` (default `ollama`)
/// - `EMBEDDING_URL` (optional override of the provider endpoint)
///
/// # Defaults
/// - `timeout_secs = Some(30)`
pub fn config_embedding() -> Result<LlmModelConfig, AiLlmError> {
    let provider = match env_opt("EMBEDDING_KIND") {
        Some(kind) => kind.parse()?,
        None => LlmProvider::Ollama,
    };
    let endpoint = match env_opt("EMBEDDING_URL") {
        Some(url) => {
            validate_http_endpoint("EMBEDDING_URL", &url)?;
            url
        }
        None => match provider {
            LlmProvider::Ollama => ollama_endpoint()?,
            LlmProvider::OpenAI => {
                env_opt("VLLM_URL").unwrap_or_else(|| DEFAULT_VLLM_URL.to_string())
            }
        },
    };

    Ok(LlmModelConfig {
        provider,
        model: must_env("EMBEDDING_MODEL")?,
        endpoint,
        api_key: None,
        timeout_secs: Some(30),
    })
}

impl GeneratorConfig {
    /// Reads the allow-list, timeout, retry and sampling defaults.
    ///
    /// `default_model` comes from the already resolved generation profile.
    ///
    /// # Errors
    /// Returns [`AiLlmError::Config`] for unparsable or out-of-range values.
    pub fn from_env(generation: &LlmModelConfig) -> Result<Self, AiLlmError> {
        let base = GeneratorConfig::default();

        let default_params = GenerationParams {
            temperature: env_opt_f32("LLM_TEMPERATURE")?,
            top_p: env_opt_f32("LLM_TOP_P")?,
            top_k: env_opt_u32("LLM_TOP_K")?,
            max_tokens: env_opt_u32("LLM_MAX_TOKENS")?,
            repetition_penalty: env_opt_f32("LLM_REPETITION_PENALTY")?,
        }
        .or(&base.default_params);
        default_params.validate()?;

        let retry = RetryPolicy {
            max_attempts: env_opt_u32("LLM_MAX_RETRIES")?.unwrap_or(base.retry.max_attempts),
            ..base.retry
        };

        Ok(Self {
            allowed_models: env_list("VLLM_ALLOWED_MODELS"),
            default_model: generation.model.clone(),
            call_timeout: Duration::from_secs(generation.timeout_secs.unwrap_or(60)),
            retry,
            default_params,
        })
    }
}
