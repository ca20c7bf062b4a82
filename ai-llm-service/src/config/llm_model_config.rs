use serde::{Deserialize, Serialize};

use crate::config::llm_provider::LlmProvider;
use crate::error_handler::{Result, validate_range_f32};

/// Connection settings for one model served by one backend.
///
/// # Fields
///
/// - `provider`: which API dialect to speak.
/// - `model`: model identifier as the backend knows it.
/// - `endpoint`: base URL, e.g. `http://vllm:8000` or `http://localhost:11434`.
/// - `api_key`: optional bearer token (vLLM accepts any value or none).
/// - `timeout_secs`: per-request timeout applied by the HTTP client.
///
/// # Examples
///
/// ```
/// use ai_llm_service::{LlmModelConfig, LlmProvider};
///
/// let cfg = LlmModelConfig {
///     provider: LlmProvider::OpenAI,
///     model: "RedHatAI/granite-3.1-8b-instruct".to_string(),
///     endpoint: "http://localhost:8001".to_string(),
///     api_key: None,
///     timeout_secs: Some(60),
/// };
/// assert_eq!(cfg.base_url(), "http://localhost:8001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LlmModelConfig {
    /// The backend dialect.
    pub provider: LlmProvider,

    /// Model identifier string.
    pub model: String,

    /// Base URL of the backend.
    pub endpoint: String,

    /// Optional API key for authentication.
    pub api_key: Option<String>,

    /// Optional request timeout (in seconds).
    pub timeout_secs: Option<u64>,
}

impl LlmModelConfig {
    /// Endpoint without trailing slashes.
    pub fn base_url(&self) -> &str {
        self.endpoint.trim().trim_end_matches('/')
    }
}

/// Sampling parameters forwarded to the backend untouched.
///
/// `None` means "let the backend decide". Nothing in this crate samples
/// locally; these values only travel in the request body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
}

impl GenerationParams {
    /// Fills every unset field from `defaults`.
    pub fn or(self, defaults: &GenerationParams) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature.or(defaults.temperature),
            top_p: self.top_p.or(defaults.top_p),
            top_k: self.top_k.or(defaults.top_k),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            repetition_penalty: self.repetition_penalty.or(defaults.repetition_penalty),
        }
    }

    /// Checks the ranges accepted by the public API.
    ///
    /// # Errors
    /// Returns [`crate::AiLlmError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            validate_range_f32("temperature", t, 0.0, 2.0)?;
        }
        if let Some(p) = self.top_p {
            validate_range_f32("top_p", p, 0.0, 1.0)?;
        }
        if let Some(k) = self.top_k {
            validate_range_f32("top_k", k as f32, 1.0, 100.0)?;
        }
        if let Some(m) = self.max_tokens {
            validate_range_f32("max_tokens", m as f32, 1.0, 4096.0)?;
        }
        if let Some(r) = self.repetition_penalty {
            // Zero is not a valid penalty; the lower bound is exclusive.
            validate_range_f32("repetition_penalty", r, f32::MIN_POSITIVE, 2.0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_defaults() {
        let defaults = GenerationParams {
            temperature: Some(0.7),
            top_p: Some(0.9),
            top_k: Some(50),
            max_tokens: Some(512),
            repetition_penalty: None,
        };
        let merged = GenerationParams {
            temperature: Some(0.1),
            ..Default::default()
        }
        .or(&defaults);

        assert_eq!(merged.temperature, Some(0.1));
        assert_eq!(merged.top_k, Some(50));
        assert_eq!(merged.repetition_penalty, None);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let bad = GenerationParams {
            temperature: Some(2.5),
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let zero_penalty = GenerationParams {
            repetition_penalty: Some(0.0),
            ..Default::default()
        };
        assert!(zero_penalty.validate().is_err());

        let ok = GenerationParams {
            temperature: Some(0.0),
            top_p: Some(1.0),
            top_k: Some(100),
            max_tokens: Some(1),
            repetition_penalty: Some(1.1),
        };
        assert!(ok.validate().is_ok());
    }
}
