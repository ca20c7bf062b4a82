use std::str::FromStr;

use crate::error_handler::ConfigError;

/// Backend used for text generation and embeddings.
///
/// `OpenAI` covers every server that speaks the OpenAI REST dialect,
/// including vLLM's `/v1/completions` and `/v1/models` endpoints.
///
/// # Examples
///
/// ```
/// use ai_llm_service::LlmProvider;
///
/// let p: LlmProvider = "vllm".parse().unwrap();
/// assert_eq!(p, LlmProvider::OpenAI);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmProvider {
    /// Local Ollama runtime.
    Ollama,
    /// OpenAI-compatible server (vLLM, OpenAI).
    OpenAI,
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "openai" | "vllm" | "chatgpt" => Ok(LlmProvider::OpenAI),
            other => Err(ConfigError::UnsupportedProvider(other.to_string())),
        }
    }
}
