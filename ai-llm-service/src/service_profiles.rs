//! Shared LLM service with two profiles: `generation` and `embedding`.
//!
//! - Lives in the same Tokio runtime as the application.
//! - Construct once, wrap in `Arc`, and pass clones to dependents.
//! - Clients are built eagerly, so a bad endpoint fails at startup.
//! - When both profiles point at the same backend and provider, embedding
//!   still gets its own client so its timeout can differ.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use ai_llm_service::{LlmModelConfig, LlmProvider, LlmServiceProfiles};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ai_llm_service::AiLlmError> {
//!     let generation = LlmModelConfig {
//!         provider: LlmProvider::OpenAI,
//!         model: "RedHatAI/granite-3.1-8b-instruct".into(),
//!         endpoint: "http://localhost:8001".into(),
//!         api_key: None,
//!         timeout_secs: Some(60),
//!     };
//!     let embedding = LlmModelConfig {
//!         provider: LlmProvider::Ollama,
//!         model: "nomic-embed-text".into(),
//!         endpoint: "http://localhost:11434".into(),
//!         api_key: None,
//!         timeout_secs: Some(30),
//!     };
//!
//!     let svc = Arc::new(LlmServiceProfiles::new(generation, embedding, Some(5))?);
//!     let emb = svc.embed("Ferris").await?;
//!     println!("Embedding dim = {}", emb.len());
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::AiLlmError,
    generation::CompletionBackend,
    health_service::{HealthService, HealthStatus},
    services::{ollama_service::OllamaService, open_ai_service::OpenAiService},
};

enum EmbeddingClient {
    Ollama(OllamaService),
    OpenAi(OpenAiService),
}

/// Generation and embedding clients plus a health checker for both.
pub struct LlmServiceProfiles {
    generation: LlmModelConfig,
    embedding: LlmModelConfig,

    completion: Arc<dyn CompletionBackend>,
    embedder: EmbeddingClient,

    health: HealthService,
}

impl LlmServiceProfiles {
    /// Creates both clients.
    ///
    /// # Errors
    /// Returns [`AiLlmError`] if either client cannot be built.
    pub fn new(
        generation: LlmModelConfig,
        embedding: LlmModelConfig,
        health_timeout_secs: Option<u64>,
    ) -> Result<Self, AiLlmError> {
        let completion: Arc<dyn CompletionBackend> = match generation.provider {
            LlmProvider::OpenAI => Arc::new(OpenAiService::new(generation.clone())?),
            LlmProvider::Ollama => Arc::new(OllamaService::new(generation.clone())?),
        };
        let embedder = match embedding.provider {
            LlmProvider::OpenAI => EmbeddingClient::OpenAi(OpenAiService::new(embedding.clone())?),
            LlmProvider::Ollama => EmbeddingClient::Ollama(OllamaService::new(embedding.clone())?),
        };

        Ok(Self {
            generation,
            embedding,
            completion,
            embedder,
            health: HealthService::new(health_timeout_secs)?,
        })
    }

    /// Backend used by the [`crate::Generator`].
    pub fn completion_backend(&self) -> Arc<dyn CompletionBackend> {
        Arc::clone(&self.completion)
    }

    /// Computes embeddings using the **embedding** profile.
    ///
    /// # Errors
    /// Returns [`AiLlmError`] if embedding fails.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AiLlmError> {
        match &self.embedder {
            EmbeddingClient::Ollama(cli) => cli.embeddings(input).await,
            EmbeddingClient::OpenAi(cli) => cli.embeddings(input).await,
        }
    }

    /// Strict probe of the generation backend.
    pub async fn probe_generation(&self, timeout: Duration) -> Result<Duration, AiLlmError> {
        self.health.probe(&self.generation, Some(timeout)).await
    }

    /// Strict probe of the embedding backend.
    pub async fn probe_embedding(&self, timeout: Duration) -> Result<Duration, AiLlmError> {
        self.health.probe(&self.embedding, Some(timeout)).await
    }

    /// Returns a health snapshot for all distinct profiles.
    pub async fn health_all(&self) -> Vec<HealthStatus> {
        let mut list = vec![self.generation.clone()];
        if self.embedding != self.generation {
            list.push(self.embedding.clone());
        }
        self.health.check_many(&list).await
    }
}
