//! Embedding provider backed by the shared LLM service profiles.

use std::sync::Arc;

use ai_llm_service::service_profiles::LlmServiceProfiles;
use tracing::debug;

use crate::{EmbedFuture, EmbeddingsProvider, RagError};

/// Embeds through the `embedding` profile and checks the dimension.
#[derive(Clone)]
pub struct ServiceEmbedder {
    svc: Arc<LlmServiceProfiles>,
    dim: Option<usize>,
}

impl ServiceEmbedder {
    /// `dim = None` accepts any vector size.
    pub fn new(svc: Arc<LlmServiceProfiles>, dim: Option<usize>) -> Self {
        Self { svc, dim }
    }
}

impl EmbeddingsProvider for ServiceEmbedder {
    fn embed<'a>(
        &'a self,
        text: &'a str,
    ) -> EmbedFuture<'a> {
        Box::pin(async move {
            let v = self
                .svc
                .embed(text)
                .await
                .map_err(|e| RagError::Embedding(e.to_string()))?;

            if let Some(want) = self.dim {
                if v.len() != want {
                    return Err(RagError::VectorSizeMismatch { got: v.len(), want });
                }
            }
            debug!(dim = v.len(), "query embedded");
            Ok(v)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_llm_service::{LlmModelConfig, LlmProvider};

    fn profiles(embed_url: String) -> Arc<LlmServiceProfiles> {
        let cfg = |provider, endpoint: String, model: &str| LlmModelConfig {
            provider,
            model: model.into(),
            endpoint,
            api_key: None,
            timeout_secs: Some(2),
        };
        Arc::new(
            LlmServiceProfiles::new(
                cfg(LlmProvider::OpenAI, "http://localhost:8001".into(), "granite"),
                cfg(LlmProvider::Ollama, embed_url, "nomic-embed-text"),
                Some(1),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn dimension_is_enforced() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embedding":[0.1,0.2,0.3]}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let svc = profiles(server.url());
        assert_eq!(ServiceEmbedder::new(svc.clone(), Some(3)).embed("q").await.unwrap().len(), 3);

        let err = ServiceEmbedder::new(svc, Some(4)).embed("q").await.unwrap_err();
        assert!(matches!(err, RagError::VectorSizeMismatch { got: 3, want: 4 }));
    }

    #[tokio::test]
    async fn backend_failure_maps_to_embedding_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/embeddings")
            .with_status(500)
            .create_async()
            .await;

        let err = ServiceEmbedder::new(profiles(server.url()), None)
            .embed("q")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }
}
