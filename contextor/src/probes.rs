//! Dependency probes read by the readiness aggregator.

use std::sync::Arc;
use std::time::Duration;

use ai_llm_service::LlmServiceProfiles;
use futures::future::BoxFuture;
use rag_store::RagStore;

/// One dependency check. The aggregator applies the timeout on top.
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a failure makes the service not ready.
    fn required(&self) -> bool {
        true
    }

    /// `Err` carries a human-readable reason.
    fn check(&self, timeout: Duration) -> BoxFuture<'_, Result<(), String>>;
}

/// Qdrant liveness.
pub struct IndexProbe {
    store: Arc<RagStore>,
}

impl IndexProbe {
    pub fn new(store: Arc<RagStore>) -> Self {
        Self { store }
    }
}

impl Probe for IndexProbe {
    fn name(&self) -> &str {
        "index"
    }

    fn check(&self, _timeout: Duration) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move { self.store.ping().await.map_err(|e| e.to_string()) })
    }
}

/// The generation backend answers and serves the configured model.
pub struct GenerationProbe {
    svc: Arc<LlmServiceProfiles>,
}

impl GenerationProbe {
    pub fn new(svc: Arc<LlmServiceProfiles>) -> Self {
        Self { svc }
    }
}

impl Probe for GenerationProbe {
    fn name(&self) -> &str {
        "generation"
    }

    fn check(&self, timeout: Duration) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move {
            self.svc
                .probe_generation(timeout)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
    }
}

/// The embedding backend answers and serves the configured model.
pub struct EmbeddingProbe {
    svc: Arc<LlmServiceProfiles>,
    required: bool,
}

impl EmbeddingProbe {
    /// `required = false` when every configured search mode is keyword-only.
    pub fn new(svc: Arc<LlmServiceProfiles>, required: bool) -> Self {
        Self { svc, required }
    }
}

impl Probe for EmbeddingProbe {
    fn name(&self) -> &str {
        "embedding"
    }

    fn required(&self) -> bool {
        self.required
    }

    fn check(&self, timeout: Duration) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move {
            self.svc
                .probe_embedding(timeout)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
    }
}
