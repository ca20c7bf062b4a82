//! Retrieval over Qdrant for the RAG query path.
//!
//! This crate provides a clean API to:
//! - Retrieve top‑K chunks for a query in vector, keyword or hybrid mode
//! - Validate bounded metadata filters and translate them to Qdrant
//! - Embed query text through the shared LLM service
//! - Ping the index for readiness
//!
//! Every returned score is normalized into `[0, 1]`.

pub mod config;
pub mod embed;
mod errors;
pub mod filters;
pub mod index;
pub mod qdrant_facade;
pub mod record;
mod retrieve;
pub mod scoring;

use std::sync::Arc;

pub use config::{DistanceKind, RagConfig, SearchMode};
pub use embed::{EmbedFuture, EmbeddingsProvider, service::ServiceEmbedder};
pub use errors::RagError;
pub use filters::{FilterValue, MetadataFilters};
pub use index::{SearchIndex, VectorSearch, KeywordSearch, IndexFuture};
pub use record::{CharSpan, DocumentChunk, RagQuery, RawHit, RetrievalResult, UNKNOWN_SOURCE};

use tracing::trace;

/// High-level facade that wires configuration and the search index.
///
/// This is the single entry point recommended for application code.
pub struct RagStore {
    cfg: RagConfig,
    index: Arc<dyn SearchIndex>,
}

impl RagStore {
    /// Constructs a store backed by Qdrant.
    ///
    /// # Errors
    /// Returns `RagError::Config` / `RagError::Qdrant` if the client cannot be built.
    pub fn new(cfg: RagConfig) -> Result<Self, RagError> {
        trace!("RagStore::new collection={}", cfg.collection);
        let index = qdrant_facade::QdrantFacade::new(&cfg)?;
        Ok(Self {
            cfg,
            index: Arc::new(index),
        })
    }

    /// Constructs a store over any [`SearchIndex`].
    ///
    /// # Errors
    /// Returns `RagError::Config` for invalid settings.
    pub fn with_index(cfg: RagConfig, index: Arc<dyn SearchIndex>) -> Result<Self, RagError> {
        cfg.validate()?;
        Ok(Self { cfg, index })
    }

    pub fn config(&self) -> &RagConfig {
        &self.cfg
    }

    /// Ranked, thresholded chunks for `query`; at most `query.top_k`.
    ///
    /// # Errors
    /// See [`RagError`]; `Timeout` and `Unavailable` are final after retries.
    pub async fn retrieve(&self, query: RagQuery<'_>) -> Result<RetrievalResult, RagError> {
        trace!("RagStore::retrieve top_k={}", query.top_k);
        retrieve::retrieve(&self.cfg, self.index.as_ref(), query).await
    }

    /// Index liveness, bounded by the per-call timeout.
    ///
    /// # Errors
    /// `RagError::CallTimeout` or the index error.
    pub async fn ping(&self) -> Result<(), RagError> {
        match tokio::time::timeout(self.cfg.call_timeout, self.index.ping()).await {
            Ok(res) => res,
            Err(_) => Err(RagError::CallTimeout(self.cfg.call_timeout)),
        }
    }
}
