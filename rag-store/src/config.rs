//! Runtime and collection configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ai_llm_service::RetryPolicy;
use ai_llm_service::error_handler::{env_opt, env_opt_f32, env_opt_u32, env_opt_u64};
use serde::{Deserialize, Serialize};

use crate::errors::RagError;

/// Distance function used for the vector space.
///
/// Decides how raw Qdrant scores are mapped into `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceKind {
    /// Cosine similarity (recommended for most embeddings).
    Cosine,
    /// Dot product (useful for normalized vectors).
    Dot,
    /// Euclidean distance (L2); lower raw values are better.
    Euclid,
}

impl FromStr for DistanceKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceKind::Cosine),
            "dot" => Ok(DistanceKind::Dot),
            "euclid" | "euclidean" | "l2" => Ok(DistanceKind::Euclid),
            other => Err(RagError::Config(format!("unknown distance `{other}`"))),
        }
    }
}

/// How candidates are found and scored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Vector,
    Keyword,
    Hybrid,
}

impl SearchMode {
    /// Whether this mode needs a query embedding.
    pub fn needs_vector(self) -> bool {
        !matches!(self, SearchMode::Keyword)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchMode::Vector => "vector",
            SearchMode::Keyword => "keyword",
            SearchMode::Hybrid => "hybrid",
        })
    }
}

impl FromStr for SearchMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" | "semantic" => Ok(SearchMode::Vector),
            "keyword" | "text" => Ok(SearchMode::Keyword),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(RagError::Config(format!("unknown search mode `{other}`"))),
        }
    }
}

/// Configuration for retrieval.
#[derive(Clone, Debug)]
pub struct RagConfig {
    /// Qdrant gRPC endpoint, e.g. `http://localhost:6334`.
    pub qdrant_url: String,
    /// Optional API key for Qdrant Cloud.
    pub qdrant_api_key: Option<String>,
    /// Target collection name.
    pub collection: String,
    /// Distance function of the collection (Cosine by default).
    pub distance: DistanceKind,
    /// Expected query vector size; `None` skips the check.
    pub embedding_dim: Option<usize>,
    /// Exact search flag (false = HNSW ANN).
    pub exact_search: bool,
    /// Default search mode when a request does not pick one.
    pub search_mode: SearchMode,
    /// Hits scoring below this (after normalization) are dropped.
    pub similarity_threshold: f32,
    /// Weight of the vector score in hybrid mode; keyword gets `1 - w`.
    pub hybrid_vector_weight: f32,
    /// Candidates fetched per requested result in keyword and hybrid modes.
    pub candidate_multiplier: usize,
    /// Upper bound on keyword candidates scanned per call.
    pub keyword_scan_limit: usize,
    /// Timeout of a single index call.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl RagConfig {
    /// Creates a sane default config for a given collection name and Qdrant endpoint.
    pub fn new_default(url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            qdrant_url: url.into(),
            qdrant_api_key: None,
            collection: collection.into(),
            distance: DistanceKind::Cosine,
            embedding_dim: None,
            exact_search: false,
            search_mode: SearchMode::Vector,
            similarity_threshold: 0.7,
            hybrid_vector_weight: 0.5,
            candidate_multiplier: 4,
            keyword_scan_limit: 256,
            call_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }

    /// Loads the config from `QDRANT_*`, `RAG_*` and `EMBEDDING_DIM`.
    ///
    /// # Errors
    /// Returns `RagError::Config` for unparsable or out-of-range values.
    pub fn from_env() -> Result<Self, RagError> {
        let url = env_opt("QDRANT_URL").unwrap_or_else(|| "http://localhost:6334".to_string());
        let collection = env_opt("QDRANT_COLLECTION").unwrap_or_else(|| "rag_documents".to_string());
        let mut cfg = Self::new_default(url, collection);

        cfg.qdrant_api_key = env_opt("QDRANT_API_KEY");
        if let Some(d) = env_opt("QDRANT_DISTANCE") {
            cfg.distance = d.parse()?;
        }
        if let Some(m) = env_opt("RAG_SEARCH_MODE") {
            cfg.search_mode = m.parse()?;
        }
        cfg.embedding_dim = env_opt_u64("EMBEDDING_DIM")
            .map_err(config_err)?
            .map(|d| d as usize);
        if let Some(t) = env_opt_f32("RAG_SIMILARITY_THRESHOLD").map_err(config_err)? {
            cfg.similarity_threshold = t;
        }
        if let Some(w) = env_opt_f32("RAG_HYBRID_VECTOR_WEIGHT").map_err(config_err)? {
            cfg.hybrid_vector_weight = w;
        }
        if let Some(ms) = env_opt_u64("RAG_CALL_TIMEOUT_MS").map_err(config_err)? {
            cfg.call_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_opt_u32("RAG_MAX_RETRIES").map_err(config_err)? {
            cfg.retry.max_attempts = n;
        }
        cfg.exact_search = env_opt("RAG_EXACT_SEARCH").is_some_and(|v| v == "true" || v == "1");

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates config values.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.qdrant_url.trim().is_empty() {
            return Err(RagError::Config("qdrant_url is empty".into()));
        }
        if self.collection.trim().is_empty() {
            return Err(RagError::Config("collection is empty".into()));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RagError::Config(
                "similarity_threshold must be within 0..=1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.hybrid_vector_weight) {
            return Err(RagError::Config(
                "hybrid_vector_weight must be within 0..=1".into(),
            ));
        }
        if self.candidate_multiplier == 0 || self.keyword_scan_limit == 0 {
            return Err(RagError::Config(
                "candidate_multiplier and keyword_scan_limit must be > 0".into(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(RagError::Config("call_timeout must be > 0".into()));
        }
        Ok(())
    }
}

fn config_err(e: ai_llm_service::AiLlmError) -> RagError {
    RagError::Config(e.to_string())
}
