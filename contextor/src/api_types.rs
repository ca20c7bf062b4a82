//! Public request/response types re-used by external crates (e.g., the HTTP API layer).

use std::collections::BTreeMap;

use ai_llm_service::GenerationParams;
use chrono::{DateTime, Utc};
use rag_store::{CharSpan, DocumentChunk, MetadataFilters, SearchMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{CacheStats, CacheStatus};

pub const DEFAULT_TOP_K: i64 = 5;

/// A question plus the knobs that shape its answer.
///
/// `top_k` is signed so that out-of-range values reach validation instead of
/// failing deserialization.
///
/// # Example
/// ```
/// use contextor::Query;
/// let q: Query = serde_json::from_str(r#"{"question":"What is OpenShift?","top_k":3}"#).unwrap();
/// assert_eq!(q.top_k, 3);
/// assert!(q.include_sources);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(alias = "question")]
    pub text: String,
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default, alias = "metadata_filters")]
    pub filters: MetadataFilters,
    #[serde(default, alias = "model")]
    pub model_name: Option<String>,
    #[serde(default, alias = "llm_params")]
    pub generation: GenerationParams,
    #[serde(default, alias = "retrieval_params")]
    pub retrieval: RetrievalOverrides,
    #[serde(default = "yes")]
    pub include_sources: bool,
    #[serde(default = "yes")]
    pub include_metadata: bool,
}

fn default_top_k() -> i64 {
    DEFAULT_TOP_K
}

fn yes() -> bool {
    true
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            top_k: DEFAULT_TOP_K,
            filters: MetadataFilters::default(),
            model_name: None,
            generation: GenerationParams::default(),
            retrieval: RetrievalOverrides::default(),
            include_sources: true,
            include_metadata: true,
        }
    }

    pub fn top_k(mut self, k: i64) -> Self {
        self.top_k = k;
        self
    }

    pub fn model(mut self, name: impl Into<String>) -> Self {
        self.model_name = Some(name.into());
        self
    }

    pub fn filters(mut self, filters: MetadataFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// Per-request retrieval overrides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOverrides {
    #[serde(default, alias = "search_type", skip_serializing_if = "Option::is_none")]
    pub search_mode: Option<SearchMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f32>,
}

/// Provenance of one passage the answer was grounded on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    pub source: String,
    pub text: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<CharSpan>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl From<DocumentChunk> for SourceRef {
    fn from(c: DocumentChunk) -> Self {
        SourceRef {
            id: c.id,
            source: c.source,
            text: c.text,
            score: c.score,
            span: c.span,
            metadata: c.metadata,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// The resolved model, even when the request named none.
    pub model: String,
    pub latency_ms: u64,
    pub retrieval_time_ms: u64,
    pub generation_time_ms: u64,
    pub embedding_time_ms: u64,
    pub chunks_retrieved: usize,
    pub tokens_used: u32,
    pub search_mode: SearchMode,
    pub cache: CacheStatus,
    pub request_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalResponse {
    pub answer: String,
    /// Non-increasing in score; at most `top_k`.
    pub sources: Vec<SourceRef>,
    /// Mean source score, boosted by 10% with more than one source, capped at 1.
    pub confidence: f32,
    pub metadata: ResponseMetadata,
}

/// Liveness: `ok` for as long as the process answers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub uptime_secs: u64,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStatus {
    Up,
    Down,
}

/// Last probe result for one dependency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: DependencyStatus,
    pub required: bool,
    pub last_checked_at: DateTime<Utc>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overall {
    Ready,
    NotReady,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub overall: Overall,
    /// Required dependencies that are down.
    pub failing: Vec<String>,
    pub dependencies: Vec<DependencyHealth>,
    pub checked_at: DateTime<Utc>,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.overall == Overall::Ready
    }
}

/// One allow-listed generation model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub default: bool,
    /// Whether the backend lists it; `None` when the backend could not be asked.
    pub available: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelsReport {
    pub backend: String,
    pub models: Vec<ModelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_error: Option<String>,
}

/// Effective settings of the running service. Carries no secrets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InfoReport {
    pub name: String,
    pub version: String,
    pub default_model: String,
    pub allowed_models: Vec<String>,
    pub search_mode: SearchMode,
    pub collection: String,
    pub similarity_threshold: f32,
    pub max_top_k: usize,
    pub request_deadline_ms: u64,
    pub cache_ttl_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub health: HealthReport,
    pub readiness: ReadinessReport,
    pub cache: CacheStats,
}
