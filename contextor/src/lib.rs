//! Query orchestration for retrieval-augmented answers.
//!
//! Public API: [`RagService`]. A query is validated, looked up in the
//! single-flight response cache and, on a miss, embedded, retrieved through
//! `rag-store`, assembled into a bounded context, answered by the
//! `ai-llm-service` generator and stored. Readiness of the index and both
//! LLM backends is aggregated separately and never blocks queries.

pub mod api_types;
pub mod assemble;
pub mod cache;
pub mod cfg;
pub mod clock;
mod error;
pub mod orchestrator;
pub mod probes;
pub mod prompt;
pub mod readiness;
pub mod service;
pub mod stages;
pub mod validate;

pub use api_types::{
    DependencyHealth, DependencyStatus, FinalResponse, HealthReport, InfoReport, ModelInfo,
    ModelsReport, Overall, Query, ReadinessReport, ResponseMetadata, RetrievalOverrides,
    SourceRef, StatusReport,
};
pub use cache::{CacheStats, CacheStatus};
pub use cfg::CoreConfig;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QueryError, Stage};
pub use probes::{EmbeddingProbe, GenerationProbe, IndexProbe, Probe};
pub use service::{RagService, ServiceParts};
pub use stages::{NoopObserver, StageObserver, TracingObserver};
