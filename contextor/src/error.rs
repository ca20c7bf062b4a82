//! Typed error for the query path.
//!
//! Every variant knows the pipeline [`Stage`] it failed in.

use std::fmt;

use ai_llm_service::AiLlmError;
use rag_store::RagError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline stages, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Validated,
    CacheLookup,
    Embedding,
    Retrieval,
    Assembly,
    Generation,
    CacheStore,
    Responded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::CacheLookup => "cache_lookup",
            Stage::Embedding => "embedding",
            Stage::Retrieval => "retrieval",
            Stage::Assembly => "assembly",
            Stage::Generation => "generation",
            Stage::CacheStore => "cache_store",
            Stage::Responded => "responded",
        })
    }
}

/// `Clone` so one failure can be handed to every caller joined on it.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("[Contextor] invalid query: {0}")]
    Validation(String),

    #[error("[Contextor] model `{model}` is not allowed; allowed: {}", .allowed.join(", "))]
    InvalidModel { model: String, allowed: Vec<String> },

    #[error("[Contextor] embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("[Contextor] retrieval timed out after {attempts} attempt(s)")]
    RetrievalTimeout { attempts: u32 },

    #[error("[Contextor] retrieval unavailable after {attempts} attempt(s): {last_error}")]
    RetrievalUnavailable { attempts: u32, last_error: String },

    #[error("[Contextor] generation unavailable after {attempts} attempt(s): {last_error}")]
    GenerationUnavailable { attempts: u32, last_error: String },

    #[error("[Contextor] request deadline of {budget_ms} ms exceeded during {stage}")]
    RequestDeadlineExceeded { stage: Stage, budget_ms: u64 },

    #[error("[Contextor] internal error during {stage}: {message}")]
    Internal { stage: Stage, message: String },
}

impl QueryError {
    pub fn stage(&self) -> Stage {
        match self {
            QueryError::Validation(_) | QueryError::InvalidModel { .. } => Stage::Received,
            QueryError::EmbeddingUnavailable(_) => Stage::Embedding,
            QueryError::RetrievalTimeout { .. } | QueryError::RetrievalUnavailable { .. } => {
                Stage::Retrieval
            }
            QueryError::GenerationUnavailable { .. } => Stage::Generation,
            QueryError::RequestDeadlineExceeded { stage, .. }
            | QueryError::Internal { stage, .. } => *stage,
        }
    }

    /// Short machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::Validation(_) => "validation",
            QueryError::InvalidModel { .. } => "invalid_model",
            QueryError::EmbeddingUnavailable(_) => "embedding_unavailable",
            QueryError::RetrievalTimeout { .. } => "retrieval_timeout",
            QueryError::RetrievalUnavailable { .. } => "retrieval_unavailable",
            QueryError::GenerationUnavailable { .. } => "generation_unavailable",
            QueryError::RequestDeadlineExceeded { .. } => "request_deadline_exceeded",
            QueryError::Internal { .. } => "internal",
        }
    }

    /// Maps a retrieval-side failure raised during `stage`.
    pub fn from_rag(err: RagError, stage: Stage) -> Self {
        match err {
            RagError::InvalidFilter(msg) => QueryError::Validation(msg),
            RagError::Embedding(msg) => QueryError::EmbeddingUnavailable(msg),
            RagError::Timeout { attempts } => QueryError::RetrievalTimeout { attempts },
            RagError::Unavailable {
                attempts,
                last_error,
            } => QueryError::RetrievalUnavailable {
                attempts,
                last_error,
            },
            RagError::CallTimeout(_) if stage == Stage::Embedding => {
                QueryError::EmbeddingUnavailable(err.to_string())
            }
            RagError::Qdrant(_) | RagError::CallTimeout(_) => QueryError::RetrievalUnavailable {
                attempts: 1,
                last_error: err.to_string(),
            },
            other => QueryError::Internal {
                stage,
                message: other.to_string(),
            },
        }
    }
}

impl From<AiLlmError> for QueryError {
    fn from(err: AiLlmError) -> Self {
        match err {
            AiLlmError::InvalidModel { model, allowed } => {
                QueryError::InvalidModel { model, allowed }
            }
            AiLlmError::Config(e) => QueryError::Validation(e.to_string()),
            AiLlmError::GenerationUnavailable {
                attempts,
                last_error,
            } => QueryError::GenerationUnavailable {
                attempts,
                last_error,
            },
            other => QueryError::GenerationUnavailable {
                attempts: 1,
                last_error: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rag_errors_keep_their_meaning() {
        let e = QueryError::from_rag(RagError::Timeout { attempts: 3 }, Stage::Retrieval);
        assert_eq!(e, QueryError::RetrievalTimeout { attempts: 3 });
        assert_eq!(e.stage(), Stage::Retrieval);

        let e = QueryError::from_rag(RagError::InvalidFilter("bad".into()), Stage::Validated);
        assert_eq!(e.kind(), "validation");

        let e = QueryError::from_rag(
            RagError::VectorSizeMismatch { got: 3, want: 4 },
            Stage::Embedding,
        );
        assert_eq!(e.stage(), Stage::Embedding);
        assert_eq!(e.kind(), "internal");

        let e = QueryError::from_rag(
            RagError::Rejected("Not found: Collection `docs` doesn't exist!".into()),
            Stage::Retrieval,
        );
        assert!(matches!(e, QueryError::Internal { stage: Stage::Retrieval, .. }));
    }

    #[test]
    fn invalid_model_passes_through() {
        let e: QueryError = AiLlmError::InvalidModel {
            model: "x".into(),
            allowed: vec!["a".into(), "b".into()],
        }
        .into();
        assert_eq!(e.kind(), "invalid_model");
        assert!(e.to_string().contains("a, b"));
    }
}
