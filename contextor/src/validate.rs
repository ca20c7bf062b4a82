//! Synchronous request checks, run before any external call.

use ai_llm_service::GenerationParams;
use rag_store::MetadataFilters;

use crate::api_types::{Query, RetrievalOverrides};
use crate::cfg::CoreConfig;
use crate::error::{QueryError, Stage};

/// A query whose shape has been checked. The model is resolved separately.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidQuery {
    /// Trimmed.
    pub text: String,
    pub top_k: usize,
    pub filters: MetadataFilters,
    pub model_name: Option<String>,
    pub generation: GenerationParams,
    pub retrieval: RetrievalOverrides,
}

/// # Errors
/// [`QueryError::Validation`] naming the first problem found.
pub fn validate_query(q: &Query, cfg: &CoreConfig) -> Result<ValidQuery, QueryError> {
    let text = q.text.trim();
    if text.is_empty() {
        return Err(QueryError::Validation("question must not be empty".into()));
    }
    let len = text.chars().count();
    if len > cfg.query_max_chars {
        return Err(QueryError::Validation(format!(
            "question is {len} chars; at most {} allowed",
            cfg.query_max_chars
        )));
    }

    if q.top_k < 1 || q.top_k > cfg.max_top_k as i64 {
        return Err(QueryError::Validation(format!(
            "top_k must be within 1..={}, got {}",
            cfg.max_top_k, q.top_k
        )));
    }

    q.filters
        .validate()
        .map_err(|e| QueryError::from_rag(e, Stage::Received))?;

    q.generation
        .validate()
        .map_err(|e| QueryError::Validation(e.to_string()))?;

    if let Some(t) = q.retrieval.similarity_threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(QueryError::Validation(format!(
                "similarity_threshold must be within 0..=1, got {t}"
            )));
        }
    }

    Ok(ValidQuery {
        text: text.to_string(),
        top_k: q.top_k as usize,
        filters: q.filters.clone(),
        model_name: q
            .model_name
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string),
        generation: q.generation,
        retrieval: q.retrieval,
    })
}
