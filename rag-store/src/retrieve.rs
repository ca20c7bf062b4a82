//! Retrieval: candidate search, score normalization, thresholding and ranking.
//!
//! One retrieval is one retry loop around a "search once" step. The step
//! issues the index calls for the selected mode (each under its own
//! timeout), normalizes scores and returns scored chunks; ranking happens
//! after the loop.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use ai_llm_service::RetryFailure;
use qdrant_client::qdrant::Filter;
use tracing::{debug, info, warn};

use crate::config::{RagConfig, SearchMode};
use crate::errors::RagError;
use crate::index::{KeywordSearch, SearchIndex, VectorSearch};
use crate::record::{DocumentChunk, RagQuery, RawHit, RetrievalResult};
use crate::scoring::{
    hybrid_score, keyword_scores, normalize_keyword_scores, normalize_vector_score, rank_order,
    tokenize,
};

/// Runs one retrieval with retries.
///
/// # Errors
/// - [`RagError::InvalidFilter`] / [`RagError::Config`] /
///   [`RagError::VectorSizeMismatch`] before any index call
/// - [`RagError::Timeout`] when the last attempt timed out
/// - [`RagError::Unavailable`] when attempts ran out on connection errors
pub async fn retrieve(
    cfg: &RagConfig,
    index: &dyn SearchIndex,
    q: RagQuery<'_>,
) -> Result<RetrievalResult, RagError> {
    q.filters.validate()?;
    if q.top_k == 0 {
        return Err(RagError::Config("top_k must be > 0".into()));
    }
    let mode = q.mode.unwrap_or(cfg.search_mode);
    let threshold = q.similarity_threshold.unwrap_or(cfg.similarity_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(RagError::Config(format!(
            "similarity_threshold {threshold} outside 0..=1"
        )));
    }

    let vector = if mode.needs_vector() {
        let v = q
            .vector
            .ok_or_else(|| RagError::Config(format!("{mode} search needs a query vector")))?;
        if let Some(want) = cfg.embedding_dim {
            if v.len() != want {
                return Err(RagError::VectorSizeMismatch { got: v.len(), want });
            }
        }
        Some(v)
    } else {
        None
    };

    let filter = q.filters.to_qdrant_filter();
    let terms = unique_terms(q.text);
    let step = SearchStep {
        cfg,
        index,
        mode,
        text: q.text,
        vector,
        terms: &terms,
        filter: filter.as_ref(),
        top_k: q.top_k,
    };

    let started = Instant::now();
    let (mut chunks, attempts) = cfg
        .retry
        .run("retrieval", q.deadline, |_| step.run(), RagError::is_transient)
        .await
        .map_err(classify_failure)?;

    let candidates = chunks.len();
    chunks.retain(|c| c.score >= threshold);
    chunks.sort_by(rank_order);
    chunks.truncate(q.top_k);

    let retrieval_time_ms = started.elapsed().as_millis() as u64;
    info!(
        mode = %mode,
        top_k = q.top_k,
        candidates,
        returned = chunks.len(),
        attempts,
        retrieval_time_ms,
        "retrieval completed"
    );

    Ok(RetrievalResult {
        chunks,
        retrieval_time_ms,
        search_mode: mode,
        attempts,
    })
}

/// A timed-out last attempt means timeout; other transient errors mean the
/// index is unavailable.
fn classify_failure(f: RetryFailure<RagError>) -> RagError {
    warn!(attempts = f.attempts, stop = ?f.stop, error = %f.error, "retrieval failed");
    match f.error {
        RagError::CallTimeout(_) => RagError::Timeout {
            attempts: f.attempts,
        },
        e if e.is_transient() => RagError::Unavailable {
            attempts: f.attempts,
            last_error: e.to_string(),
        },
        e => e,
    }
}

fn unique_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

struct SearchStep<'a> {
    cfg: &'a RagConfig,
    index: &'a dyn SearchIndex,
    mode: SearchMode,
    text: &'a str,
    vector: Option<&'a [f32]>,
    terms: &'a [String],
    filter: Option<&'a Filter>,
    top_k: usize,
}

impl<'a> SearchStep<'a> {
    fn candidate_limit(&self) -> usize {
        (self.top_k * self.cfg.candidate_multiplier)
            .min(self.cfg.keyword_scan_limit)
            .max(self.top_k)
    }

    async fn run(&self) -> Result<Vec<DocumentChunk>, RagError> {
        match (self.mode, self.vector) {
            (SearchMode::Vector, Some(v)) => {
                let hits = self.vector_hits(v, self.top_k).await?;
                let distance = self.index.distance();
                Ok(hits
                    .into_iter()
                    .map(|h| {
                        let s = normalize_vector_score(h.score, distance);
                        h.into_chunk(s)
                    })
                    .collect())
            }
            (SearchMode::Keyword, _) => {
                let hits = self.keyword_hits(self.candidate_limit()).await?;
                Ok(self.score_lexically(hits, None))
            }
            (SearchMode::Hybrid, Some(v)) => {
                let limit = self.candidate_limit();
                let (vec_hits, kw_hits) =
                    futures::try_join!(self.vector_hits(v, limit), self.keyword_hits(limit))?;

                let distance = self.index.distance();
                let mut vector_scores: HashMap<String, f32> = HashMap::new();
                let mut union: Vec<RawHit> = Vec::with_capacity(vec_hits.len() + kw_hits.len());
                for h in vec_hits {
                    if !vector_scores.contains_key(&h.id) {
                        vector_scores.insert(h.id.clone(), normalize_vector_score(h.score, distance));
                        union.push(h);
                    }
                }
                for h in kw_hits {
                    if !vector_scores.contains_key(&h.id) && !union.iter().any(|u| u.id == h.id) {
                        union.push(h);
                    }
                }
                Ok(self.score_lexically(union, Some(&vector_scores)))
            }
            (_, None) => Err(RagError::Config(format!(
                "{} search needs a query vector",
                self.mode
            ))),
        }
    }

    /// Keyword-scores `hits` over their own texts; blends with vector
    /// scores when given.
    fn score_lexically(
        &self,
        hits: Vec<RawHit>,
        vector_scores: Option<&HashMap<String, f32>>,
    ) -> Vec<DocumentChunk> {
        let texts: Vec<&str> = hits
            .iter()
            .map(|h| h.payload.get("text").and_then(|v| v.as_str()).unwrap_or(""))
            .collect();
        let mut kw = keyword_scores(self.text, &texts);
        normalize_keyword_scores(&mut kw);

        hits.into_iter()
            .zip(kw)
            .map(|(h, k)| {
                let score = match vector_scores {
                    Some(vs) => {
                        let v = vs.get(&h.id).copied().unwrap_or(0.0);
                        hybrid_score(v, k, self.cfg.hybrid_vector_weight)
                    }
                    None => k,
                };
                h.into_chunk(score)
            })
            .collect()
    }

    async fn vector_hits(&self, vector: &[f32], limit: usize) -> Result<Vec<RawHit>, RagError> {
        let req = VectorSearch {
            vector,
            limit,
            filter: self.filter,
        };
        with_call_timeout(self.cfg, self.index.vector_search(req)).await
    }

    async fn keyword_hits(&self, limit: usize) -> Result<Vec<RawHit>, RagError> {
        if self.terms.is_empty() {
            debug!("no keyword terms in query");
            return Ok(Vec::new());
        }
        let req = KeywordSearch {
            terms: self.terms,
            limit,
            filter: self.filter,
        };
        with_call_timeout(self.cfg, self.index.keyword_search(req)).await
    }
}

async fn with_call_timeout<T>(
    cfg: &RagConfig,
    fut: impl std::future::Future<Output = Result<T, RagError>>,
) -> Result<T, RagError> {
    match tokio::time::timeout(cfg.call_timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(RagError::CallTimeout(cfg.call_timeout)),
    }
}
