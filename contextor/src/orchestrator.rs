//! The query pipeline.
//!
//! `RECEIVED → VALIDATED → CACHE_LOOKUP → (hit) RESPONDED`, or on a miss
//! `EMBEDDING → RETRIEVAL → ASSEMBLY → GENERATION → CACHE_STORE → RESPONDED`.
//! Any stage may end in a [`QueryError`].
//!
//! Validation and model resolution are synchronous and happen before any
//! external call. The rest runs under one request deadline; when it fires,
//! this caller stops waiting and, if nobody else is joined on the same
//! computation, the in-flight calls are dropped with it.

use std::sync::Arc;
use std::time::Instant as StdInstant;

use ai_llm_service::{GenerationRequest, Generator};
use rag_store::{EmbeddingsProvider, RagQuery, RagStore};
use tokio::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::api_types::{FinalResponse, Query, ResponseMetadata, SourceRef};
use crate::assemble::assemble;
use crate::cache::{CacheStatus, ResponseCache, query_key};
use crate::cfg::{CoreConfig, MAX_REQUEST_DEADLINE};
use crate::error::{QueryError, Stage};
use crate::prompt::{NO_CONTEXT_ANSWER, build_prompt};
use crate::stages::{StageCell, StageObserver};
use crate::validate::{ValidQuery, validate_query};

/// Running computations carry the stage cell of the caller that started them.
pub type QueryCache = ResponseCache<FinalResponse, QueryError, Arc<StageCell>>;

pub struct Orchestrator {
    cfg: CoreConfig,
    store: Arc<RagStore>,
    embedder: Arc<dyn EmbeddingsProvider>,
    generator: Arc<Generator>,
    cache: Arc<QueryCache>,
    observer: Arc<dyn StageObserver>,
}

/// Everything one cache-miss computation owns.
struct Pipeline {
    cfg: CoreConfig,
    store: Arc<RagStore>,
    embedder: Arc<dyn EmbeddingsProvider>,
    generator: Arc<Generator>,
    observer: Arc<dyn StageObserver>,
    query: ValidQuery,
    model: String,
    request_id: String,
    stage: Arc<StageCell>,
    deadline: Instant,
}

impl Orchestrator {
    pub fn new(
        cfg: CoreConfig,
        store: Arc<RagStore>,
        embedder: Arc<dyn EmbeddingsProvider>,
        generator: Arc<Generator>,
        cache: Arc<QueryCache>,
        observer: Arc<dyn StageObserver>,
    ) -> Self {
        Self {
            cfg,
            store,
            embedder,
            generator,
            cache,
            observer,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn store(&self) -> &RagStore {
        &self.store
    }

    /// Answers `q`. `request_id` becomes `metadata.request_id`; a fresh UUID
    /// is used when it is `None`.
    ///
    /// # Errors
    /// See [`QueryError`]; no partial answer is ever returned.
    #[instrument(skip_all, fields(request_id = tracing::field::Empty))]
    pub async fn query(
        &self,
        q: Query,
        request_id: Option<String>,
    ) -> Result<FinalResponse, QueryError> {
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::Span::current().record("request_id", request_id.as_str());
        let started = StdInstant::now();

        let out = self.run(&request_id, &q, started).await;
        match &out {
            Ok(_) => self.observer.finished(&request_id, started.elapsed()),
            Err(e) => self.observer.failed(&request_id, e),
        }
        out
    }

    async fn run(
        &self,
        request_id: &str,
        q: &Query,
        started: StdInstant,
    ) -> Result<FinalResponse, QueryError> {
        self.observer.entered(request_id, Stage::Received);
        let valid = validate_query(q, &self.cfg)?;
        let model = self.generator.resolve_model(valid.model_name.as_deref())?;
        self.observer.entered(request_id, Stage::Validated);

        let budget = self.cfg.request_deadline.min(MAX_REQUEST_DEADLINE);
        let deadline = Instant::now() + budget;
        let stage = Arc::new(StageCell::new(Stage::CacheLookup));
        self.observer.entered(request_id, Stage::CacheLookup);

        let key = query_key(
            &valid.text,
            valid.top_k,
            &valid.filters,
            &model,
            &valid.generation,
            &valid.retrieval,
        );
        debug!(key = %key, model = %model, top_k = valid.top_k, "cache lookup");

        let pipeline = Pipeline {
            cfg: self.cfg.clone(),
            store: Arc::clone(&self.store),
            embedder: Arc::clone(&self.embedder),
            generator: Arc::clone(&self.generator),
            observer: Arc::clone(&self.observer),
            query: valid,
            model,
            request_id: request_id.to_string(),
            stage: Arc::clone(&stage),
            deadline,
        };
        let flight = self
            .cache
            .begin(&key, Arc::clone(&stage), move || pipeline.run());
        // A joined caller reports the stage of the computation it waits on.
        let stage = flight.progress().cloned().unwrap_or(stage);
        let lookup = self.cache.finish(&key, flight);

        let (mut resp, status) = match tokio::time::timeout_at(deadline, lookup).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(QueryError::RequestDeadlineExceeded {
                    stage: stage.get(),
                    budget_ms: budget.as_millis() as u64,
                });
            }
        };

        resp.metadata.cache = status;
        resp.metadata.request_id = request_id.to_string();
        resp.metadata.latency_ms = started.elapsed().as_millis() as u64;
        if !q.include_sources {
            resp.sources.clear();
        } else if !q.include_metadata {
            for s in &mut resp.sources {
                s.metadata.clear();
            }
        }

        self.observer.entered(request_id, Stage::Responded);
        Ok(resp)
    }
}

impl Pipeline {
    fn enter(&self, stage: Stage) {
        self.stage.set(stage);
        self.observer.entered(&self.request_id, stage);
    }

    async fn run(self) -> Result<FinalResponse, QueryError> {
        let mode = self
            .query
            .retrieval
            .search_mode
            .unwrap_or(self.store.config().search_mode);

        let mut embedding_time_ms = 0;
        let vector = if mode.needs_vector() {
            self.enter(Stage::Embedding);
            let t = StdInstant::now();
            let v = self
                .embedder
                .embed(&self.query.text)
                .await
                .map_err(|e| QueryError::from_rag(e, Stage::Embedding))?;
            embedding_time_ms = t.elapsed().as_millis() as u64;
            Some(v)
        } else {
            None
        };

        self.enter(Stage::Retrieval);
        let retrieved = self
            .store
            .retrieve(RagQuery {
                text: &self.query.text,
                vector: vector.as_deref(),
                top_k: self.query.top_k,
                filters: &self.query.filters,
                mode: Some(mode),
                similarity_threshold: self.query.retrieval.similarity_threshold,
                deadline: Some(self.deadline),
            })
            .await
            .map_err(|e| QueryError::from_rag(e, Stage::Retrieval))?;

        let mut metadata = ResponseMetadata {
            model: self.model.clone(),
            latency_ms: 0,
            retrieval_time_ms: retrieved.retrieval_time_ms,
            generation_time_ms: 0,
            embedding_time_ms,
            chunks_retrieved: retrieved.chunks.len(),
            tokens_used: 0,
            search_mode: retrieved.search_mode,
            cache: CacheStatus::Miss,
            request_id: self.request_id.clone(),
        };

        if retrieved.chunks.is_empty() {
            debug!("nothing above threshold; skipping generation");
            self.enter(Stage::CacheStore);
            return Ok(FinalResponse {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 0.0,
                metadata,
            });
        }

        self.enter(Stage::Assembly);
        let ctx = assemble(
            &retrieved.chunks,
            self.cfg.max_ctx_chars,
            self.cfg.chunk_overlap,
        );
        let prompt = build_prompt(&self.query.text, &ctx.chunks);

        self.enter(Stage::Generation);
        let generated = self
            .generator
            .generate(
                GenerationRequest {
                    prompt,
                    model_name: Some(self.model.clone()),
                    params: self.query.generation,
                },
                Some(self.deadline),
            )
            .await?;

        self.enter(Stage::CacheStore);
        metadata.generation_time_ms = generated.generation_time_ms;
        metadata.tokens_used = generated.tokens_used;

        let sources: Vec<SourceRef> = retrieved.chunks.into_iter().map(SourceRef::from).collect();
        Ok(FinalResponse {
            answer: generated.answer,
            confidence: confidence(&sources),
            sources,
            metadata,
        })
    }
}

/// Mean source score, ×1.1 with more than one source, capped at 1.
pub fn confidence(sources: &[SourceRef]) -> f32 {
    if sources.is_empty() {
        return 0.0;
    }
    let mean = sources.iter().map(|s| s.score).sum::<f32>() / sources.len() as f32;
    let boosted = if sources.len() > 1 { mean * 1.1 } else { mean };
    boosted.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(score: f32) -> SourceRef {
        SourceRef {
            id: "x".into(),
            source: "s".into(),
            text: "t".into(),
            score,
            span: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn confidence_follows_mean_with_boost() {
        assert_eq!(confidence(&[]), 0.0);
        assert!((confidence(&[src(0.8)]) - 0.8).abs() < 1e-6);
        assert!((confidence(&[src(0.8), src(0.6)]) - 0.77).abs() < 1e-5);
        assert_eq!(confidence(&[src(0.95), src(0.99)]), 1.0);
    }
}
