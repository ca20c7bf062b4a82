//! End-to-end pipeline tests over in-memory fakes that count their calls.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ai_llm_service::{
    AiLlmError, Completion, CompletionBackend, CompletionRequest, Generator, GeneratorConfig,
    RetryPolicy,
};
use contextor::{
    CacheStatus, CoreConfig, ManualClock, NoopObserver, Overall, Probe, Query, QueryError,
    RagService, ServiceParts, Stage,
};
use futures::future::{BoxFuture, join_all};
use rag_store::{
    DistanceKind, EmbedFuture, EmbeddingsProvider, FilterValue, IndexFuture, KeywordSearch,
    MetadataFilters, RagConfig, RagError, RagStore, RawHit, SearchIndex, VectorSearch,
};
use serde_json::json;

/* ------------------------------------------------------------------------- */
/* Fakes                                                                     */
/* ------------------------------------------------------------------------- */

struct FakeIndex {
    docs: Vec<RawHit>,
    calls: AtomicUsize,
    down: AtomicBool,
}

impl FakeIndex {
    fn new(docs: Vec<(&str, f32, serde_json::Value)>) -> Arc<Self> {
        Arc::new(Self {
            docs: docs
                .into_iter()
                .map(|(id, score, payload)| RawHit {
                    id: id.into(),
                    score,
                    payload: payload.as_object().cloned().unwrap_or_default(),
                })
                .collect(),
            calls: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SearchIndex for FakeIndex {
    fn distance(&self) -> DistanceKind {
        DistanceKind::Cosine
    }

    fn vector_search<'a>(&'a self, req: VectorSearch<'a>) -> IndexFuture<'a, Vec<RawHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if self.down.load(Ordering::SeqCst) {
                return Err(RagError::Qdrant("connection refused".into()));
            }
            Ok(self.docs.iter().take(req.limit).cloned().collect())
        })
    }

    fn keyword_search<'a>(&'a self, req: KeywordSearch<'a>) -> IndexFuture<'a, Vec<RawHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            Ok(self
                .docs
                .iter()
                .filter(|h| {
                    let text = h.payload["text"].as_str().unwrap_or("").to_lowercase();
                    req.terms.iter().any(|t| text.contains(t.as_str()))
                })
                .take(req.limit)
                .cloned()
                .collect())
        })
    }

    fn ping(&self) -> IndexFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

#[derive(Default)]
struct FakeEmbedder {
    calls: AtomicUsize,
}

impl EmbeddingsProvider for FakeEmbedder {
    fn embed<'a>(
        &'a self,
        _text: &'a str,
    ) -> EmbedFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(vec![1.0, 0.0, 0.0]) })
    }
}

#[derive(Clone, Copy)]
enum Mode {
    Answer { delay: Duration },
    Fail,
    Hang,
}

struct FakeBackend {
    mode: Mutex<Mode>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn set(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CompletionBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn complete<'a>(
        &'a self,
        req: &'a CompletionRequest,
    ) -> BoxFuture<'a, ai_llm_service::Result<Completion>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(req.prompt.clone());
        let mode = *self.mode.lock().unwrap();
        Box::pin(async move {
            match mode {
                Mode::Answer { delay } => {
                    tokio::time::sleep(delay).await;
                    Ok(Completion {
                        text: "  OpenShift is Red Hat's Kubernetes platform.\n".into(),
                        tokens_used: Some(9),
                    })
                }
                Mode::Fail => Err(AiLlmError::Timeout(Duration::from_millis(1))),
                Mode::Hang => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        })
    }

    fn list_models(&self) -> BoxFuture<'_, ai_llm_service::Result<Vec<String>>> {
        let mode = *self.mode.lock().unwrap();
        Box::pin(async move {
            if let Mode::Hang = mode {
                futures::future::pending::<()>().await;
            }
            Ok(vec!["granite".to_string()])
        })
    }
}

/* ------------------------------------------------------------------------- */
/* Harness                                                                   */
/* ------------------------------------------------------------------------- */

struct Harness {
    svc: RagService,
    index: Arc<FakeIndex>,
    embedder: Arc<FakeEmbedder>,
    backend: Arc<FakeBackend>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn totals(&self) -> (usize, usize, usize) {
        (
            self.embedder.calls.load(Ordering::SeqCst),
            self.index.calls(),
            self.backend.calls(),
        )
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
        multiplier: 2.0,
        jitter: false,
    }
}

fn corpus() -> Vec<(&'static str, f32, serde_json::Value)> {
    vec![
        ("c1", 0.92, json!({"text": "OpenShift is a Kubernetes platform by Red Hat.", "source": "intro.md", "start_char": 0, "end_char": 46})),
        ("c2", 0.88, json!({"text": "OpenShift routes expose services.", "source": "routes.md"})),
        ("c3", 0.81, json!({"text": "Operators automate OpenShift upgrades.", "source": "ops.md", "page": 4})),
        ("c4", 0.74, json!({"text": "Projects map to namespaces.", "source": "projects.md"})),
        ("c5", 0.12, json!({"text": "Unrelated recipe.", "source": "food.md"})),
    ]
}

fn harness_with(core: CoreConfig, docs: Vec<(&'static str, f32, serde_json::Value)>, mode: Mode) -> Harness {
    let index = FakeIndex::new(docs);
    let embedder = Arc::new(FakeEmbedder::default());
    let backend = FakeBackend::new(mode);
    let clock = Arc::new(ManualClock::new());

    let rag_cfg = RagConfig {
        similarity_threshold: 0.3,
        call_timeout: Duration::from_millis(200),
        retry: fast_retry(),
        ..RagConfig::new_default("http://localhost:6334", "docs")
    };
    let store = Arc::new(RagStore::with_index(rag_cfg, index.clone()).unwrap());

    let gen_cfg = GeneratorConfig {
        allowed_models: vec!["granite".into(), "mistral".into()],
        default_model: "granite".into(),
        call_timeout: Duration::from_secs(5),
        retry: fast_retry(),
        ..GeneratorConfig::default()
    };
    let generator = Arc::new(Generator::new(backend.clone(), gen_cfg).unwrap());

    let svc = RagService::new(
        ServiceParts::new(core, store, embedder.clone(), generator)
            .clock(clock.clone())
            .observer(Arc::new(NoopObserver)),
    );

    Harness {
        svc,
        index,
        embedder,
        backend,
        clock,
    }
}

fn harness() -> Harness {
    harness_with(
        CoreConfig::default(),
        corpus(),
        Mode::Answer {
            delay: Duration::from_millis(20),
        },
    )
}

/* ------------------------------------------------------------------------- */
/* Tests                                                                     */
/* ------------------------------------------------------------------------- */

#[tokio::test(start_paused = true)]
async fn openshift_question_is_answered_with_bounded_sources() {
    let h = harness();
    let resp = h.svc.query(Query::new("What is OpenShift?").top_k(3)).await.unwrap();

    assert!(!resp.answer.is_empty());
    assert_eq!(resp.answer, "OpenShift is Red Hat's Kubernetes platform.");
    assert!(resp.sources.len() <= 3);
    assert_eq!(resp.metadata.model, "granite");
    assert_eq!(resp.metadata.cache, CacheStatus::Miss);
    assert_eq!(resp.metadata.tokens_used, 9);
    assert!(resp.sources.iter().all(|s| (0.0..=1.0).contains(&s.score)));
    assert!(resp.sources.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(resp.confidence > 0.0 && resp.confidence <= 1.0);

    let prompts = h.backend.prompts.lock().unwrap();
    assert!(prompts[0].contains("Document 1:\nOpenShift is a Kubernetes platform by Red Hat."));
    assert!(prompts[0].contains("Question: What is OpenShift?"));
}

#[tokio::test(start_paused = true)]
async fn sources_never_exceed_top_k() {
    for k in 1..=20 {
        let h = harness();
        let resp = h.svc.query(Query::new("openshift platform").top_k(k)).await.unwrap();
        assert!(resp.sources.len() <= k as usize, "top_k {k}");
    }
}

#[tokio::test]
async fn invalid_model_fails_without_calling_anything() {
    let h = harness();
    let err = h
        .svc
        .query(Query::new("What is OpenShift?").model("invalid-model-12345"))
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::InvalidModel { ref model, .. } if model == "invalid-model-12345"));
    assert_eq!(h.totals(), (0, 0, 0));
}

#[tokio::test]
async fn malformed_queries_are_rejected_before_any_call() {
    let h = harness();
    let too_many: MetadataFilters = (0..17)
        .map(|i| (format!("k{i}"), FilterValue::One("v".into())))
        .collect();

    let bad = [
        Query::new(""),
        Query::new("   "),
        Query::new("q").top_k(0),
        Query::new("q").top_k(-3),
        Query::new("q").top_k(21),
        Query::new("x".repeat(2001)),
        Query::new("q").filters(too_many),
    ];
    for q in bad {
        let err = h.svc.query(q).await.unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)), "{err}");
        assert_eq!(err.stage(), Stage::Received);
    }
    assert_eq!(h.totals(), (0, 0, 0));
}

#[tokio::test(start_paused = true)]
async fn identical_concurrent_queries_share_one_computation() {
    let h = harness_with(
        CoreConfig::default(),
        corpus(),
        Mode::Answer {
            delay: Duration::from_millis(200),
        },
    );

    let results = join_all((0..8).map(|_| h.svc.query(Query::new("What is OpenShift?").top_k(3)))).await;

    assert_eq!(h.totals(), (1, 1, 1));
    let first = results[0].as_ref().unwrap();
    let mut joined = 0;
    for r in &results {
        let r = r.as_ref().unwrap();
        assert_eq!(r.answer, first.answer);
        assert_eq!(r.sources, first.sources);
        if r.metadata.cache == CacheStatus::Joined {
            joined += 1;
        }
    }
    assert_eq!(joined, 7);
    assert_eq!(h.svc.cache_stats().entries, 1);
}

#[tokio::test(start_paused = true)]
async fn cached_answer_expires_after_ttl() {
    let h = harness();
    let q = || Query::new("What is OpenShift?").top_k(3);

    h.svc.query(q()).await.unwrap();
    let again = h.svc.query(Query::new("  what IS   openshift? ").top_k(3)).await.unwrap();
    assert_eq!(again.metadata.cache, CacheStatus::Hit);
    assert_eq!(h.backend.calls(), 1);

    h.clock.advance(CoreConfig::default().cache_ttl - Duration::from_secs(1));
    assert_eq!(h.svc.query(q()).await.unwrap().metadata.cache, CacheStatus::Hit);
    assert_eq!(h.backend.calls(), 1);

    h.clock.advance(Duration::from_secs(1));
    assert_eq!(h.svc.query(q()).await.unwrap().metadata.cache, CacheStatus::Miss);
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn generation_failure_returns_no_partial_answer_and_is_not_cached() {
    let h = harness_with(CoreConfig::default(), corpus(), Mode::Fail);

    let err = h.svc.query(Query::new("What is OpenShift?")).await.unwrap_err();
    assert!(matches!(err, QueryError::GenerationUnavailable { attempts: 3, .. }));
    assert_eq!(err.stage(), Stage::Generation);
    assert_eq!(h.index.calls(), 1);
    assert_eq!(h.svc.cache_stats().entries, 0);

    h.backend.set(Mode::Answer {
        delay: Duration::ZERO,
    });
    let resp = h.svc.query(Query::new("What is OpenShift?")).await.unwrap();
    assert_eq!(resp.metadata.cache, CacheStatus::Miss);
    assert_eq!(h.backend.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn request_deadline_reports_the_stage() {
    let core = CoreConfig {
        request_deadline: Duration::from_millis(300),
        ..CoreConfig::default()
    };
    let h = harness_with(core, corpus(), Mode::Hang);

    let err = h.svc.query(Query::new("What is OpenShift?")).await.unwrap_err();
    assert_eq!(
        err,
        QueryError::RequestDeadlineExceeded {
            stage: Stage::Generation,
            budget_ms: 300
        }
    );
    assert_eq!(h.svc.cache_stats().in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn joined_caller_reports_the_stage_of_the_shared_computation() {
    let core = CoreConfig {
        request_deadline: Duration::from_millis(300),
        ..CoreConfig::default()
    };
    let h = harness_with(core, corpus(), Mode::Hang);

    let first = h.svc.query(Query::new("What is OpenShift?"));
    let second = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.svc.query(Query::new("what is  openshift?")).await
    };
    let (a, b) = tokio::join!(first, second);

    let expected = QueryError::RequestDeadlineExceeded {
        stage: Stage::Generation,
        budget_ms: 300,
    };
    assert_eq!(a.unwrap_err(), expected);
    assert_eq!(b.unwrap_err(), expected);
    assert_eq!(h.backend.calls(), 1);
    assert_eq!(h.svc.cache_stats().in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn index_outage_surfaces_as_retrieval_unavailable() {
    let h = harness();
    h.index.down.store(true, Ordering::SeqCst);

    let err = h.svc.query(Query::new("What is OpenShift?")).await.unwrap_err();
    assert!(matches!(err, QueryError::RetrievalUnavailable { attempts: 3, .. }));
    assert_eq!(h.index.calls(), 3);
    assert_eq!(h.backend.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn nothing_relevant_skips_generation() {
    let h = harness_with(
        CoreConfig::default(),
        vec![("x", 0.1, json!({"text": "Unrelated.", "source": "x.md"}))],
        Mode::Answer {
            delay: Duration::ZERO,
        },
    );

    let resp = h.svc.query(Query::new("What is OpenShift?")).await.unwrap();
    assert!(resp.sources.is_empty());
    assert_eq!(resp.confidence, 0.0);
    assert!(resp.answer.starts_with("I couldn't find any relevant information"));
    assert_eq!(h.backend.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn keyword_mode_skips_embedding_and_presentation_flags_apply() {
    let h = harness();
    let mut q = Query::new("OpenShift routes").top_k(2);
    q.retrieval.search_mode = Some(rag_store::SearchMode::Keyword);
    q.include_sources = false;

    let resp = h.svc.query(q).await.unwrap();
    assert!(resp.sources.is_empty());
    assert!(resp.metadata.chunks_retrieved >= 1);
    assert_eq!(resp.metadata.embedding_time_ms, 0);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}

struct Switch {
    name: &'static str,
    up: Arc<AtomicBool>,
}

impl Probe for Switch {
    fn name(&self) -> &str {
        self.name
    }

    fn check(&self, _timeout: Duration) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err("connection refused".to_string())
            }
        })
    }
}

#[tokio::test(start_paused = true)]
async fn readiness_tracks_generation_backend_and_liveness_stays_ok() {
    let index = FakeIndex::new(corpus());
    let store = Arc::new(
        RagStore::with_index(RagConfig::new_default("http://localhost:6334", "docs"), index).unwrap(),
    );
    let backend = FakeBackend::new(Mode::Answer {
        delay: Duration::ZERO,
    });
    let generator = Arc::new(Generator::new(backend, GeneratorConfig::default()).unwrap());
    let gen_up = Arc::new(AtomicBool::new(false));

    let svc = RagService::new(
        ServiceParts::new(CoreConfig::default(), store, Arc::new(FakeEmbedder::default()), generator)
            .probe(Arc::new(Switch {
                name: "index",
                up: Arc::new(AtomicBool::new(true)),
            }))
            .probe(Arc::new(Switch {
                name: "generation",
                up: gen_up.clone(),
            })),
    );
    svc.start_background();

    let r = svc.ready().await;
    assert_eq!(r.overall, Overall::NotReady);
    assert_eq!(r.failing, vec!["generation".to_string()]);
    assert_eq!(svc.health().status, "ok");

    gen_up.store(true, Ordering::SeqCst);
    tokio::time::sleep(CoreConfig::default().readiness_interval + Duration::from_millis(10)).await;
    assert!(svc.ready().await.is_ready());

    svc.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn caller_supplied_request_id_is_recorded() {
    let h = harness();
    let resp = h
        .svc
        .query_with_id(Query::new("What is OpenShift?"), "corr-7f3a".into())
        .await
        .unwrap();
    assert_eq!(resp.metadata.request_id, "corr-7f3a");

    let other = h.svc.query(Query::new("What is OpenShift?")).await.unwrap();
    assert_eq!(other.metadata.cache, CacheStatus::Hit);
    assert_ne!(other.metadata.request_id, "corr-7f3a");
}

#[tokio::test(start_paused = true)]
async fn models_are_marked_by_what_the_backend_serves() {
    let h = harness();
    let report = h.svc.models().await;
    assert_eq!(report.backend, "fake");
    assert_eq!(report.backend_error, None);
    let granite = report.models.iter().find(|m| m.name == "granite").unwrap();
    let mistral = report.models.iter().find(|m| m.name == "mistral").unwrap();
    assert!(granite.default);
    assert_eq!(granite.available, Some(true));
    assert!(!mistral.default);
    assert_eq!(mistral.available, Some(false));

    h.backend.set(Mode::Hang);
    let report = h.svc.models().await;
    assert!(report.backend_error.is_some());
    assert!(report.models.iter().all(|m| m.available.is_none()));
    assert_eq!(report.models.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn info_reports_effective_settings() {
    let h = harness();
    let info = h.svc.info();
    assert_eq!(info.default_model, "granite");
    assert_eq!(info.allowed_models, vec!["granite".to_string(), "mistral".to_string()]);
    assert_eq!(info.collection, "docs");
    assert_eq!(info.max_top_k, CoreConfig::default().max_top_k);
    assert_eq!(
        info.request_deadline_ms,
        CoreConfig::default().request_deadline.as_millis() as u64
    );
}

#[tokio::test(start_paused = true)]
async fn status_refresh_and_cache_invalidation() {
    let index = FakeIndex::new(corpus());
    let store = Arc::new(
        RagStore::with_index(RagConfig::new_default("http://localhost:6334", "docs"), index).unwrap(),
    );
    let backend = FakeBackend::new(Mode::Answer {
        delay: Duration::ZERO,
    });
    let generator = Arc::new(Generator::new(backend, GeneratorConfig::default()).unwrap());
    let gen_up = Arc::new(AtomicBool::new(false));
    let svc = RagService::new(
        ServiceParts::new(CoreConfig::default(), store, Arc::new(FakeEmbedder::default()), generator)
            .probe(Arc::new(Switch {
                name: "generation",
                up: gen_up.clone(),
            })),
    );

    let status = svc.status(false).await;
    assert_eq!(status.health.status, "ok");
    assert_eq!(status.readiness.overall, Overall::NotReady);

    gen_up.store(true, Ordering::SeqCst);
    assert_eq!(svc.status(false).await.readiness.overall, Overall::NotReady);
    assert_eq!(svc.status(true).await.readiness.overall, Overall::Ready);

    svc.query(Query::new("What is OpenShift?")).await.unwrap();
    assert_eq!(svc.status(false).await.cache.entries, 1);
    let after = svc.invalidate_cache();
    assert_eq!(after.entries, 0);
    let again = svc.query(Query::new("What is OpenShift?")).await.unwrap();
    assert_eq!(again.metadata.cache, CacheStatus::Miss);
}
