//! Service facade: `query`, `health`, `ready` and the operator views
//! (`models`, `info`, `status`), plus background task lifecycle.

use std::sync::{Arc, Mutex};
use std::time::Instant as StdInstant;

use ai_llm_service::Generator;
use chrono::Utc;
use rag_store::{EmbeddingsProvider, RagStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api_types::{
    FinalResponse, HealthReport, InfoReport, ModelInfo, ModelsReport, Query, ReadinessReport,
    StatusReport,
};
use crate::cache::{CacheStats, ResponseCache};
use crate::cfg::CoreConfig;
use crate::clock::{Clock, SystemClock};
use crate::error::QueryError;
use crate::orchestrator::{Orchestrator, QueryCache};
use crate::probes::Probe;
use crate::readiness::ReadinessAggregator;
use crate::stages::{StageObserver, TracingObserver};

/// Collaborators of a [`RagService`]. Required ones go through
/// [`ServiceParts::new`]; the rest have defaults.
pub struct ServiceParts {
    pub cfg: CoreConfig,
    pub store: Arc<RagStore>,
    pub embedder: Arc<dyn EmbeddingsProvider>,
    pub generator: Arc<Generator>,
    pub probes: Vec<Arc<dyn Probe>>,
    pub clock: Arc<dyn Clock>,
    pub observer: Arc<dyn StageObserver>,
}

impl ServiceParts {
    pub fn new(
        cfg: CoreConfig,
        store: Arc<RagStore>,
        embedder: Arc<dyn EmbeddingsProvider>,
        generator: Arc<Generator>,
    ) -> Self {
        Self {
            cfg,
            store,
            embedder,
            generator,
            probes: Vec::new(),
            clock: Arc::new(SystemClock),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn probe(mut self, p: Arc<dyn Probe>) -> Self {
        self.probes.push(p);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = observer;
        self
    }
}

pub struct RagService {
    orchestrator: Orchestrator,
    cache: Arc<QueryCache>,
    readiness: Arc<ReadinessAggregator>,
    started: StdInstant,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RagService {
    pub fn new(parts: ServiceParts) -> Self {
        let cfg = parts.cfg;
        let cache = Arc::new(ResponseCache::new(
            cfg.cache_ttl,
            cfg.cache_capacity,
            parts.clock,
        ));
        let readiness = Arc::new(ReadinessAggregator::new(
            parts.probes,
            cfg.readiness_probe_timeout,
            cfg.readiness_interval,
        ));
        let orchestrator = Orchestrator::new(
            cfg,
            parts.store,
            parts.embedder,
            parts.generator,
            Arc::clone(&cache),
            parts.observer,
        );
        let (shutdown, _) = watch::channel(false);

        Self {
            orchestrator,
            cache,
            readiness,
            started: StdInstant::now(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Starts the cache sweeper and the readiness poller.
    pub fn start_background(&self) {
        let cfg = self.orchestrator.config();
        let sweeper = self
            .cache
            .spawn_sweeper(cfg.cache_sweep_every, self.shutdown.subscribe());
        let poller = self.readiness.spawn_poller(self.shutdown.subscribe());

        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.push(sweeper);
        tasks.push(poller);
        info!(
            sweep_secs = cfg.cache_sweep_every.as_secs(),
            readiness_secs = cfg.readiness_interval.as_secs(),
            "background tasks started"
        );
    }

    /// Stops background tasks and waits for them.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            guard.drain(..).collect()
        };
        for t in tasks {
            if let Err(e) = t.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("background tasks stopped");
    }

    /// # Errors
    /// See [`QueryError`].
    pub async fn query(&self, q: Query) -> Result<FinalResponse, QueryError> {
        self.orchestrator.query(q, None).await
    }

    /// Like [`RagService::query`], recording `request_id` in the response
    /// metadata.
    ///
    /// # Errors
    /// See [`QueryError`].
    pub async fn query_with_id(
        &self,
        q: Query,
        request_id: String,
    ) -> Result<FinalResponse, QueryError> {
        self.orchestrator.query(q, Some(request_id)).await
    }

    /// Liveness. Never touches a dependency.
    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok".to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Readiness, from the cached snapshot while it is fresh.
    pub async fn ready(&self) -> ReadinessReport {
        self.readiness.report().await
    }

    /// Readiness from a new probe round.
    pub async fn refresh_readiness(&self) -> ReadinessReport {
        self.readiness.refresh().await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drops every settled answer; running computations are kept.
    pub fn invalidate_cache(&self) -> CacheStats {
        self.cache.invalidate_all();
        let stats = self.cache.stats();
        info!(in_flight = stats.in_flight, "response cache invalidated");
        stats
    }

    /// The allow-list, marked with what the generation backend serves.
    /// A backend that cannot be listed leaves availability unknown.
    pub async fn models(&self) -> ModelsReport {
        let generator = self.orchestrator.generator();
        let cfg = generator.config();
        let timeout = self.orchestrator.config().readiness_probe_timeout;

        let (served, backend_error) = match generator.served_models(timeout).await {
            Ok(served) => (Some(served), None),
            Err(e) => {
                warn!(error = %e, "listing generation models failed");
                (None, Some(e.to_string()))
            }
        };

        let models = cfg
            .allowed_models
            .iter()
            .map(|name| ModelInfo {
                name: name.clone(),
                default: *name == cfg.default_model,
                available: served.as_ref().map(|s| s.iter().any(|m| m == name)),
            })
            .collect();

        ModelsReport {
            backend: generator.backend().name().to_string(),
            models,
            backend_error,
        }
    }

    pub fn info(&self) -> InfoReport {
        let core = self.orchestrator.config();
        let generation = self.orchestrator.generator().config();
        let retrieval = self.orchestrator.store().config();

        InfoReport {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            default_model: generation.default_model.clone(),
            allowed_models: generation.allowed_models.clone(),
            search_mode: retrieval.search_mode,
            collection: retrieval.collection.clone(),
            similarity_threshold: retrieval.similarity_threshold,
            max_top_k: core.max_top_k,
            request_deadline_ms: core.request_deadline.as_millis() as u64,
            cache_ttl_secs: core.cache_ttl.as_secs(),
        }
    }

    /// Liveness, readiness and cache counters in one view. `refresh` runs a
    /// new readiness round instead of reading the snapshot.
    pub async fn status(&self, refresh: bool) -> StatusReport {
        let readiness = if refresh {
            self.refresh_readiness().await
        } else {
            self.ready().await
        };
        StatusReport {
            health: self.health(),
            readiness,
            cache: self.cache_stats(),
        }
    }
}
