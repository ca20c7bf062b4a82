use std::sync::Arc;

use ai_llm_service::{
    Generator, GeneratorConfig, LlmServiceProfiles,
    config::default_config::{config_embedding, config_generation},
    error_handler::env_opt,
    telemetry,
};
use anyhow::Context;
use contextor::{
    CoreConfig, EmbeddingProbe, GenerationProbe, IndexProbe, RagService, ServiceParts,
};
use rag_store::{RagConfig, RagStore, ServiceEmbedder};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the process environment is used as is.
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(telemetry::env_filter("info"))
        .with(telemetry::layer())
        .init();

    let generation = config_generation().context("generation profile")?;
    let embedding = config_embedding().context("embedding profile")?;
    let gen_cfg = GeneratorConfig::from_env(&generation).context("generator config")?;
    let svc = Arc::new(
        LlmServiceProfiles::new(generation, embedding, Some(5)).context("llm clients")?,
    );
    let generator = Arc::new(
        Generator::new(svc.completion_backend(), gen_cfg).context("generator")?,
    );

    let rag_cfg = RagConfig::from_env().context("retrieval config")?;
    let needs_embedding = rag_cfg.search_mode.needs_vector();
    let embedder = Arc::new(ServiceEmbedder::new(Arc::clone(&svc), rag_cfg.embedding_dim));
    let store = Arc::new(RagStore::new(rag_cfg).context("vector store")?);

    let core_cfg = CoreConfig::from_env().context("core config")?;

    for status in svc.health_all().await {
        let model = status.model.as_deref().unwrap_or("");
        if status.ok {
            info!(endpoint = %status.endpoint, model, latency_ms = status.latency_ms as u64, "llm backend reachable");
        } else {
            warn!(
                endpoint = %status.endpoint,
                model,
                error = %status.message,
                "llm backend not reachable at startup"
            );
        }
    }

    let parts = ServiceParts::new(core_cfg, Arc::clone(&store), embedder, generator)
        .probe(Arc::new(IndexProbe::new(store)))
        .probe(Arc::new(GenerationProbe::new(Arc::clone(&svc))))
        .probe(Arc::new(EmbeddingProbe::new(svc, needs_embedding)));
    let service = Arc::new(RagService::new(parts));
    service.start_background();

    let addr = env_opt("API_ADDRESS").unwrap_or_else(|| api::DEFAULT_ADDRESS.to_string());
    let served = api::start(
        &addr,
        api::AppState::new(Arc::clone(&service)),
        api::shutdown_signal(),
    )
    .await;

    service.shutdown().await;
    served.context("http server")?;
    Ok(())
}
