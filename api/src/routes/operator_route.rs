use axum::{
    Json,
    extract::{Query, State},
};
use contextor::{CacheStats, InfoReport, ModelsReport, StatusReport};
use serde::Deserialize;

use crate::core::app_state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StatusParams {
    #[serde(default)]
    pub refresh: bool,
}

/// `GET /models`: allow-listed models and whether the backend serves them.
pub async fn models(State(state): State<AppState>) -> Json<ModelsReport> {
    Json(state.service.models().await)
}

/// `GET /info`: effective settings.
pub async fn service_info(State(state): State<AppState>) -> Json<InfoReport> {
    Json(state.service.info())
}

/// `GET /status[?refresh=true]`: health, readiness and cache counters.
pub async fn status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Json<StatusReport> {
    Json(state.service.status(params.refresh).await)
}

/// `DELETE /cache`: drops every cached answer.
pub async fn invalidate_cache(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.service.invalidate_cache())
}
