use axum::{Extension, Json, extract::State};
use contextor::{FinalResponse, Query};
use tracing::info;

use crate::{
    core::app_state::AppState, error_handler::AppResult,
    middleware_layer::correlation::CorrelationId,
};

/// `POST /query`: answers one question from the indexed documents. The
/// correlation id becomes `metadata.request_id`.
pub async fn query(
    State(state): State<AppState>,
    Extension(CorrelationId(id)): Extension<CorrelationId>,
    Json(q): Json<Query>,
) -> AppResult<Json<FinalResponse>> {
    let resp = state.service.query_with_id(q, id).await?;
    info!(
        cache = ?resp.metadata.cache,
        sources = resp.sources.len(),
        latency_ms = resp.metadata.latency_ms,
        "query answered"
    );
    Ok(Json(resp))
}
