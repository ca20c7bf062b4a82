use axum::{Json, extract::State, http::StatusCode};
use contextor::{HealthReport, ReadinessReport};

use crate::core::app_state::AppState;

/// `GET /health`: liveness only.
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.service.health())
}

/// `GET /ready`: 200 when every required dependency is up, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessReport>) {
    let report = state.service.ready().await;
    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
