//! HTTP surface: `POST /query`, `GET /health`, `GET /ready` and the operator
//! routes `GET /models`, `GET /info`, `GET /status`, `DELETE /cache`.
//! Every response carries `X-Correlation-ID`.

use std::future::Future;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};

pub mod core;
pub mod error_handler;
pub mod middleware_layer;
pub mod routes;

pub use crate::core::app_state::AppState;
pub use error_handler::{AppError, AppResult};

use crate::middleware_layer::{correlation::correlation_id, json_extractor::json_error_mapper};
use crate::routes::{
    health_route::{health, ready},
    operator_route::{invalidate_cache, models, service_info, status},
    query_route::query,
};

/// Default bind address when `API_ADDRESS` is unset.
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:8000";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/models", get(models))
        .route("/info", get(service_info))
        .route("/status", get(status))
        .route("/cache", delete(invalidate_cache))
        .layer(middleware::from_fn(json_error_mapper))
        .layer(middleware::from_fn(correlation_id))
        .with_state(state)
}

/// Serves until `shutdown` resolves, then drains in-flight requests.
///
/// # Errors
/// [`AppError::Bind`] if the address cannot be bound, [`AppError::Server`]
/// if the server loop fails.
pub async fn start<F>(addr: &str, state: AppState, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.map_err(|source| AppError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    info!(%addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(AppError::Server)
}

/// Resolves on Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl+C; shutting down");
    }
    info!("shutdown requested");
}
