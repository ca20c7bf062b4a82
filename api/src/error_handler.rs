use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use contextor::{QueryError, Stage};
use thiserror::Error;
use tracing::{error, warn};

use crate::core::http::response_envelope::ErrorEnvelope;

/// Public application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // --- IO / network / server ---
    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error")]
    Server(#[source] std::io::Error),

    // --- Request ---
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Bind { .. } | AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Query(e) => match e {
                QueryError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                QueryError::InvalidModel { .. } => StatusCode::BAD_REQUEST,
                QueryError::EmbeddingUnavailable(_)
                | QueryError::RetrievalUnavailable { .. }
                | QueryError::GenerationUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                QueryError::RetrievalTimeout { .. } | QueryError::RequestDeadlineExceeded { .. } => {
                    StatusCode::GATEWAY_TIMEOUT
                }
                QueryError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Bind { .. } => "BIND_ERROR",
            AppError::Server(_) => "SERVER_ERROR",
            AppError::Query(e) => match e {
                QueryError::Validation(_) => "VALIDATION_ERROR",
                QueryError::InvalidModel { .. } => "INVALID_MODEL",
                QueryError::EmbeddingUnavailable(_) => "EMBEDDING_UNAVAILABLE",
                QueryError::RetrievalTimeout { .. } => "RETRIEVAL_TIMEOUT",
                QueryError::RetrievalUnavailable { .. } => "RETRIEVAL_UNAVAILABLE",
                QueryError::GenerationUnavailable { .. } => "GENERATION_UNAVAILABLE",
                QueryError::RequestDeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
                QueryError::Internal { .. } => "INTERNAL_ERROR",
            },
        }
    }

    fn stage(&self) -> Option<Stage> {
        match self {
            AppError::Query(e) => Some(e.stage()),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(code = self.error_code(), error = %self, "request failed");
        } else {
            warn!(code = self.error_code(), error = %self, "request rejected");
        }
        ErrorEnvelope::new(self.error_code(), self.to_string(), self.stage(), Vec::new())
            .into_response_with_status(status)
    }
}

/// Handy result alias used across handlers.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(e: QueryError) -> StatusCode {
        AppError::from(e).status_code()
    }

    #[test]
    fn query_errors_map_to_http_statuses() {
        assert_eq!(
            status(QueryError::Validation("empty".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(QueryError::InvalidModel {
                model: "gpt".into(),
                allowed: vec!["granite".into()],
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(QueryError::GenerationUnavailable {
                attempts: 3,
                last_error: "503".into(),
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(QueryError::RequestDeadlineExceeded {
                stage: Stage::Generation,
                budget_ms: 30_000,
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(QueryError::Internal {
                stage: Stage::Assembly,
                message: "boom".into(),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn error_body_carries_code_and_stage() {
        let res = AppError::from(QueryError::RetrievalTimeout { attempts: 3 }).into_response();
        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);

        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "RETRIEVAL_TIMEOUT");
        assert_eq!(body["error"]["stage"], "retrieval");
    }
}
