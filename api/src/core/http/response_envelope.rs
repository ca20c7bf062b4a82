use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use contextor::Stage;
use serde::Serialize;

/// Body of every non-2xx response. Successful calls return their payload
/// unwrapped.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ApiError,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    /// Stable, machine-readable error code (e.g. "VALIDATION_ERROR").
    pub code: &'static str,
    pub message: String,
    /// Pipeline stage the request failed in, when it got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ApiErrorDetail>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    /// Field path like `question` or `retrieval.search_mode`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Optional hint to help the client fix the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(
        code: &'static str,
        message: impl Into<String>,
        stage: Option<Stage>,
        details: Vec<ApiErrorDetail>,
    ) -> Self {
        Self {
            success: false,
            error: ApiError {
                code,
                message: message.into(),
                stage,
                details,
            },
        }
    }

    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}
