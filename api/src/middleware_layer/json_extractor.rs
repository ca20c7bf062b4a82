//! Rewrites axum's plain-text body rejections (malformed JSON, wrong field
//! types, wrong content type) into the JSON error envelope.

use axum::{
    body::{Body, Bytes},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};

use crate::core::http::response_envelope::{ApiErrorDetail, ErrorEnvelope};

async fn take_body(res: Response) -> (axum::http::response::Parts, Bytes) {
    let (parts, body) = res.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    (parts, bytes)
}

fn guess_path_from_serde_msg(msg: &str) -> Option<String> {
    const FIELDS: [&str; 10] = [
        "question",
        "text",
        "top_k",
        "filters",
        "model_name",
        "generation",
        "retrieval",
        "search_mode",
        "include_sources",
        "include_metadata",
    ];
    FIELDS
        .iter()
        .find(|f| msg.contains(&format!("`{f}`")) || msg.contains(*f))
        .map(|f| f.to_string())
}

fn hint_for(msg: &str) -> Option<String> {
    if msg.contains("missing field") {
        Some("Send at least { \"question\": \"...\" }.".into())
    } else if msg.contains("unknown variant") {
        Some("search_mode is one of \"vector\", \"keyword\", \"hybrid\".".into())
    } else if msg.contains("expected a map") || msg.contains("expected struct") {
        Some("Expected a JSON object here (e.g. { \"field\": \"value\" }).".into())
    } else if msg.contains("Content-Type") {
        Some("Set `Content-Type: application/json`.".into())
    } else {
        None
    }
}

fn is_json(res: &Response) -> bool {
    res.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

pub async fn json_error_mapper(req: Request<Body>, next: Next) -> Response {
    let res = next.run(req).await;
    let status = res.status();

    let rejection = matches!(
        status,
        StatusCode::BAD_REQUEST
            | StatusCode::UNPROCESSABLE_ENTITY
            | StatusCode::UNSUPPORTED_MEDIA_TYPE
    );
    // Handler errors are already enveloped.
    if !rejection || is_json(&res) {
        return res;
    }

    let (mut parts, bytes) = take_body(res).await;
    let original = String::from_utf8_lossy(&bytes);

    let detail = ApiErrorDetail {
        path: guess_path_from_serde_msg(&original),
        hint: hint_for(&original),
    };
    let code = match status {
        StatusCode::BAD_REQUEST => "BAD_REQUEST",
        StatusCode::UNSUPPORTED_MEDIA_TYPE => "UNSUPPORTED_MEDIA_TYPE",
        _ => "VALIDATION_ERROR",
    };
    let envelope = ErrorEnvelope::new(code, original.trim(), None, vec![detail]);

    let body = match serde_json::to_vec(&envelope) {
        Ok(v) => v,
        Err(_) => bytes.to_vec(),
    };
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(body))
}
