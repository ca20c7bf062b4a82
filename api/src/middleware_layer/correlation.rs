//! `X-Correlation-ID` on every request and response.
//!
//! A well-formed incoming id is kept; anything else is replaced by a fresh
//! UUID. Handlers read it from the [`CorrelationId`] extension.

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info_span};
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

const MAX_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationId(pub String);

/// Accepts ids made of ASCII alphanumerics, `-`, `_`, `.` and `:`.
fn accept(raw: &str) -> Option<String> {
    let id = raw.trim();
    let valid = !id.is_empty()
        && id.len() <= MAX_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'));
    valid.then(|| id.to_string())
}

fn resolve(req: &Request<Body>) -> String {
    req.headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(accept)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub async fn correlation_id(mut req: Request<Body>, next: Next) -> Response {
    let id = resolve(&req);
    req.extensions_mut().insert(CorrelationId(id.clone()));

    let span = info_span!(
        "http",
        correlation_id = %id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    let mut res = next.run(req).instrument(span).await;

    if let Ok(v) = HeaderValue::from_str(&id) {
        res.headers_mut().insert(CORRELATION_HEADER, v);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_header(value: &str) -> Request<Body> {
        Request::builder()
            .header(CORRELATION_HEADER, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn well_formed_ids_are_kept() {
        assert_eq!(resolve(&with_header("  gw-42:trace.7_a ")), "gw-42:trace.7_a");
    }

    #[test]
    fn missing_or_hostile_ids_are_replaced() {
        let missing = resolve(&Request::new(Body::empty()));
        assert!(Uuid::parse_str(&missing).is_ok());

        let long = "x".repeat(MAX_LEN + 1);
        for bad in ["", "has space", "semi;colon", long.as_str()] {
            let id = resolve(&with_header(bad));
            assert!(Uuid::parse_str(&id).is_ok(), "{bad:?} was kept");
        }
    }
}
