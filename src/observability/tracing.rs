//! Request spans.
//!
//! Every request handled by a fault router runs inside one span keyed by its
//! request id, so events from handlers, retries and throttles correlate.

use axum::http::Method;
use tracing::Span;

/// Create the span a request's middleware chain runs in.
pub fn request_span(request_id: &str, method: &Method, path: &str) -> Span {
    tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    )
}
