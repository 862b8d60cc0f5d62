//! Request intake.
//!
//! # Responsibilities
//! - Resolve the request id (propagated header or fresh UUID v4)
//! - Enforce the body size limit and buffer the body
//! - Build the `Exchange` the router runs on
//!
//! # Design Decisions
//! - Request ID resolved as early as possible for tracing
//! - A declared `Content-Length` over the limit is rejected before reading

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::routing::Exchange;

/// Header carrying the request id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Why a request was turned away before routing.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Body(String),
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = match self {
            RequestError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RequestError::Body(_) => StatusCode::BAD_REQUEST,
        };
        tracing::warn!(status = %status, error = %self, "Request rejected");
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// The id from `x-request-id`, or a new UUID v4.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Buffer `req` into an [`Exchange`].
pub async fn read_exchange(req: Request<Body>, max_body_bytes: usize) -> Result<Exchange, RequestError> {
    let (parts, body) = req.into_parts();

    if declared_length(&parts.headers).is_some_and(|len| len > max_body_bytes) {
        return Err(RequestError::TooLarge {
            limit: max_body_bytes,
        });
    }

    let body = axum::body::to_bytes(body, max_body_bytes)
        .await
        .map_err(|e| RequestError::Body(e.to_string()))?;

    let id = request_id(&parts.headers);
    let mut ex = Exchange::new(parts.method, parts.uri, parts.headers, body, id);
    *ex.extensions_mut() = parts.extensions;
    Ok(ex)
}
