//! Response finalization.
//!
//! # Responsibilities
//! - Turn a dispatched `Exchange` into the HTTP response
//! - Render unhandled errors as JSON with their status (or 500)
//! - Report bailout faults to the shutdown coordinator
//!
//! # Design Decisions
//! - A raw body written by a handler wins over an attached value
//! - Internal error messages stay hidden unless the error carried an explicit
//!   status or `expose_errors` is set
//! - Nothing produced and no error means 404

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::config::RouterConfig;
use crate::lifecycle::{Shutdown, ShutdownReason};
use crate::routing::{Exchange, Flow, HandlerError};

/// Build the response for a request that finished dispatch with `flow`.
pub fn finalize(ex: Exchange, flow: Flow, config: &RouterConfig, shutdown: Option<&Shutdown>) -> Response {
    let request_id = ex.request_id().to_string();
    if let Flow::Fault(err) = flow {
        return error_response(&request_id, err, config, shutdown);
    }

    let (status, headers, value, body) = ex.into_response_draft().into_parts();
    let mut response = match (body, value) {
        (Some(body), _) => (status.unwrap_or(StatusCode::OK), body).into_response(),
        (None, Some(value)) => (status.unwrap_or(StatusCode::OK), Json(value)).into_response(),
        (None, None) => {
            tracing::debug!(request_id = %request_id, "No handler produced a response");
            (
                status.unwrap_or(StatusCode::NOT_FOUND),
                Json(serde_json::json!({ "error": "not found", "request_id": request_id })),
            )
                .into_response()
        }
    };
    response.headers_mut().extend(headers);
    response
}

fn error_response(
    request_id: &str,
    err: HandlerError,
    config: &RouterConfig,
    shutdown: Option<&Shutdown>,
) -> Response {
    let status = err.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if err.is_bailout() {
        tracing::error!(
            request_id = %request_id,
            error = %err,
            "Untrusted handler fault; requesting worker replacement"
        );
        if let Some(shutdown) = shutdown {
            shutdown.trigger(ShutdownReason::Bailout {
                request_id: request_id.to_string(),
                message: err.message().to_string(),
            });
        }
    } else if status.is_server_error() {
        tracing::error!(request_id = %request_id, status = %status, error = %err, "Request failed");
    } else {
        tracing::debug!(request_id = %request_id, status = %status, error = %err, "Request rejected");
    }

    let message = if err.status().is_some() || config.expose_errors {
        err.message().to_string()
    } else {
        status.canonical_reason().unwrap_or("error").to_string()
    };
    (
        status,
        Json(serde_json::json!({ "error": message, "request_id": request_id })),
    )
        .into_response()
}
