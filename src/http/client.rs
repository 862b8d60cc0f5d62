//! Outbound JSON calls to the next pipeline stage.
//!
//! # Responsibilities
//! - Issue GET / POST requests carrying JSON to the upstream service
//! - Expose them as a `FunctionSet` so policies wrap them uniformly
//! - Throttle every call and retry failed ones per the service config
//!
//! # Design Decisions
//! - Retry wraps throttle: each attempt takes its own slot, and a backoff
//!   wait never holds one
//! - Non-2xx responses are errors and therefore retried
//! - The caller's request id is forwarded as `x-request-id`
//! - Calls go straight to the stage; environment proxies are ignored

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::config::{ServiceConfig, UpstreamConfig};
use crate::http::request::X_REQUEST_ID;
use crate::resilience::{FunctionSet, Retry, Throttle};
use crate::routing::HandlerError;

/// Errors from an upstream call.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to build upstream client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no upstream operation named {0}")]
    UnknownOperation(&'static str),
}

/// Upstream failures surface to clients as 502.
impl From<UpstreamError> for HandlerError {
    fn from(err: UpstreamError) -> Self {
        HandlerError::from_error(err).status_code(StatusCode::BAD_GATEWAY)
    }
}

/// Arguments of one upstream call.
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub path: String,
    pub body: Option<Value>,
    pub request_id: Option<String>,
}

impl UpstreamCall {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            body: None,
            request_id: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::get(path)
        }
    }

    /// Forward the caller's request id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

pub type UpstreamFunctions = FunctionSet<UpstreamCall, Value, UpstreamError>;

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

async fn send(client: reqwest::Client, base: Arc<str>, call: UpstreamCall) -> Result<Value, UpstreamError> {
    let url = join_url(&base, &call.path);
    let mut request = match call.body {
        Some(ref body) => client.post(&url).json(body),
        None => client.get(&url),
    };
    if let Some(ref id) = call.request_id {
        request = request.header(X_REQUEST_ID, id.as_str());
    }

    let response = request
        .send()
        .await
        .map_err(|source| UpstreamError::Transport {
            url: url.clone(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::Status { url, status, body });
    }
    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }

    response
        .json::<Value>()
        .await
        .map_err(|source| UpstreamError::Decode { url, source })
}

/// Client for the next pipeline stage.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    base_url: Arc<str>,
    calls: UpstreamFunctions,
    throttle: Throttle,
}

impl UpstreamClient {
    /// Build the client with explicit policies.
    pub fn new(config: &UpstreamConfig, throttle: Throttle, retry: Retry) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .no_proxy()
            .build()
            .map_err(UpstreamError::Build)?;
        let base_url: Arc<str> = Arc::from(config.base_url.as_str());

        let raw = {
            let (get_client, get_base) = (client.clone(), Arc::clone(&base_url));
            let (post_client, post_base) = (client, Arc::clone(&base_url));
            FunctionSet::new("upstream")
                .with_operation("get_json", move |call: UpstreamCall| {
                    send(get_client.clone(), Arc::clone(&get_base), call)
                })
                .with_operation("post_json", move |call: UpstreamCall| {
                    send(post_client.clone(), Arc::clone(&post_base), call)
                })
                .with_value("base_url", Value::String(base_url.to_string()))
        };

        tracing::info!(
            base_url = %base_url,
            max_concurrent = throttle.max(),
            retries = retry.config().retries,
            "Upstream client ready"
        );

        Ok(Self {
            base_url,
            calls: raw.wrap(&throttle).wrap(&retry),
            throttle,
        })
    }

    /// Build the client from the service config's upstream, throttle and retry sections.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, UpstreamError> {
        Self::new(
            &config.upstream,
            Throttle::new("upstream", config.throttle.max_concurrent),
            Retry::new(config.retries.clone()),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The wrapped function set.
    pub fn functions(&self) -> &UpstreamFunctions {
        &self.calls
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json(&self, call: UpstreamCall) -> Result<Value, UpstreamError> {
        self.invoke("get_json", call).await
    }

    /// POST a JSON body to `path` and decode the JSON reply.
    pub async fn post_json(&self, call: UpstreamCall) -> Result<Value, UpstreamError> {
        self.invoke("post_json", call).await
    }

    async fn invoke(&self, name: &'static str, call: UpstreamCall) -> Result<Value, UpstreamError> {
        let op = self
            .calls
            .operation(name)
            .ok_or(UpstreamError::UnknownOperation(name))?;
        op.call(call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://agg:8080/", "/usage"), "http://agg:8080/usage");
        assert_eq!(join_url("http://agg:8080", "usage/7"), "http://agg:8080/usage/7");
    }

    #[test]
    fn test_wrapped_set_keeps_shape() {
        let client = UpstreamClient::from_config(&ServiceConfig::default()).unwrap();
        let names: Vec<_> = client.functions().names().collect();
        assert_eq!(names, vec!["base_url", "get_json", "post_json"]);
        assert_eq!(
            client.functions().operation("get_json").unwrap().name(),
            "upstream.get_json"
        );
        assert_eq!(
            client.functions().value("base_url"),
            Some(&Value::String("http://127.0.0.1:8081".into()))
        );
    }

    #[test]
    fn test_upstream_errors_are_bad_gateway() {
        let err = HandlerError::from(UpstreamError::Status {
            url: "http://agg/usage".into(),
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        });
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
        assert_eq!(err.message(), "http://agg/usage returned 503 Service Unavailable");
    }
}
