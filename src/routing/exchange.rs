//! Per-request context threaded through the middleware chain.
//!
//! An [`Exchange`] owns the buffered request, the response being built and
//! the fault scope the chain runs in. Step handlers see an owned
//! [`RequestView`] snapshot instead of borrowing the exchange.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::http::{header, Extensions, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use serde::de::DeserializeOwned;

use crate::routing::fault::{FaultScope, HandlerError};

/// The response under construction.
#[derive(Debug, Default)]
pub struct ResponseDraft {
    status: Option<StatusCode>,
    headers: HeaderMap,
    value: Option<serde_json::Value>,
    body: Option<Bytes>,
}

impl ResponseDraft {
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Attach a value for serialization further down the chain.
    pub fn attach(&mut self, value: serde_json::Value) {
        self.value = Some(value);
    }

    pub fn value(&self) -> Option<&serde_json::Value> {
        self.value.as_ref()
    }

    /// Write a raw body. Takes precedence over an attached value.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = Some(body.into());
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Whether a handler produced anything to send.
    pub fn is_produced(&self) -> bool {
        self.body.is_some() || self.value.is_some()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Option<StatusCode>,
        HeaderMap,
        Option<serde_json::Value>,
        Option<Bytes>,
    ) {
        (self.status, self.headers, self.value, self.body)
    }
}

/// One request's state as it moves through a router.
#[derive(Debug)]
pub struct Exchange {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    request_id: String,
    params: BTreeMap<String, String>,
    mount_len: usize,
    extensions: Extensions,
    response: ResponseDraft,
    scope: Option<FaultScope>,
}

impl Exchange {
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            request_id: request_id.into(),
            params: BTreeMap::new(),
            mount_len: 0,
            extensions: Extensions::new(),
            response: ResponseDraft::default(),
            scope: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Full request path.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Path relative to the router currently dispatching.
    pub fn route_path(&self) -> &str {
        match self.uri.path().get(self.mount_len..) {
            Some("") | None => "/",
            Some(rest) => rest,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Per-request values shared between handlers.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn response(&self) -> &ResponseDraft {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ResponseDraft {
        &mut self.response
    }

    /// Write a complete response.
    pub fn respond(&mut self, status: StatusCode, body: impl Into<Bytes>) {
        self.response.set_status(status);
        self.response.set_body(body);
    }

    /// Write a JSON response.
    pub fn respond_json(&mut self, status: StatusCode, value: &impl serde::Serialize) -> Result<(), HandlerError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| HandlerError::new(format!("response serialization failed: {}", e)))?;
        self.response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.respond(status, body);
        Ok(())
    }

    /// The fault scope of the router currently dispatching.
    pub fn scope(&self) -> Option<&FaultScope> {
        self.scope.as_ref()
    }

    /// Owned snapshot of the request for step handlers.
    pub fn view(&self) -> RequestView {
        RequestView {
            method: self.method.clone(),
            uri: self.uri.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            request_id: self.request_id.clone(),
            params: self.params.clone(),
            extensions: self.extensions.clone(),
            scope: self.scope.clone(),
        }
    }

    pub(crate) fn bind_scope(&mut self, scope: Option<FaultScope>) -> Option<FaultScope> {
        std::mem::replace(&mut self.scope, scope)
    }

    pub(crate) fn set_params(&mut self, params: BTreeMap<String, String>) {
        self.params = params;
    }

    /// Consume `prefix_len` more bytes of the path; returns the previous offset.
    pub(crate) fn enter_mount(&mut self, prefix_len: usize) -> usize {
        let previous = self.mount_len;
        self.mount_len = (self.mount_len + prefix_len).min(self.uri.path().len());
        previous
    }

    pub(crate) fn leave_mount(&mut self, previous: usize) {
        self.mount_len = previous;
    }

    pub(crate) fn into_response_draft(self) -> ResponseDraft {
        self.response
    }
}

/// Owned copy of a request as seen by a step handler.
#[derive(Debug, Clone)]
pub struct RequestView {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    request_id: String,
    params: BTreeMap<String, String>,
    extensions: Extensions,
    scope: Option<FaultScope>,
}

impl RequestView {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decode the body as JSON; malformed input is a 400.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    /// Scope for supervised background work.
    pub fn scope(&self) -> Option<&FaultScope> {
        self.scope.as_ref()
    }
}
