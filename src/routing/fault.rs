//! Handler errors, bailout classification and per-request fault scopes.
//!
//! # States
//! ```text
//! Open → Running: the scope's chain starts
//! Running → Completed: the chain finished without an uncaught fault
//! Open | Running → Faulted: a fault was delivered through the scope
//! Completed → Faulted: the chain itself ended with an unhandled error
//! ```
//!
//! # Design Decisions
//! - One scope per request per router; never reused
//! - The sink delivers at most one error; later ones are logged and dropped
//! - Bailout is set-only: nothing in the crate clears it

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use futures_util::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::observability::metrics;

/// An error raised by a request handler.
///
/// Errors without an explicit status raised by untrusted handlers are
/// flagged for bailout (process-level remediation).
#[derive(Debug)]
pub struct HandlerError {
    message: String,
    status: Option<StatusCode>,
    bailout: bool,
    panicked: bool,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    /// An error without an HTTP status.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            bailout: false,
            panicked: false,
            source: None,
        }
    }

    /// An error carrying an explicit HTTP status.
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::new(message)
        }
    }

    /// Wrap another error, keeping it as the source.
    pub fn from_error<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            source: Some(Box::new(err)),
            ..Self::new(String::new())
        }
        .with_source_message()
    }

    /// Build an error from a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            panicked: true,
            ..Self::new(format!("handler panicked: {}", detail))
        }
    }

    fn with_source_message(mut self) -> Self {
        if let Some(source) = &self.source {
            self.message = source.to_string();
        }
        self
    }

    /// Attach or replace the HTTP status.
    pub fn status_code(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn is_bailout(&self) -> bool {
        self.bailout
    }

    /// Whether the error came from a caught panic.
    pub fn is_panic(&self) -> bool {
        self.panicked
    }

    /// Flag the error for process-level remediation. There is no way to unset it.
    pub fn mark_bailout(&mut self) {
        self.bailout = true;
    }

    /// Apply the trust rule: untrusted and status-less means bailout.
    pub(crate) fn classify(mut self, trusted: bool, origin: &str) -> Self {
        if !trusted && self.status.is_none() {
            self.mark_bailout();
        }
        tracing::warn!(
            origin = %origin,
            trusted,
            bailout = self.bailout,
            status = ?self.status,
            panicked = self.panicked,
            error = %self.message,
            "Handler fault"
        );
        metrics::record_handler_fault(trusted, self.bailout);
        self
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for HandlerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self::from_error(err)
    }
}

/// Malformed JSON from the client is a 400, not a handler bug.
impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_error(err).status_code(StatusCode::BAD_REQUEST)
    }
}

/// Lifecycle of a fault scope.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopePhase {
    Open = 0,
    Running = 1,
    Completed = 2,
    Faulted = 3,
}

impl From<u8> for ScopePhase {
    fn from(val: u8) -> Self {
        match val {
            1 => ScopePhase::Running,
            2 => ScopePhase::Completed,
            3 => ScopePhase::Faulted,
            _ => ScopePhase::Open,
        }
    }
}

struct ScopeInner {
    request_id: String,
    trusted: bool,
    phase: AtomicU8,
    sink: Mutex<Option<oneshot::Sender<HandlerError>>>,
}

/// Isolation boundary for one request's processing.
///
/// Work started with [`FaultScope::spawn`] is supervised: its errors and
/// panics reach the request's error path through the scope's sink.
#[derive(Clone)]
pub struct FaultScope {
    inner: Arc<ScopeInner>,
}

impl fmt::Debug for FaultScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultScope")
            .field("request_id", &self.inner.request_id)
            .field("trusted", &self.inner.trusted)
            .field("phase", &self.phase())
            .finish()
    }
}

impl FaultScope {
    /// Open a scope, returning the receiving end of its error sink.
    pub(crate) fn open(
        request_id: impl Into<String>,
        trusted: bool,
    ) -> (Self, oneshot::Receiver<HandlerError>) {
        let (tx, rx) = oneshot::channel();
        let scope = Self {
            inner: Arc::new(ScopeInner {
                request_id: request_id.into(),
                trusted,
                phase: AtomicU8::new(ScopePhase::Open as u8),
                sink: Mutex::new(Some(tx)),
            }),
        };
        (scope, rx)
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn is_trusted(&self) -> bool {
        self.inner.trusted
    }

    pub fn phase(&self) -> ScopePhase {
        ScopePhase::from(self.inner.phase.load(Ordering::Acquire))
    }

    fn transition(&self, from: ScopePhase, to: ScopePhase) -> bool {
        self.inner
            .phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn begin(&self) {
        self.transition(ScopePhase::Open, ScopePhase::Running);
    }

    /// Stop accepting faults. Returns false if a fault was already delivered.
    pub(crate) fn close(&self) -> bool {
        let sender = self.inner.sink.lock().expect("fault scope mutex poisoned").take();
        if sender.is_some() {
            self.transition(ScopePhase::Running, ScopePhase::Completed);
            true
        } else {
            false
        }
    }

    /// The chain ended with an unhandled error passed along `next`.
    pub(crate) fn mark_faulted(&self) {
        self.inner
            .phase
            .store(ScopePhase::Faulted as u8, Ordering::Release);
    }

    /// Deliver a fault to the request's error path.
    ///
    /// Applies the trust rule. Returns false if the scope already delivered a
    /// fault or has been closed.
    pub fn deliver(&self, err: HandlerError) -> bool {
        let sender = self.inner.sink.lock().expect("fault scope mutex poisoned").take();
        let err = err.classify(self.inner.trusted, "fault_scope");
        let Some(sender) = sender else {
            tracing::warn!(
                request_id = %self.inner.request_id,
                bailout = err.is_bailout(),
                error = %err,
                "Fault raised after scope ended; dropped"
            );
            return false;
        };

        self.inner
            .phase
            .store(ScopePhase::Faulted as u8, Ordering::Release);
        sender.send(err).is_ok()
    }

    /// Run background work under this scope's supervision.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let scope = self.clone();
        let span = tracing::Span::current();
        tokio::spawn(
            async move {
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        scope.deliver(err);
                    }
                    Err(panic) => {
                        scope.deliver(HandlerError::from_panic(panic));
                    }
                }
            }
            .instrument(span),
        )
    }
}
