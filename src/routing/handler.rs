//! Handler styles and the adapter giving them one calling convention.
//!
//! # Responsibilities
//! - Accept callback-style handlers `(exchange, next)` and `(error, exchange, next)`
//! - Accept step-style handlers returning a future of an optional value
//! - Turn panics, `next.fail` and step errors into one classified fault
//!
//! # Design Decisions
//! - `Next` is consumed by value, so a handler signals at most once
//! - Dropping `Next` without signalling ends the chain (the handler responded)
//! - A step value is attached to the response, never written directly

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::routing::exchange::{Exchange, RequestView};
use crate::routing::fault::HandlerError;

enum Signal {
    Proceed,
    Fail(HandlerError),
}

/// Single-use continuation handed to callback-style handlers.
pub struct Next {
    tx: oneshot::Sender<Signal>,
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

impl Next {
    fn channel() -> (Self, oneshot::Receiver<Signal>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Continue with the next handler.
    pub fn proceed(self) {
        let _ = self.tx.send(Signal::Proceed);
    }

    /// Continue on the error path.
    pub fn fail(self, err: impl Into<HandlerError>) {
        let _ = self.tx.send(Signal::Fail(err.into()));
    }

    /// Finish from background work: proceed on `Ok`, fail on `Err` or panic.
    pub fn spawn<F>(self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let span = tracing::Span::current();
        tokio::spawn(
            async move {
                let signal = match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(Ok(())) => Signal::Proceed,
                    Ok(Err(err)) => Signal::Fail(err),
                    Err(panic) => Signal::Fail(HandlerError::from_panic(panic)),
                };
                let _ = self.tx.send(signal);
            }
            .instrument(span),
        )
    }
}

type CallbackFn = dyn Fn(&mut Exchange, Next) + Send + Sync;
type ErrorFn = dyn Fn(HandlerError, &mut Exchange, Next) + Send + Sync;
type StepFn = dyn Fn(RequestView) -> BoxFuture<'static, Result<Option<serde_json::Value>, HandlerError>>
    + Send
    + Sync;

#[derive(Clone)]
enum Kind {
    Callback(Arc<CallbackFn>),
    OnError(Arc<ErrorFn>),
    Step(Arc<StepFn>),
}

/// A request handler in one of the supported styles.
#[derive(Clone)]
pub struct Handler {
    kind: Kind,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let style = match self.kind {
            Kind::Callback(_) => "callback",
            Kind::OnError(_) => "on_error",
            Kind::Step(_) => "step",
        };
        f.debug_struct("Handler").field("style", &style).finish()
    }
}

impl Handler {
    /// Plain middleware: write to the exchange, then signal `next`.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&mut Exchange, Next) + Send + Sync + 'static,
    {
        Self {
            kind: Kind::Callback(Arc::new(f)),
        }
    }

    /// Error middleware; only runs while an error is pending.
    pub fn on_error<F>(f: F) -> Self
    where
        F: Fn(HandlerError, &mut Exchange, Next) + Send + Sync + 'static,
    {
        Self {
            kind: Kind::OnError(Arc::new(f)),
        }
    }

    /// Async step. `Ok(Some(v))` attaches `v` to the response.
    pub fn step<F, Fut, V, E>(f: F) -> Self
    where
        F: Fn(RequestView) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<V>, E>> + Send + 'static,
        V: Serialize + Send + 'static,
        E: Into<HandlerError> + Send + 'static,
    {
        let step = move |view: RequestView| {
            let fut = f(view);
            async move {
                let output = match fut.await {
                    Ok(output) => output,
                    Err(err) => return Err(err.into()),
                };
                match output {
                    Some(value) => serde_json::to_value(value).map(Some).map_err(|e| {
                        HandlerError::new(format!("step value not serializable: {}", e))
                    }),
                    None => Ok(None),
                }
            }
            .boxed()
        };
        Self {
            kind: Kind::Step(Arc::new(step)),
        }
    }

    pub fn handles_errors(&self) -> bool {
        matches!(self.kind, Kind::OnError(_))
    }
}

/// How a handler left the chain.
#[derive(Debug)]
pub enum Flow {
    /// Run the next matching handler.
    Continue,
    /// Run the next matching error handler with this error.
    Fault(HandlerError),
    /// The handler ended the request.
    Halt,
}

/// A handler adapted to the router's calling convention, with its trust level.
#[derive(Clone, Debug)]
pub struct Adapted {
    handler: Handler,
    trusted: bool,
    name: Arc<str>,
}

/// Adapt `handler` for a router of the given trust.
pub fn adapt(handler: Handler, trusted: bool, name: impl Into<Arc<str>>) -> Adapted {
    Adapted {
        handler,
        trusted,
        name: name.into(),
    }
}

impl Adapted {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    pub fn handles_errors(&self) -> bool {
        self.handler.handles_errors()
    }

    /// Run the handler against `ex`.
    ///
    /// A handler whose style does not fit the chain's state (normal handler
    /// with an error pending, or the reverse) is passed over.
    pub async fn invoke(&self, ex: &mut Exchange, pending: Option<HandlerError>) -> Flow {
        match (&self.handler.kind, pending) {
            (Kind::Callback(f), None) => {
                let (next, rx) = Next::channel();
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(ex, next))) {
                    return self.fault(HandlerError::from_panic(panic));
                }
                self.settle(rx).await
            }
            (Kind::OnError(f), Some(err)) => {
                let (next, rx) = Next::channel();
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(err, ex, next))) {
                    return self.fault(HandlerError::from_panic(panic));
                }
                self.settle(rx).await
            }
            (Kind::Step(f), None) => {
                let view = ex.view();
                let fut = match catch_unwind(AssertUnwindSafe(|| f(view))) {
                    Ok(fut) => fut,
                    Err(panic) => return self.fault(HandlerError::from_panic(panic)),
                };
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(Ok(Some(value))) => {
                        ex.response_mut().attach(value);
                        Flow::Continue
                    }
                    Ok(Ok(None)) => Flow::Continue,
                    Ok(Err(err)) => self.fault(err),
                    Err(panic) => self.fault(HandlerError::from_panic(panic)),
                }
            }
            (_, Some(err)) => Flow::Fault(err),
            (_, None) => Flow::Continue,
        }
    }

    async fn settle(&self, rx: oneshot::Receiver<Signal>) -> Flow {
        match rx.await {
            Ok(Signal::Proceed) => Flow::Continue,
            Ok(Signal::Fail(err)) => self.fault(err),
            Err(_) => Flow::Halt,
        }
    }

    fn fault(&self, err: HandlerError) -> Flow {
        Flow::Fault(err.classify(self.trusted, &self.name))
    }
}
