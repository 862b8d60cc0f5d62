//! Fault-isolating router.
//!
//! # Responsibilities
//! - Register handlers, adapting each one with the router's trust level
//! - Run every request's chain inside a fresh fault scope
//! - Deliver at most one error per scope to the error path
//! - Compose routers of different trust with `mount`
//!
//! # Design Decisions
//! - Trust is fixed when the router is built
//! - Layers run in registration order; while an error is pending only error
//!   handlers run
//! - A scope fault wins over a chain that is still running: the chain is
//!   dropped and the error path starts from the first layer
//! - A fault that arrives after the response was written is logged and dropped
//! - The router never writes error bodies itself; finalization does

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::Instrument;

use crate::config::RouterConfig;
use crate::http::{request, response};
use crate::lifecycle::Shutdown;
use crate::observability::{metrics, tracing::request_span};
use crate::routing::exchange::Exchange;
use crate::routing::fault::{FaultScope, HandlerError};
use crate::routing::handler::{adapt, Adapted, Flow, Handler};
use crate::routing::matcher::{AndMatcher, Matcher, MethodMatcher, PathPattern};

enum Target {
    Handler(Adapted),
    Mount(Arc<FaultRouter>),
}

struct Layer {
    matcher: Box<dyn Matcher>,
    target: Target,
}

/// A router whose handlers all run under one trust level.
pub struct FaultRouter {
    trusted: bool,
    layers: Vec<Layer>,
}

impl fmt::Debug for FaultRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultRouter")
            .field("trusted", &self.trusted)
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl FaultRouter {
    /// Build a router. `trusted` routers never flag faults for bailout.
    pub fn build(trusted: bool) -> Self {
        Self {
            trusted,
            layers: Vec::new(),
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Register middleware for every path.
    pub fn use_handler(&mut self, handler: Handler) -> &mut Self {
        self.use_at("/", handler)
    }

    /// Register middleware for `path` and everything below it.
    pub fn use_at(&mut self, path: &str, handler: Handler) -> &mut Self {
        let label = format!("use {}", path);
        self.push_handler(Box::new(PathPattern::prefix(path)), label, handler);
        self
    }

    /// Register handlers for one path, per method.
    pub fn route(&mut self, path: &str) -> Route<'_> {
        Route {
            router: self,
            path: path.to_string(),
        }
    }

    /// Mount `router` below `prefix`. It keeps its own trust level and scope.
    pub fn mount(&mut self, prefix: &str, router: FaultRouter) -> &mut Self {
        self.layers.push(Layer {
            matcher: Box::new(PathPattern::prefix(prefix)),
            target: Target::Mount(Arc::new(router)),
        });
        self
    }

    fn push_handler(&mut self, matcher: Box<dyn Matcher>, label: String, handler: Handler) {
        let adapted = adapt(handler, self.trusted, label);
        self.layers.push(Layer {
            matcher,
            target: Target::Handler(adapted),
        });
    }

    /// Run the request through this router.
    pub async fn dispatch(&self, ex: &mut Exchange) -> Flow {
        self.handle(ex, None).await
    }

    fn handle<'a>(&'a self, ex: &'a mut Exchange, pending: Option<HandlerError>) -> BoxFuture<'a, Flow> {
        async move {
            let (scope, mut faults) = FaultScope::open(ex.request_id(), self.trusted);
            let outer = ex.bind_scope(Some(scope.clone()));
            let mount_base = ex.enter_mount(0);
            scope.begin();

            let chain = self.guarded(ex, pending);
            let settled = tokio::select! {
                biased;
                Ok(err) = &mut faults => Err(err),
                flow = chain => Ok(flow),
            };

            let mut flow = match settled {
                Ok(flow) => flow,
                Err(err) => {
                    tracing::debug!(error = %err, "Scope fault interrupted the chain");
                    // The dropped chain may have stopped inside a mounted router.
                    ex.leave_mount(mount_base);
                    ex.bind_scope(Some(scope.clone()));
                    self.guarded(ex, Some(err)).await
                }
            };

            if !scope.close() {
                if let Ok(late) = faults.try_recv() {
                    flow = match flow {
                        Flow::Fault(mut current) => {
                            tracing::warn!(
                                kept = %current,
                                dropped = %late,
                                "Request already failed; dropping later fault"
                            );
                            if late.is_bailout() {
                                current.mark_bailout();
                            }
                            Flow::Fault(current)
                        }
                        Flow::Halt => {
                            // The response is already written.
                            tracing::warn!(
                                error = %late,
                                bailout = late.is_bailout(),
                                "Fault arrived after the response was produced; dropping it"
                            );
                            Flow::Halt
                        }
                        Flow::Continue => self.guarded(ex, Some(late)).await,
                    };
                }
            }

            if matches!(flow, Flow::Fault(_)) {
                scope.mark_faulted();
            }
            ex.bind_scope(outer);
            flow
        }
        .boxed()
    }

    /// Run the layers, turning an escaped panic into a fault.
    async fn guarded(&self, ex: &mut Exchange, pending: Option<HandlerError>) -> Flow {
        match AssertUnwindSafe(self.run_layers(ex, pending))
            .catch_unwind()
            .await
        {
            Ok(flow) => flow,
            Err(panic) => Flow::Fault(HandlerError::from_panic(panic).classify(self.trusted, "router")),
        }
    }

    async fn run_layers(&self, ex: &mut Exchange, mut pending: Option<HandlerError>) -> Flow {
        for layer in &self.layers {
            let Some(found) = layer.matcher.matches(ex.method(), ex.route_path()) else {
                continue;
            };

            let flow = match &layer.target {
                Target::Handler(adapted) => {
                    if adapted.handles_errors() != pending.is_some() {
                        continue;
                    }
                    ex.set_params(found.params);
                    adapted.invoke(ex, pending.take()).await
                }
                Target::Mount(router) => {
                    ex.set_params(found.params);
                    let previous = ex.enter_mount(found.matched_len);
                    let flow = router.handle(ex, pending.take()).await;
                    ex.leave_mount(previous);
                    flow
                }
            };

            match flow {
                Flow::Continue => {}
                Flow::Fault(err) => pending = Some(err),
                Flow::Halt => return Flow::Halt,
            }
        }

        match pending {
            Some(err) => Flow::Fault(err),
            None => Flow::Continue,
        }
    }

    /// Serve this router as the whole of an axum app.
    ///
    /// Bailout faults are reported to `shutdown` when one is given.
    pub fn into_axum(self, config: RouterConfig, shutdown: Option<Shutdown>) -> axum::Router {
        let state = Dispatch {
            router: Arc::new(self),
            config: Arc::new(config),
            shutdown,
        };
        axum::Router::new().fallback(serve).with_state(state)
    }
}

/// Per-method registration for one path.
pub struct Route<'r> {
    router: &'r mut FaultRouter,
    path: String,
}

impl<'r> Route<'r> {
    pub fn get(self, handler: Handler) -> Self {
        self.on(Method::GET, handler)
    }

    pub fn head(self, handler: Handler) -> Self {
        self.on(Method::HEAD, handler)
    }

    pub fn post(self, handler: Handler) -> Self {
        self.on(Method::POST, handler)
    }

    pub fn put(self, handler: Handler) -> Self {
        self.on(Method::PUT, handler)
    }

    pub fn patch(self, handler: Handler) -> Self {
        self.on(Method::PATCH, handler)
    }

    pub fn delete(self, handler: Handler) -> Self {
        self.on(Method::DELETE, handler)
    }

    pub fn options(self, handler: Handler) -> Self {
        self.on(Method::OPTIONS, handler)
    }

    /// Any method on exactly this path.
    pub fn all(self, handler: Handler) -> Self {
        let label = format!("ALL {}", self.path);
        self.router
            .push_handler(Box::new(PathPattern::exact(&self.path)), label, handler);
        self
    }

    /// Middleware on exactly this path; same as [`Route::all`].
    pub fn use_handler(self, handler: Handler) -> Self {
        self.all(handler)
    }

    fn on(self, method: Method, handler: Handler) -> Self {
        let label = format!("{} {}", method, self.path);
        let matcher = AndMatcher::new(vec![
            Box::new(MethodMatcher::new(method)),
            Box::new(PathPattern::exact(&self.path)),
        ]);
        self.router.push_handler(Box::new(matcher), label, handler);
        self
    }
}

#[derive(Clone)]
struct Dispatch {
    router: Arc<FaultRouter>,
    config: Arc<RouterConfig>,
    shutdown: Option<Shutdown>,
}

async fn serve(State(state): State<Dispatch>, req: Request<Body>) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();

    let mut ex = match request::read_exchange(req, state.config.max_body_bytes).await {
        Ok(ex) => ex,
        Err(rejection) => {
            let response = rejection.into_response();
            metrics::record_request(&method, response.status().as_u16(), start);
            return response;
        }
    };

    let span = request_span(ex.request_id(), ex.method(), ex.path());
    let flow = state.router.dispatch(&mut ex).instrument(span.clone()).await;
    let response = span.in_scope(|| {
        response::finalize(ex, flow, &state.config, state.shutdown.as_ref())
    });

    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};
    use std::sync::Mutex;

    fn exchange(method: Method, path: &str) -> Exchange {
        Exchange::new(method, path.parse().unwrap(), HeaderMap::new(), Bytes::new(), "req-1")
    }

    fn trace(log: &Arc<Mutex<Vec<String>>>, entry: &str) -> Handler {
        let log = log.clone();
        let entry = entry.to_string();
        Handler::callback(move |_ex, next| {
            log.lock().unwrap().push(entry.clone());
            next.proceed();
        })
    }

    #[tokio::test]
    async fn test_layers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut router = FaultRouter::build(false);
        router
            .use_handler(trace(&log, "all"))
            .use_at("/usage", trace(&log, "usage"))
            .use_at("/other", trace(&log, "other"));
        router
            .route("/usage/:id")
            .post(trace(&log, "post"))
            .get(trace(&log, "get"));

        let mut ex = exchange(Method::GET, "/usage/7");
        assert!(matches!(router.dispatch(&mut ex).await, Flow::Continue));
        assert_eq!(*log.lock().unwrap(), vec!["all", "usage", "get"]);
        assert_eq!(ex.param("id"), Some("7"));
    }

    #[tokio::test]
    async fn test_error_skips_normal_handlers_until_recovered() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut router = FaultRouter::build(true);
        router
            .use_handler(Handler::callback(|_ex, next| next.fail("broken")))
            .use_handler(trace(&log, "skipped"))
            .use_handler(Handler::on_error(|_err, _ex, next| next.proceed()))
            .use_handler(trace(&log, "after recovery"));

        let mut ex = exchange(Method::GET, "/");
        assert!(matches!(router.dispatch(&mut ex).await, Flow::Continue));
        assert_eq!(*log.lock().unwrap(), vec!["after recovery"]);
    }

    #[tokio::test]
    async fn test_scope_fault_reaches_error_handler() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let mut router = FaultRouter::build(false);
        router
            .use_handler(Handler::callback(|ex, next| {
                let scope = ex.scope().cloned().unwrap();
                scope.spawn(async { Err(HandlerError::new("background write failed")) });
                // Keep the chain waiting; the scope fault preempts it.
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                    next.proceed();
                });
            }))
            .use_handler(Handler::on_error(move |err, ex, _next| {
                *sink.lock().unwrap() = Some(err.is_bailout());
                ex.respond(StatusCode::SERVICE_UNAVAILABLE, "degraded");
            }));

        let mut ex = exchange(Method::GET, "/");
        assert!(matches!(router.dispatch(&mut ex).await, Flow::Halt));
        assert_eq!(*seen.lock().unwrap(), Some(true));
        assert!(ex.scope().is_none());
    }

    #[tokio::test]
    async fn test_mount_keeps_inner_trust_and_strips_prefix() {
        let mut inner = FaultRouter::build(false);
        inner.route("/usage").get(Handler::callback(|ex, next| {
            next.fail(format!("untrusted bug at {}", ex.route_path()));
        }));

        let mut outer = FaultRouter::build(true);
        outer.mount("/v1", inner);

        let mut ex = exchange(Method::GET, "/v1/usage");
        match outer.dispatch(&mut ex).await {
            Flow::Fault(err) => {
                assert_eq!(err.message(), "untrusted bug at /usage");
                assert!(err.is_bailout());
            }
            other => panic!("expected fault, got {:?}", other),
        }
        assert_eq!(ex.route_path(), "/v1/usage");
    }

    #[tokio::test]
    async fn test_fault_after_response_keeps_response() {
        let handled = Arc::new(Mutex::new(false));
        let flag = handled.clone();
        let mut router = FaultRouter::build(false);
        router
            .use_handler(Handler::callback(|ex, _next| {
                let scope = ex.scope().cloned().unwrap();
                ex.respond(StatusCode::OK, "recorded");
                assert!(scope.deliver(HandlerError::new("audit write failed")));
            }))
            .use_handler(Handler::on_error(move |_err, ex, _next| {
                *flag.lock().unwrap() = true;
                ex.respond(StatusCode::INTERNAL_SERVER_ERROR, "overwritten");
            }));

        let mut ex = exchange(Method::POST, "/usage");
        assert!(matches!(router.dispatch(&mut ex).await, Flow::Halt));
        assert!(!*handled.lock().unwrap());
        assert_eq!(ex.response().status(), Some(StatusCode::OK));
        assert_eq!(ex.response().body().unwrap(), &Bytes::from_static(b"recorded"));
    }

    #[tokio::test]
    async fn test_late_fault_on_passthrough_runs_error_handlers() {
        let mut router = FaultRouter::build(true);
        router
            .use_handler(Handler::callback(|ex, next| {
                let scope = ex.scope().cloned().unwrap();
                assert!(scope.deliver(HandlerError::new("late")));
                next.proceed();
            }))
            .use_handler(Handler::on_error(|err, ex, _next| {
                ex.respond(StatusCode::SERVICE_UNAVAILABLE, err.message().to_string());
            }));

        let mut ex = exchange(Method::GET, "/");
        assert!(matches!(router.dispatch(&mut ex).await, Flow::Halt));
        assert_eq!(ex.response().status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(ex.response().body().unwrap(), &Bytes::from_static(b"late"));
    }

    #[tokio::test]
    async fn test_scope_phase_after_request() {
        let captured = Arc::new(Mutex::new(None));
        let slot = captured.clone();
        let mut router = FaultRouter::build(true);
        router.use_handler(Handler::callback(move |ex, next| {
            *slot.lock().unwrap() = ex.scope().cloned();
            next.proceed();
        }));

        let mut ex = exchange(Method::GET, "/");
        router.dispatch(&mut ex).await;
        let scope = captured.lock().unwrap().take().unwrap();
        assert_eq!(scope.phase(), crate::routing::ScopePhase::Completed);
        assert!(scope.is_trusted());
    }
}
