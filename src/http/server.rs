//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Host the trusted internal router (`/health`, `/version`)
//! - Mount the application router behind it with its own (untrusted) scope
//! - Wire up middleware (request ID, tracing)
//! - Serve until shutdown, draining in-flight requests

use axum::http::{HeaderName, StatusCode};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::http::request::X_REQUEST_ID;
use crate::lifecycle::{Shutdown, ShutdownReason};
use crate::routing::{FaultRouter, Handler};

/// HTTP server for one pipeline service.
pub struct HttpServer {
    router: Router,
    config: ServiceConfig,
    shutdown: Shutdown,
}

impl HttpServer {
    /// Create a server hosting `app` under the given configuration.
    pub fn new(config: ServiceConfig, app: FaultRouter, shutdown: Shutdown) -> Self {
        let router = Self::build_router(&config, app, &shutdown);
        Self {
            router,
            config,
            shutdown,
        }
    }

    /// The trusted framework router with `app` mounted at the root.
    pub fn compose(app: FaultRouter) -> FaultRouter {
        let mut internal = FaultRouter::build(true);
        internal.route("/health").get(Handler::callback(|ex, _next| {
            if let Err(err) = ex.respond_json(StatusCode::OK, &serde_json::json!({ "status": "ok" })) {
                tracing::error!(error = %err, "Failed to write health response");
            }
        }));
        internal.route("/version").get(Handler::callback(|ex, _next| {
            let body = serde_json::json!({
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            });
            if let Err(err) = ex.respond_json(StatusCode::OK, &body) {
                tracing::error!(error = %err, "Failed to write version response");
            }
        }));
        internal.mount("/", app);
        internal
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ServiceConfig, app: FaultRouter, shutdown: &Shutdown) -> Router {
        let request_id = HeaderName::from_static(X_REQUEST_ID);
        Self::compose(app)
            .into_axum(config.router.clone(), Some(shutdown.clone()))
            .layer(PropagateRequestIdLayer::new(request_id.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
    }

    /// The assembled axum app, for in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Returns why it stopped.
    pub async fn run(self, listener: TcpListener) -> Result<ShutdownReason, std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let reason = shutdown.wait().await;
                tracing::info!(reason = ?reason, "Draining in-flight requests");
            })
            .await?;

        let reason = self.shutdown.reason().unwrap_or(ShutdownReason::Signal);
        tracing::info!(reason = ?reason, "HTTP server stopped");
        Ok(reason)
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}
