//! Usage collector service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ HttpServer ──▶ internal router (trusted: /health, /version)
//!                                   │
//!                                   └─▶ collector router (untrusted)
//!                                          │
//!                                          ▼
//!                                   UpstreamClient (retry → throttle)
//!                                          │
//!                                          ▼
//!                                   next pipeline stage
//! ```
//!
//! An untrusted handler fault without a status ends the process with exit
//! status 70 after draining, so the supervisor starts a fresh worker.

use std::path::PathBuf;

use axum::http::StatusCode;
use clap::Parser;
use tokio::net::TcpListener;

use usage_resilience::config::{load_config, validation::validate_config, ConfigError, ServiceConfig};
use usage_resilience::http::{HttpServer, UpstreamCall, UpstreamClient};
use usage_resilience::lifecycle::{signals, Shutdown};
use usage_resilience::observability::{logging, metrics};
use usage_resilience::routing::{FaultRouter, Handler, HandlerError};

#[derive(Parser)]
#[command(name = "usage-resilience")]
#[command(about = "Usage collector with throttled, retried upstream calls", long_about = None)]
struct Cli {
    /// TOML config file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address
    #[arg(long)]
    bind: Option<String>,
}

/// Routes of the collector stage.
fn collector_router(upstream: UpstreamClient) -> FaultRouter {
    let mut router = FaultRouter::build(false);

    let forward = upstream.clone();
    router.route("/usage").post(Handler::step(move |view| {
        let upstream = forward.clone();
        async move {
            let record: serde_json::Value = view.json()?;
            if !record.get("tenant").is_some_and(|t| t.is_string()) {
                return Err(HandlerError::with_status(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "usage record needs a string `tenant`",
                ));
            }
            let call = UpstreamCall::post("/usage", record).with_request_id(view.request_id());
            Ok::<_, HandlerError>(Some(upstream.post_json(call).await?))
        }
    }));

    router.route("/usage/:tenant").get(Handler::step(move |view| {
        let upstream = upstream.clone();
        async move {
            let tenant = view.param("tenant").unwrap_or_default().to_string();
            let call = UpstreamCall::get(format!("/usage/{}", tenant)).with_request_id(view.request_id());
            Ok::<_, HandlerError>(Some(upstream.get_json(call).await?))
        }
    }));

    router
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "usage-resilience starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_concurrent = config.throttle.max_concurrent,
        retries = config.retries.retries,
        upstream = %config.upstream.base_url,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(shutdown.clone());

    let upstream = UpstreamClient::from_config(&config)?;
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config, collector_router(upstream), shutdown);
    let reason = server.run(listener).await?;

    let code = reason.exit_code();
    if code != 0 {
        tracing::error!(reason = ?reason, exit_code = code, "Exiting for worker replacement");
        std::process::exit(code);
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
