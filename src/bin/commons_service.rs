//! Commons demo service binary.
//!
//! Runs the shared components behind a small REST API:
//! - Structured JSON logging
//! - Correlation ids on every recorded call
//! - Graceful shutdown handling
//!
//! ## Configuration
//!
//! Environment variables:
//! - `COMMONS_TOKEN_SECRET`: base64 token signing secret (required in production)
//! - `COMMONS_TOKEN_TTL_SECS`: token lifetime (default: 604800)
//! - `REDIS_URL`: Redis connection URL (default: redis://127.0.0.1:6379/0)
//! - `REDIS_TIMEOUT_MS`: Redis connect/response timeout (default: 2000)
//! - `COMMONS_SLOW_CALL_MS`: slow-call threshold (default: 1000)
//! - `PORT`: Service port (default: 8080)
//! - `HOST`: Service host (default: 0.0.0.0)
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! REDIS_URL=redis://... COMMONS_TOKEN_SECRET=... cargo run --bin commons_service --features service
//! ```

use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use service_commons::service::{create_router, ServiceState};
use service_commons::{CommonsConfig, RedisStore};

const DEFAULT_FILTER: &str = "commons_service=info,service_commons=info,tower_http=warn";

/// Install the global subscriber.
///
/// `LOG_FORMAT=pretty` selects human-readable output; anything else is one
/// JSON object per event with the `request` span fields flattened in, so each
/// call record carries its request id.
fn init_tracing() {
    let pretty = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "pretty");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (json, text) = if pretty {
        (None, Some(fmt::layer().with_target(false)))
    } else {
        let json = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true);
        (Some(json), None)
    };

    tracing_subscriber::registry().with(filter).with(json).with(text).init();
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let version = env!("CARGO_PKG_VERSION");
    let build_sha = option_env!("BUILD_SHA").unwrap_or("dev");

    info!(version = version, build_sha = build_sha, "Starting Commons Service");

    let config = CommonsConfig::from_env()?;

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

    // Startup requires Redis; later outages are absorbed by the cache client.
    let connect_start = Instant::now();
    let store = RedisStore::connect(&config.redis).await.map_err(|e| {
        tracing::error!(error = %e, url = %config.redis.redacted_url(), "Failed to connect to Redis");
        e
    })?;
    let healthy = store.is_healthy().await;
    info!(
        latency_ms = connect_start.elapsed().as_millis() as u64,
        healthy = healthy,
        "Redis connection established"
    );

    let state = ServiceState::from_config(&config, store)?;
    info!(
        token_ttl_secs = config.token.ttl.as_secs(),
        slow_call_ms = config.recorder.slow_threshold.as_millis() as u64,
        "Service state initialized"
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!(address = %addr, version = version, "Commons Service listening");

    let listener = TcpListener::bind(addr).await?;

    info!("Ready to accept connections");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Commons Service shutdown complete");

    Ok(())
}
