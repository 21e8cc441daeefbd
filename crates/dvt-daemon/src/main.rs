//! dvt-daemon entry point.
//!
//! Sets up tracing, loads config, wires the adapters and shared state, and
//! starts the HTTP server. Route handlers live in `routes.rs`; shared state
//! lives in `state.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use dvt_config::{load_monitor_config, resolve_secrets, MonitorConfig};
use dvt_daemon::{routes, state};
use dvt_engine::{EngineContext, SystemClock};
use dvt_sources::{SharedResources, SourceSet};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = load_config()?;
    let secrets = resolve_secrets(&cfg);
    let resources = SharedResources::from_settings(&cfg.sources, &secrets);
    let sources = SourceSet::from_settings(&cfg.sources, &resources);
    info!(sources = ?sources.describe(), "data sources configured");

    let shared = Arc::new(state::AppState::new(EngineContext {
        sources,
        settings: cfg.engine.clone(),
        clock: Arc::new(SystemClock),
    }));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors(&cfg.daemon.cors_origins));

    let addr = bind_addr_from_env()
        .or_else(|| cfg.daemon.bind_addr.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("dvt-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    shared.sessions.shutdown();
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// `DVT_CONFIG` holds comma-separated YAML paths in merge order. Unset means
/// built-in defaults.
fn load_config() -> anyhow::Result<MonitorConfig> {
    let Ok(raw) = std::env::var("DVT_CONFIG") else {
        warn!("DVT_CONFIG not set; using built-in defaults");
        return Ok(MonitorConfig::default());
    };
    let paths: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let (loaded, cfg) = load_monitor_config(&paths).context("load DVT_CONFIG")?;
    info!(config_hash = %loaded.config_hash, "config loaded");
    Ok(cfg)
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("DVT_DAEMON_ADDR").ok()?.parse().ok()
}

fn cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
