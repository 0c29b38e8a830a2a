use axum::{routing::get, routing::post, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use spyglass::config::CoreConfig;
use spyglass::store::kv::Kv;
use spyglass::{handlers, retention, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("spyglass=debug,tower_http=info")),
        )
        .init();

    let config_path =
        std::env::var("SPYGLASS_CONFIG").unwrap_or_else(|_| "./spyglass.toml".to_string());
    let mut config = CoreConfig::load(&config_path)?;
    if let Ok(port) = std::env::var("SPYGLASS_PORT") {
        if let Ok(port) = port.parse() {
            config.listen_port = port;
        }
    }
    let port = config.listen_port;

    let state = AppState::new(config);

    // Background engines: expiry sweep inside the engine, TTL invariant
    // supervisor on top of it.
    Kv::spawn_sweeper(state.kv.clone(), Duration::from_secs(30));
    retention::spawn_ttl_supervisor(
        state.kv.clone(),
        state.store.clone(),
        state.config.clone(),
    );

    let app = Router::new()
        // OTLP/HTTP ingest
        .route("/v1/traces", post(handlers::ingest::post_traces))
        .route("/v1/logs", post(handlers::ingest::post_logs))
        .route("/v1/metrics", post(handlers::ingest::post_metrics))
        // Trace endpoints
        .route("/api/v1/traces", get(handlers::traces::list_traces))
        .route("/api/v1/traces/{trace_id}", get(handlers::traces::get_trace))
        .route(
            "/api/v1/traces/{trace_id}/lint",
            get(handlers::flows::lint_one_trace),
        )
        // Span and log exploration
        .route("/api/v1/spans", get(handlers::spans::list_spans))
        .route("/api/v1/logs", get(handlers::logs::list_logs))
        // Metrics
        .route("/api/v1/metrics", get(handlers::metrics::list_metrics))
        // Service map and catalog
        .route("/api/v1/services/map", get(handlers::services::service_map))
        .route(
            "/api/v1/services/catalog",
            get(handlers::services::service_catalog),
        )
        // Trace flows
        .route("/api/v1/flows", get(handlers::flows::list_flows))
        .route("/api/v1/flows/{flow_hash}", get(handlers::flows::get_flow))
        // Admin
        .route("/api/v1/stats", get(handlers::stats::get_stats))
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("spyglass listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
