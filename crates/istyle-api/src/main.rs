//! # istyle-api: binary entry point
//!
//! Starts the Axum HTTP server for the marketplace API.
//! Binds to `PORT` (default 8080).

use std::sync::Arc;

use istyle_api::state::{AppConfig, AppState};
use istyle_market::LocalProofStorage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = AppConfig::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {e}");
        e
    })?;
    tracing::info!(?config, "configuration loaded");
    let port = config.port;

    let proofs = LocalProofStorage::new(&config.upload_dir).map_err(|e| {
        tracing::error!(dir = %config.upload_dir.display(), "Upload directory unavailable: {e}");
        e
    })?;

    let mut state = AppState::with_config(config).with_proof_storage(Arc::new(proofs));

    match istyle_api::middleware::metrics::install_recorder() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => tracing::warn!("Prometheus recorder not installed: {e}. /metrics will return 503."),
    }

    // Optional database: absent means in-memory only.
    let db_pool = istyle_api::db::init_pool().await.map_err(|e| {
        tracing::error!("Database initialization failed: {e}");
        e
    })?;
    if let Some(pool) = db_pool {
        istyle_api::db::hydrate(&state, &pool).await.map_err(|e| {
            tracing::error!("Database hydration failed: {e}");
            e
        })?;
        state = state.with_db_pool(pool);
    }

    let app = istyle_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("InfinitiStyle API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Structured tracing; `ISTYLE_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("ISTYLE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
