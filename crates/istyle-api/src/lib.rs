//! # istyle-api: HTTP service for the InfinitiStyle marketplace
//!
//! Axum routes over [`istyle_market::Marketplace`]:
//!
//! - **Listings** (`/v1/listings`): publish, edit, filter.
//! - **Transactions** (`/v1/transactions`): initiate, upload payment proof,
//!   confirm payment, ship, confirm delivery, cancel.
//! - **Ratings**: one rating per delivered transaction, per-user summaries.
//!
//! ## Middleware Stack
//!
//! `TraceLayer` → metrics → bearer auth → handler. Health probes,
//! `/metrics` and `/openapi.json` are served without credentials.
//!
//! ## Persistence
//!
//! In-memory by default. With `DATABASE_URL` set, every change is written
//! to Postgres first and committed in memory only once the database has
//! accepted it; the stores hydrate from Postgres on startup.

pub mod auth;
pub mod db;
pub mod error;
pub mod events;
pub mod extractors;
pub mod locks;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::middleware::from_fn;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig::from_secret(state.config.auth_secret.as_deref());

    // Authenticated API routes.
    let api = Router::new()
        .merge(routes::listings::router())
        .merge(routes::transactions::router())
        .merge(routes::ratings::router())
        .layer(from_fn(auth::auth_middleware))
        .layer(axum::Extension(auth_config));

    // Unauthenticated operational routes.
    let ops = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/metrics", get(middleware::metrics::metrics_handler))
        .merge(openapi::router());

    Router::new()
        .merge(ops)
        .merge(api)
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe: 200 while the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe.
async fn readiness() -> &'static str {
    "ready"
}
