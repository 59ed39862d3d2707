//! Control API (spec §4.11): the read-only HTTP surface over the
//! scheduler's status/progress documents, a live single-ticket lookup, and
//! the read-only runbook views. `shipper` ships no HTTP server; this
//! crate adopts `axum`+`tower-http`, the ecosystem's standard choice for
//! this shape of read-mostly JSON API (see `DESIGN.md`). Route shapes and
//! runbook semantics are grounded on
//! `original_source/MVP1/snapshot/snapshot_api_server.py`.

mod routes;
mod runbooks;
mod state;

use std::time::Duration;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

pub use state::AppState;

/// Build the full route table. `tower_http::cors::CorsLayer` answers
/// `OPTIONS` preflight automatically for every configured route, matching
/// spec §4.11's "`OPTIONS` pre-flight returns 200 with matching headers".
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::PUT, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::AUTHORIZATION])
        .max_age(Duration::from_secs(86_400));

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/datadog/health", get(routes::datadog_health))
        .route("/api/snapshot/status", get(routes::snapshot_status))
        .route("/api/snapshot/trigger", post(routes::trigger_snapshot))
        .route("/api/snapshot/progress", get(routes::snapshot_progress))
        .route("/api/ticket/:key", get(routes::get_ticket))
        .route("/api/runbooks/scope", post(runbooks::scope))
        .route("/api/runbooks/drift", post(runbooks::drift))
        .route("/api/runbooks/release-diff", post(runbooks::release_diff))
        .route("/api/runbooks/readiness", post(runbooks::readiness))
        .route("/api/runbooks/latest-branches", post(runbooks::latest_branches))
        .layer(cors)
        .with_state(state)
}
