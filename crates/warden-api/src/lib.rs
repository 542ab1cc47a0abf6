//! Read-only HTTP views of the controller's state.
//!
//! Everything here serves JSON snapshots of component state; the only write
//! paths are the operational "trigger reconciliation" and "rollback" calls.
//! The web dashboard is a pure consumer of these endpoints and lives out of
//! tree.

mod errors;
mod handlers;
mod state;

pub use errors::ApiError;
pub use state::{AppState, SharedStatus, StatusSnapshot};

use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use warden_config::ApiConfig;

/// Build the service router.
pub fn router(state: AppState, config: &ApiConfig) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        .route("/api/v1/status", get(handlers::status))
        .route("/api/v1/tenants", get(handlers::tenants))
        .route("/api/v1/tenants/:tenant", get(handlers::tenant_detail))
        .route("/api/v1/audit", get(handlers::audit))
        .route("/api/v1/architecture", get(handlers::architecture))
        .route("/api/v1/scan", get(handlers::scan))
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/reconcile", post(handlers::trigger_reconcile))
        .route("/api/v1/rollback", post(handlers::rollback))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )));

    if config.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }
    router.with_state(state)
}
