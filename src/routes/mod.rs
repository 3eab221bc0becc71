//! API Routes
//!
//! - `/healthz`, `/readyz` - liveness and readiness
//! - `/jobs` - submit a job
//! - `/jobs/{id}` - fetch a job result

pub mod health;
pub mod jobs;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    Router::new()
        .merge(health::router())
        .merge(jobs::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
