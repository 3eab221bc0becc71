use axum::{extract::State, http::StatusCode, routing::get, Router};

use crate::models::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

/// Liveness: answers as long as the process is serving.
async fn healthz() -> &'static str {
    "ok"
}

/// Readiness: both clients were built at startup. Dependencies are not pinged.
async fn readyz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}
