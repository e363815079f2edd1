use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use vidgen_core::stage::ResourceClass;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Pipeline runs currently in flight.
    pub active_runs: usize,
    /// Free GPU slots.
    pub gpu_slots_available: usize,
}

/// GET /health -- returns service and scheduler health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_runs: state.engine.active_runs(),
        gpu_slots_available: state.engine.pools().available(ResourceClass::Gpu),
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
