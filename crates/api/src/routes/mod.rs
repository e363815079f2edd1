pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                     submit
/// /jobs/{id}                snapshot
/// /jobs/{id}/cancel         cancel
/// /jobs/{id}/ws             live progress (WebSocket)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}
