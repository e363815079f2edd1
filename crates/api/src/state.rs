use std::sync::Arc;

use vidgen_worker::Engine;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Job-orchestration engine (registry, dispatcher, progress notifier).
    pub engine: Arc<Engine>,
}
