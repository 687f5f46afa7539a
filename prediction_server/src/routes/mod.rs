pub mod dashboard;
pub mod models;

use axum::Json;
use axum::Router;
use axum::extract::State;
use chrono::Utc;
use std::sync::Arc;

use crate::misc::HealthResponse;
use crate::state::AppState;

/// Assemble the API router. `/health` is mounted separately so it stays
/// outside the API key check.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(models::routes())
        .merge(dashboard::routes())
}

///  GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        models_loaded: state.registry.loaded_count(),
        memory_usage: state.monitoring.update_memory_usage(),
    })
}
