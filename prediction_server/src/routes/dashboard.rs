use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use std::sync::Arc;

use crate::engine;
use crate::error::ApiError;
use crate::misc::{MetricsResponse, TimeframeQuery};
use crate::state::AppState;

const DASHBOARD_HTML: &str = include_str!("../../assets/dashboard.html");
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/metrics/{symbol}", get(symbol_metrics))
        .route("/metrics", get(prometheus))
}

/// GET /dashboard. The page itself is public; it forwards `?api_key=` to
/// the API under the configured header name.
pub async fn dashboard(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(render_dashboard(&state.config.server.api_key_header))
}

fn render_dashboard(api_key_header: &str) -> String {
    let literal = serde_json::Value::from(api_key_header)
        .to_string()
        .replace('<', "\\u003c");
    DASHBOARD_HTML.replace("__API_KEY_HEADER__", &literal)
}

///  GET /api/metrics/{symbol}?timeframe=1d
async fn symbol_metrics(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<TimeframeQuery>,
) -> Result<Json<MetricsResponse>, ApiError> {
    engine::symbol_metrics(&state, &symbol, &query.timeframe).map(Json)
}

///  GET /metrics in the Prometheus text format
async fn prometheus(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    if !state.config.monitoring.enable_prometheus {
        return Err(ApiError::NotFound("Prometheus export is disabled".to_string()));
    }
    state.monitoring.update_memory_usage();
    Ok((
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.monitoring.render_prometheus(),
    ))
}
