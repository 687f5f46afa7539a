use axum::Router;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use log::{error, info, warn};
use market_data::config::ServerConfig;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::error::ApiError;
use crate::routes;
use crate::state::AppState;

/// Builds the full application: API routes behind the API key check,
/// `/health` and the dashboard page open, CORS on everything.
pub fn router(state: Arc<AppState>) -> Router {
    let api = routes::api_router().route_layer(middleware::from_fn_with_state(
        Arc::clone(&state),
        require_api_key,
    ));

    Router::new()
        .merge(api)
        .route("/health", get(routes::health))
        .route("/dashboard", get(routes::dashboard::dashboard))
        .layer(cors_layer(&state.config.server))
        .with_state(state)
}

/// No-op when no API key is configured.
async fn require_api_key(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let server = &state.config.server;
    if server.api_key.is_empty() {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(server.api_key_header.as_str())
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if constant_time_eq(provided.as_bytes(), server.api_key.as_bytes()) {
        return next.run(request).await;
    }

    warn!("Rejected request to {} without a valid API key", request.uri().path());
    ApiError::Unauthorized.into_response()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    if server.allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    pub fn init(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Serves until Ctrl-C, then drains in-flight requests.
    pub async fn run(&self) -> std::io::Result<()> {
        let server = &self.state.config.server;
        let addr = format!("{}:{}", server.host, server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("HTTP server running on {addr} ({} environment)", server.env);

        axum::serve(listener, router(Arc::clone(&self.state)))
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal, initiating graceful shutdown"),
        Err(e) => {
            error!("Failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_compares_whole_input() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
        assert!(constant_time_eq(b"", b""));
    }
}
