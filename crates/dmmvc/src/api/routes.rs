//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::CorsConfig;
use crate::ws::ws_handler;

use super::handlers;
use super::state::AppState;

/// Create the application router.
///
/// The WebSocket routes are only mounted when the hub is present.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let cors = build_cors_layer(&state.cors);
    let ws_state = state.ws.clone();

    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/features", get(handlers::features))
        .fallback(handlers::not_found)
        .with_state(state);

    if let Some(ws_state) = ws_state {
        let ws_routes = Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/ws/stats", get(handlers::ws_stats))
            .route("/api/ws/broadcast", post(handlers::ws_broadcast))
            .with_state(ws_state);
        router = router.merge(ws_routes);
    }

    if let Some(cors) = cors {
        router = router.layer(cors);
    }
    router.layer(trace_layer)
}

/// Build the CORS layer from configuration. No configured origins means no
/// cross-origin access.
fn build_cors_layer(config: &CorsConfig) -> Option<CorsLayer> {
    if config.allowed_origins.is_empty() {
        return None;
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("CORS: Invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    if origins.is_empty() {
        tracing::error!("CORS: All configured origins are invalid!");
        return None;
    }

    tracing::info!("CORS: Allowing {} origin(s)", origins.len());
    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
            .allow_credentials(true),
    )
}
