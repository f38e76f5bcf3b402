//! HTTP handlers for the JSON API.

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::FeaturesConfig;
use crate::ws::HubStats;

use super::error::{ApiError, ApiResult};
use super::state::{AppState, WsState};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Feature flags exposed to the frontend.
#[derive(Debug, Serialize)]
pub struct FeaturesResponse {
    pub websocket: bool,
    pub redis: bool,
    pub swagger: bool,
    pub file_upload: bool,
    pub i18n: bool,
    pub queue: bool,
    pub email: bool,
}

impl From<&FeaturesConfig> for FeaturesResponse {
    fn from(features: &FeaturesConfig) -> Self {
        Self {
            websocket: features.websocket,
            redis: features.redis,
            swagger: features.swagger,
            file_upload: features.file_upload,
            i18n: features.i18n,
            queue: features.queue,
            email: features.email,
        }
    }
}

/// GET /api/features
pub async fn features(State(state): State<AppState>) -> Json<FeaturesResponse> {
    Json(FeaturesResponse::from(state.features.as_ref()))
}

/// GET /api/ws/stats
///
/// Waits for the hub to apply everything queued so far, so the numbers
/// reflect requests that completed before this one.
pub async fn ws_stats(State(state): State<WsState>) -> ApiResult<Json<HubStats>> {
    state.hub.flush().await?;
    Ok(Json(state.hub.stats().await))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub queued: bool,
    /// Connected clients when the message was queued.
    pub clients: usize,
}

/// POST /api/ws/broadcast
pub async fn ws_broadcast(
    State(state): State<WsState>,
    Json(request): Json<BroadcastRequest>,
) -> ApiResult<(StatusCode, Json<BroadcastResponse>)> {
    if request.message.is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }
    if !state.hub.is_running() {
        return Err(ApiError::service_unavailable("WebSocket hub is not running"));
    }

    let clients = state.hub.client_count().await;
    state.hub.broadcast(request.message);

    Ok((
        StatusCode::ACCEPTED,
        Json(BroadcastResponse {
            queued: true,
            clients,
        }),
    ))
}

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::not_found("no such route")
}
