//! WebSocket upgrade handler.

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{WebSocket, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, header},
    response::Response,
};
use log::{info, warn};
use serde::Deserialize;

use crate::api::{ApiError, WsState};

use super::adapter::WebSocketAdapter;
use super::config::WebSocketConfig;
use super::hub::HubHandle;
use super::session::SessionPumps;

/// Query parameters accepted by `GET /ws`.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Client-chosen label. Not required to be unique.
    #[serde(default)]
    pub id: String,
}

/// WebSocket upgrade handler.
///
/// GET /ws
pub async fn ws_handler(
    State(state): State<WsState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !state.config.origin_allowed(origin) {
        warn!("Rejecting WebSocket from origin {:?}", origin);
        return Err(ApiError::forbidden("Origin not allowed"));
    }

    let upgrade = upgrade.map_err(|rejection| {
        warn!("WebSocket upgrade rejected: {}", rejection);
        ApiError::UpgradeFailed
    })?;

    info!("WebSocket upgrade request (id={:?})", query.id);

    let hub = state.hub.clone();
    let config = state.config.clone();
    let label = query.id;

    Ok(upgrade
        .read_buffer_size(config.read_buffer_size)
        .write_buffer_size(config.write_buffer_size)
        .on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| async move {
            start_session(socket, hub, label, &config);
        }))
}

/// Register a freshly upgraded socket with the hub and start its pumps.
///
/// Returns as soon as both pumps are spawned.
pub fn start_session(socket: WebSocket, hub: HubHandle, label: String, config: &WebSocketConfig) {
    let (reader, writer) = WebSocketAdapter::new(socket).split();
    let (session, mailbox) = hub.open_session(label.clone(), config.mailbox_capacity);
    let id = session.id();
    hub.register(session);

    SessionPumps {
        id,
        label,
        reader,
        writer,
        mailbox,
        hub,
        ping_interval: config.ping_interval(),
        inbound: config.inbound,
    }
    .spawn();
}
