//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::{AppConfig, CorsConfig, FeaturesConfig};
use crate::ws::{Hub, HubHandle, WebSocketConfig};

/// State for the WebSocket routes. Only exists when the feature is enabled.
#[derive(Clone)]
pub struct WsState {
    /// Handle to the running hub.
    pub hub: HubHandle,
    /// Socket and mailbox settings applied to every new session.
    pub config: Arc<WebSocketConfig>,
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Enabled subsystems.
    pub features: Arc<FeaturesConfig>,
    /// Cross-origin settings for the HTTP API.
    pub cors: Arc<CorsConfig>,
    /// WebSocket hub, when `features.websocket` is on.
    pub ws: Option<WsState>,
}

impl AppState {
    /// Create new application state without a WebSocket hub.
    pub fn new(features: FeaturesConfig, cors: CorsConfig) -> Self {
        Self {
            features: Arc::new(features),
            cors: Arc::new(cors),
            ws: None,
        }
    }

    /// Attach a running hub.
    pub fn with_hub(mut self, hub: HubHandle, config: WebSocketConfig) -> Self {
        self.ws = Some(WsState {
            hub,
            config: Arc::new(config),
        });
        self
    }

    /// Build state from configuration, spawning the hub if WebSocket
    /// support is enabled. Must be called inside a tokio runtime.
    pub fn from_config(config: &AppConfig) -> Self {
        let state = Self::new(config.features.clone(), config.cors.clone());
        if config.features.websocket {
            state.with_hub(Hub::spawn(), config.websocket.clone())
        } else {
            state
        }
    }

    pub fn hub(&self) -> Option<&HubHandle> {
        self.ws.as_ref().map(|ws| &ws.hub)
    }
}
