//! Test utilities and common setup.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use dmmvc::api::{self, AppState};
use dmmvc::config::{AppConfig, CorsConfig, FeaturesConfig};
use dmmvc::ws::{HubHandle, WebSocketConfig};
use tokio::net::TcpListener;

/// Create a test application with the WebSocket hub disabled.
pub fn test_app() -> Router {
    let state = AppState::new(FeaturesConfig::default(), CorsConfig::default());
    api::create_router(state)
}

/// Create a test application with a running hub. Must be called inside a
/// tokio runtime.
pub fn test_app_with_hub(websocket: WebSocketConfig) -> (Router, HubHandle) {
    let mut config = AppConfig::default();
    config.features.websocket = true;
    config.websocket = websocket;

    let state = AppState::from_config(&config);
    let hub = state.hub().cloned().expect("hub should be running");
    (api::create_router(state), hub)
}

/// Serve the application on an ephemeral local port.
pub async fn spawn_server(websocket: WebSocketConfig) -> (SocketAddr, HubHandle) {
    let (app, hub) = test_app_with_hub(websocket);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, hub)
}

/// Poll the hub until it reports `expected` connected clients.
pub async fn wait_for_clients(hub: &HubHandle, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            hub.flush().await.unwrap();
            if hub.client_count().await == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("hub never reached {expected} clients"));
}
