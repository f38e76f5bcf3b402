//! HTTP API module.
//!
//! Health and feature endpoints plus the WebSocket routes.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::{BroadcastRequest, BroadcastResponse, FeaturesResponse, HealthResponse};
pub use routes::create_router;
pub use state::{AppState, WsState};
