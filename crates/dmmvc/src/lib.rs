//! DMMVC server library.
//!
//! Provides the HTTP API, configuration, and the WebSocket broadcast hub.

pub mod api;
pub mod config;
pub mod ws;
