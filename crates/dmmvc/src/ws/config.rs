//! WebSocket settings.

use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// What the inbound pump does with application frames from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundPolicy {
    /// Log at debug level and drop.
    #[default]
    Discard,
    /// Relay the payload to every connected client through the hub.
    Broadcast,
}

/// WebSocket configuration (`[websocket]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Read buffer size for the socket, in bytes.
    pub read_buffer_size: usize,
    /// Write buffer size for the socket, in bytes.
    pub write_buffer_size: usize,
    /// Per-session outbound queue capacity. A session whose queue is full
    /// when a broadcast arrives is disconnected.
    pub mailbox_capacity: usize,
    /// Interval between keep-alive pings.
    pub ping_interval_secs: u64,
    /// Origins allowed to open a socket. Empty accepts any origin.
    pub allowed_origins: Vec<String>,
    /// Handling of frames received from clients.
    pub inbound: InboundPolicy,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            write_buffer_size: 1024,
            mailbox_capacity: 256,
            ping_interval_secs: 30,
            allowed_origins: Vec::new(),
            inbound: InboundPolicy::Discard,
        }
    }
}

impl WebSocketConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mailbox_capacity == 0 {
            bail!("websocket.mailbox_capacity must be greater than zero");
        }
        if self.ping_interval_secs == 0 {
            bail!("websocket.ping_interval_secs must be greater than zero");
        }
        if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
            bail!("websocket buffer sizes must be greater than zero");
        }
        Ok(())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Check an `Origin` header value against the allow list.
    ///
    /// Requests without an `Origin` header (non-browser clients) are accepted.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        match origin {
            None => true,
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin)),
        }
    }
}
