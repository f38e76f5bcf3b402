//! WebSocket hub for broadcasting to connected clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  GET /ws?id=...   (handler::ws_handler)                          │
//! │  - origin check, protocol upgrade                                │
//! │  - builds a ClientSession + Mailbox, registers it, spawns pumps  │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ register / unregister / broadcast
//! ┌───────────────────────────────▼──────────────────────────────────┐
//! │  Hub (one task)                                                  │
//! │  - owns the session map; nothing else touches it                 │
//! │  - fans broadcasts out with try_send; full mailbox => shed       │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ mailbox (bounded mpsc)
//! ┌───────────────────────────────▼──────────────────────────────────┐
//! │  Session pumps (two tasks per connection)                        │
//! │  - outbound: mailbox -> socket, keep-alive pings                 │
//! │  - inbound: socket -> discard or relay, unregister on exit       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod adapter;
mod config;
mod handler;
mod hub;
mod session;

pub use adapter::{AdapterError, Frame, FrameReader, FrameWriter, WebSocketAdapter};
pub use self::config::{InboundPolicy, WebSocketConfig};
pub use handler::{WsQuery, start_session, ws_handler};
pub use hub::{ClientSession, Hub, HubError, HubHandle, HubStats, Mailbox, SessionId};
pub use session::{InboundExit, InboundPump, OutboundExit, OutboundPump, SessionPumps};
