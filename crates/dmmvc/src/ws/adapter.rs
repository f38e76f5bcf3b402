//! Connection adapter: frame-level read/write over one duplex socket.
//!
//! The pumps in [`super::session`] only see [`FrameReader`] and
//! [`FrameWriter`], so they can run against an axum [`WebSocket`] in
//! production and an in-memory channel pair in tests.

use async_trait::async_trait;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;

/// A single frame on the wire.
///
/// Text and binary frames are both surfaced as [`Frame::Data`]; payloads are
/// opaque bytes to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed")]
    Closed,
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Read the next frame. `None` means the peer went away without a close frame.
    async fn read_frame(&mut self) -> Option<Result<Frame, AdapterError>>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), AdapterError>;

    /// Flush and close the underlying stream. Safe to call after a failed write.
    async fn close(&mut self) -> Result<(), AdapterError>;
}

/// Adapter over an upgraded axum WebSocket.
pub struct WebSocketAdapter {
    socket: WebSocket,
}

impl WebSocketAdapter {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }

    /// Split into independently owned halves, one per pump.
    pub fn split(self) -> (WsFrameReader, WsFrameWriter) {
        let (sink, stream) = self.socket.split();
        (WsFrameReader { stream }, WsFrameWriter { sink })
    }
}

pub struct WsFrameReader {
    stream: SplitStream<WebSocket>,
}

pub struct WsFrameWriter {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameReader for WsFrameReader {
    async fn read_frame(&mut self) -> Option<Result<Frame, AdapterError>> {
        let message = match self.stream.next().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(AdapterError::Transport(e.to_string()))),
        };

        let frame = match message {
            Message::Text(text) => Frame::Data(Bytes::from(text)),
            Message::Binary(data) => Frame::Data(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(_) => Frame::Close,
        };
        Some(Ok(frame))
    }
}

#[async_trait]
impl FrameWriter for WsFrameWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), AdapterError> {
        self.sink
            .send(to_message(frame))
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        self.sink
            .close()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))
    }
}

/// Payloads that are valid UTF-8 go out as text frames so browser clients
/// receive strings; everything else goes out as binary.
fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Data(data) => match Utf8Bytes::try_from(data.clone()) {
            Ok(text) => Message::Text(text),
            Err(_) => Message::Binary(data),
        },
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close => Message::Close(None),
    }
}
