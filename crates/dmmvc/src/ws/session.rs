//! Per-connection pumps.
//!
//! Each connected client runs two tasks:
//! - the outbound pump drains the session mailbox into the socket and sends
//!   keep-alive pings;
//! - the inbound pump reads frames from the socket until the peer goes away.
//!
//! Either pump ending tears the session down. The inbound pump asks the hub
//! to unregister the session; the hub closes the mailbox, and the outbound
//! pump answers that with a close frame.

use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, trace, warn};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::adapter::{Frame, FrameReader, FrameWriter};
use super::config::InboundPolicy;
use super::hub::{HubHandle, Mailbox, SessionId};

/// Everything a connected session needs to run its two pumps.
pub struct SessionPumps<R, W> {
    pub id: SessionId,
    pub label: String,
    pub reader: R,
    pub writer: W,
    pub mailbox: Mailbox,
    pub hub: HubHandle,
    pub ping_interval: Duration,
    pub inbound: InboundPolicy,
}

impl<R: FrameReader, W: FrameWriter> SessionPumps<R, W> {
    /// Start both pumps as independent tasks and return their handles.
    pub fn spawn(self) -> (JoinHandle<OutboundExit>, JoinHandle<InboundExit>) {
        let stop_reading = CancellationToken::new();

        let outbound = OutboundPump {
            id: self.id,
            writer: self.writer,
            mailbox: self.mailbox,
            hub: self.hub.clone(),
            ping_interval: self.ping_interval,
            stop_reading: stop_reading.clone(),
        };
        let inbound = InboundPump {
            id: self.id,
            label: self.label,
            reader: self.reader,
            hub: self.hub,
            policy: self.inbound,
            stop: stop_reading,
        };

        let write_task = tokio::spawn(outbound.run());
        let read_task = tokio::spawn(inbound.run());
        (write_task, read_task)
    }
}

/// Why the outbound pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundExit {
    /// The hub closed the mailbox; a close frame was sent.
    MailboxClosed,
    /// Writing to the socket failed.
    WriteFailed,
}

/// Why the inbound pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundExit {
    /// The peer sent a close frame.
    CloseFrame,
    /// The stream ended without a close frame.
    EndOfStream,
    /// Reading from the socket failed.
    ReadFailed,
    /// The outbound side already tore the connection down.
    Cancelled,
}

pub struct OutboundPump<W> {
    pub id: SessionId,
    pub writer: W,
    pub mailbox: Mailbox,
    pub hub: HubHandle,
    pub ping_interval: Duration,
    pub stop_reading: CancellationToken,
}

impl<W: FrameWriter> OutboundPump<W> {
    pub async fn run(mut self) -> OutboundExit {
        let mut ping = tokio::time::interval_at(
            Instant::now() + self.ping_interval,
            self.ping_interval,
        );
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                message = self.mailbox.recv() => match message {
                    Some(payload) => {
                        if let Err(e) = self.writer.write_frame(Frame::Data(payload)).await {
                            warn!("WebSocket write failed for session {}: {}", self.id, e);
                            break OutboundExit::WriteFailed;
                        }
                    }
                    None => {
                        // Best effort: the peer may already be gone.
                        if let Err(e) = self.writer.write_frame(Frame::Close).await {
                            debug!("Close frame not delivered to session {}: {}", self.id, e);
                        }
                        break OutboundExit::MailboxClosed;
                    }
                },
                _ = ping.tick() => {
                    if let Err(e) = self.writer.write_frame(Frame::Ping(Bytes::new())).await {
                        warn!("WebSocket ping failed for session {}: {}", self.id, e);
                        break OutboundExit::WriteFailed;
                    }
                }
            }
        };

        if let Err(e) = self.writer.close().await {
            debug!("Closing socket for session {}: {}", self.id, e);
        }
        self.stop_reading.cancel();
        if exit == OutboundExit::WriteFailed {
            self.hub.unregister(self.id);
        }
        debug!("Outbound pump for session {} finished: {:?}", self.id, exit);
        exit
    }
}

pub struct InboundPump<R> {
    pub id: SessionId,
    pub label: String,
    pub reader: R,
    pub hub: HubHandle,
    pub policy: InboundPolicy,
    pub stop: CancellationToken,
}

impl<R: FrameReader> InboundPump<R> {
    pub async fn run(mut self) -> InboundExit {
        let exit = loop {
            let frame = tokio::select! {
                _ = self.stop.cancelled() => break InboundExit::Cancelled,
                frame = self.reader.read_frame() => frame,
            };

            match frame {
                Some(Ok(Frame::Data(payload))) => self.deliver(payload),
                Some(Ok(Frame::Ping(_))) => trace!("Ping from session {}", self.id),
                Some(Ok(Frame::Pong(_))) => trace!("Pong from session {}", self.id),
                Some(Ok(Frame::Close)) => break InboundExit::CloseFrame,
                Some(Err(e)) => {
                    warn!("WebSocket read failed for session {}: {}", self.id, e);
                    break InboundExit::ReadFailed;
                }
                None => break InboundExit::EndOfStream,
            }
        };

        self.hub.unregister(self.id);
        info!(
            "WebSocket session {} (id={:?}) disconnected: {:?}",
            self.id, self.label, exit
        );
        exit
    }

    fn deliver(&self, payload: Bytes) {
        match self.policy {
            InboundPolicy::Discard => {
                debug!(
                    "Discarding {} byte frame from session {}",
                    payload.len(),
                    self.id
                );
            }
            InboundPolicy::Broadcast => self.hub.broadcast(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::adapter::AdapterError;
    use crate::ws::hub::Hub;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Writer that records frames and can be told to fail.
    struct RecordingWriter {
        frames: mpsc::UnboundedSender<Frame>,
        fail_writes: bool,
    }

    #[async_trait]
    impl FrameWriter for RecordingWriter {
        async fn write_frame(&mut self, frame: Frame) -> Result<(), AdapterError> {
            if self.fail_writes {
                return Err(AdapterError::Transport("broken pipe".to_string()));
            }
            self.frames.send(frame).map_err(|_| AdapterError::Closed)
        }

        async fn close(&mut self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    /// Reader fed from a channel; dropping the sender ends the stream.
    struct ScriptedReader {
        frames: mpsc::UnboundedReceiver<Result<Frame, AdapterError>>,
    }

    #[async_trait]
    impl FrameReader for ScriptedReader {
        async fn read_frame(&mut self) -> Option<Result<Frame, AdapterError>> {
            self.frames.recv().await
        }
    }

    const NO_PINGS: Duration = Duration::from_secs(3600);

    fn recording_writer(fail_writes: bool) -> (RecordingWriter, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            RecordingWriter {
                frames: tx,
                fail_writes,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_outbound_pump_writes_messages_then_close_frame() {
        let hub = Hub::spawn();
        let (session, mailbox) = hub.open_session("out", 8);
        let id = session.id();
        hub.register(session);
        let (writer, mut written) = recording_writer(false);

        let pump = OutboundPump {
            id,
            writer,
            mailbox,
            hub: hub.clone(),
            ping_interval: NO_PINGS,
            stop_reading: CancellationToken::new(),
        };
        let task = tokio::spawn(pump.run());

        hub.broadcast("one");
        hub.broadcast("two");
        hub.flush().await.unwrap();
        hub.unregister(id);

        assert_eq!(task.await.unwrap(), OutboundExit::MailboxClosed);
        assert_eq!(written.recv().await, Some(Frame::Data(Bytes::from("one"))));
        assert_eq!(written.recv().await, Some(Frame::Data(Bytes::from("two"))));
        assert_eq!(written.recv().await, Some(Frame::Close));
    }

    #[tokio::test]
    async fn test_outbound_write_failure_unregisters_and_stops_reader() {
        let hub = Hub::spawn();
        let (session, mailbox) = hub.open_session("broken", 8);
        let id = session.id();
        hub.register(session);
        hub.flush().await.unwrap();
        assert_eq!(hub.client_count().await, 1);

        let (writer, _written) = recording_writer(true);
        let stop_reading = CancellationToken::new();
        let pump = OutboundPump {
            id,
            writer,
            mailbox,
            hub: hub.clone(),
            ping_interval: NO_PINGS,
            stop_reading: stop_reading.clone(),
        };
        let task = tokio::spawn(pump.run());

        hub.broadcast("doomed");
        assert_eq!(task.await.unwrap(), OutboundExit::WriteFailed);
        assert!(stop_reading.is_cancelled());

        hub.flush().await.unwrap();
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_pump_sends_keepalive_pings() {
        let hub = Hub::spawn();
        let (session, mailbox) = hub.open_session("idle", 8);
        let id = session.id();
        hub.register(session);
        let (writer, mut written) = recording_writer(false);

        let pump = OutboundPump {
            id,
            writer,
            mailbox,
            hub: hub.clone(),
            ping_interval: Duration::from_secs(30),
            stop_reading: CancellationToken::new(),
        };
        let task = tokio::spawn(pump.run());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(written.recv().await, Some(Frame::Ping(Bytes::new())));

        hub.unregister(id);
        assert_eq!(task.await.unwrap(), OutboundExit::MailboxClosed);
    }

    #[tokio::test]
    async fn test_inbound_close_frame_unregisters_session() {
        let hub = Hub::spawn();
        let (session, mut mailbox) = hub.open_session("in", 8);
        let id = session.id();
        hub.register(session);

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let pump = InboundPump {
            id,
            label: "in".to_string(),
            reader: ScriptedReader { frames: frames_rx },
            hub: hub.clone(),
            policy: InboundPolicy::Discard,
            stop: CancellationToken::new(),
        };
        let task = tokio::spawn(pump.run());

        frames_tx.send(Ok(Frame::Data(Bytes::from("ignored")))).unwrap();
        frames_tx.send(Ok(Frame::Ping(Bytes::new()))).unwrap();
        frames_tx.send(Ok(Frame::Close)).unwrap();

        assert_eq!(task.await.unwrap(), InboundExit::CloseFrame);
        hub.flush().await.unwrap();
        assert_eq!(hub.client_count().await, 0);
        // Discarded frames never reach anyone's mailbox.
        assert_eq!(mailbox.recv().await, None);
    }

    #[tokio::test]
    async fn test_inbound_read_error_unregisters_session() {
        let hub = Hub::spawn();
        let (session, _mailbox) = hub.open_session("flaky", 8);
        let id = session.id();
        hub.register(session);

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let pump = InboundPump {
            id,
            label: "flaky".to_string(),
            reader: ScriptedReader { frames: frames_rx },
            hub: hub.clone(),
            policy: InboundPolicy::Discard,
            stop: CancellationToken::new(),
        };
        frames_tx
            .send(Err(AdapterError::Transport("connection reset".to_string())))
            .unwrap();

        assert_eq!(pump.run().await, InboundExit::ReadFailed);
        hub.flush().await.unwrap();
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_inbound_broadcast_policy_relays_to_all() {
        let hub = Hub::spawn();
        let (speaker, _speaker_mailbox) = hub.open_session("speaker", 8);
        let (listener, mut listener_mailbox) = hub.open_session("listener", 8);
        let speaker_id = speaker.id();
        hub.register(speaker);
        hub.register(listener);

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let pump = InboundPump {
            id: speaker_id,
            label: "speaker".to_string(),
            reader: ScriptedReader { frames: frames_rx },
            hub: hub.clone(),
            policy: InboundPolicy::Broadcast,
            stop: CancellationToken::new(),
        };
        frames_tx.send(Ok(Frame::Data(Bytes::from("hi all")))).unwrap();
        drop(frames_tx);

        assert_eq!(pump.run().await, InboundExit::EndOfStream);
        hub.flush().await.unwrap();
        assert_eq!(listener_mailbox.recv().await, Some(Bytes::from("hi all")));
    }

    #[tokio::test]
    async fn test_relayed_frame_reaches_speaker_that_then_closes() {
        let hub = Hub::spawn();
        let (speaker, mut speaker_mailbox) = hub.open_session("speaker", 8);
        let speaker_id = speaker.id();
        hub.register(speaker);
        hub.flush().await.unwrap();

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let pump = InboundPump {
            id: speaker_id,
            label: "speaker".to_string(),
            reader: ScriptedReader { frames: frames_rx },
            hub: hub.clone(),
            policy: InboundPolicy::Broadcast,
            stop: CancellationToken::new(),
        };
        frames_tx.send(Ok(Frame::Data(Bytes::from("last words")))).unwrap();
        frames_tx.send(Ok(Frame::Close)).unwrap();

        assert_eq!(pump.run().await, InboundExit::CloseFrame);
        hub.flush().await.unwrap();
        assert_eq!(speaker_mailbox.recv().await, Some(Bytes::from("last words")));
        assert_eq!(speaker_mailbox.recv().await, None);
    }

    #[tokio::test]
    async fn test_inbound_pump_stops_when_cancelled() {
        let hub = Hub::spawn();
        let (_frames_tx, frames_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let pump = InboundPump {
            id: hub.next_session_id(),
            label: String::new(),
            reader: ScriptedReader { frames: frames_rx },
            hub: hub.clone(),
            policy: InboundPolicy::Discard,
            stop: stop.clone(),
        };
        let task = tokio::spawn(pump.run());
        stop.cancel();
        assert_eq!(task.await.unwrap(), InboundExit::Cancelled);
    }

    #[tokio::test]
    async fn test_spawned_pumps_tear_down_on_peer_close() {
        let hub = Hub::spawn();
        let (session, mailbox) = hub.open_session("pair", 8);
        let id = session.id();
        hub.register(session);

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (writer, mut written) = recording_writer(false);
        let (write_task, read_task) = SessionPumps {
            id,
            label: "pair".to_string(),
            reader: ScriptedReader { frames: frames_rx },
            writer,
            mailbox,
            hub: hub.clone(),
            ping_interval: NO_PINGS,
            inbound: InboundPolicy::Discard,
        }
        .spawn();

        hub.broadcast("before close");
        hub.flush().await.unwrap();
        frames_tx.send(Ok(Frame::Close)).unwrap();

        assert_eq!(read_task.await.unwrap(), InboundExit::CloseFrame);
        assert_eq!(write_task.await.unwrap(), OutboundExit::MailboxClosed);
        assert_eq!(
            written.recv().await,
            Some(Frame::Data(Bytes::from("before close")))
        );
        assert_eq!(written.recv().await, Some(Frame::Close));
        hub.flush().await.unwrap();
        assert_eq!(hub.client_count().await, 0);
    }
}
