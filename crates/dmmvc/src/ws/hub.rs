//! WebSocket hub: the single owner of the live-session set.
//!
//! All membership changes and broadcast fan-out go through one task
//! ([`Hub::run`]). Outside code only ever holds a [`HubHandle`], which
//! enqueues events; nothing but the hub loop touches the session map.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::error::{SendError, TryRecvError, TrySendError};
use tokio::sync::{RwLock, mpsc, oneshot};

/// Hub-assigned key for a session. Unique for the lifetime of the hub,
/// unlike the caller-supplied label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

/// The hub's side of a client session: identity plus the sending half of
/// its outbound mailbox.
///
/// Not `Clone`: once registered, the hub holds the only sender, so dropping
/// the session inside the hub is the one and only way its mailbox closes.
#[derive(Debug)]
pub struct ClientSession {
    id: SessionId,
    label: String,
    mailbox: mpsc::Sender<Bytes>,
}

impl ClientSession {
    /// Create a session and the receiving end of its mailbox. Outside the
    /// crate, sessions come from [`HubHandle::open_session`] so ids stay unique.
    pub(crate) fn new(id: SessionId, label: impl Into<String>, capacity: usize) -> (Self, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity);
        let session = Self {
            id,
            label: label.into(),
            mailbox: tx,
        };
        (session, Mailbox { rx })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Receiving end of a session's outbound queue, drained by the outbound pump.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<Bytes>,
}

impl Mailbox {
    /// Next queued message, or `None` once the hub has closed the mailbox
    /// and everything queued before that has been taken.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Bytes, TryRecvError> {
        self.rx.try_recv()
    }
}

/// Point-in-time hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Sessions currently registered.
    pub clients: usize,
    /// Sessions admitted since start.
    pub registered: u64,
    /// Sessions removed through unregister (or because their pump went away).
    pub unregistered: u64,
    /// Sessions dropped because their mailbox was full.
    pub shed: u64,
    /// Broadcast events processed.
    pub broadcasts: u64,
    /// Mailboxes closed by the hub, for any reason.
    pub mailboxes_closed: u64,
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("WebSocket hub is not running")]
    Stopped,
}

/// Everything the hub loop can be asked to do. All producers share one
/// queue, so events are applied in the order they were sent.
enum HubEvent {
    Register(ClientSession),
    Unregister(SessionId),
    Broadcast(Bytes),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Unregistered,
    Shed,
    Gone,
    Shutdown,
}

/// The hub loop state. Construct with [`Hub::new`] or [`Hub::spawn`].
pub struct Hub {
    clients: HashMap<SessionId, ClientSession>,
    events: mpsc::UnboundedReceiver<HubEvent>,
    stats: HubStats,
    snapshot: Arc<RwLock<HubStats>>,
}

impl Hub {
    /// Create a hub and a handle to it. The hub does nothing until
    /// [`Hub::run`] is polled.
    pub fn new() -> (Self, HubHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(RwLock::new(HubStats::default()));

        let hub = Self {
            clients: HashMap::new(),
            events: events_rx,
            stats: HubStats::default(),
            snapshot: snapshot.clone(),
        };
        let handle = HubHandle {
            events: events_tx,
            snapshot,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (hub, handle)
    }

    /// Create a hub and run it on the current tokio runtime.
    pub fn spawn() -> HubHandle {
        let (hub, handle) = Self::new();
        tokio::spawn(hub.run());
        handle
    }

    /// Process events until shutdown or until every handle is dropped.
    ///
    /// One event is fully applied, and the stats snapshot republished,
    /// before the next is taken.
    pub async fn run(mut self) {
        info!("WebSocket hub started");
        while let Some(event) = self.events.recv().await {
            match event {
                HubEvent::Register(session) => self.admit(session),
                HubEvent::Unregister(id) => {
                    self.evict(id, Removal::Unregistered);
                }
                HubEvent::Broadcast(message) => self.fan_out(message),
                HubEvent::Flush(ack) => {
                    let _ = ack.send(());
                }
                HubEvent::Shutdown(ack) => {
                    self.close_all();
                    self.publish().await;
                    self.events.close();
                    let _ = ack.send(());
                    break;
                }
            }
            self.publish().await;
        }
        info!(
            "WebSocket hub stopped ({} registered, {} shed)",
            self.stats.registered, self.stats.shed
        );
    }

    fn admit(&mut self, session: ClientSession) {
        let total = self.clients.len() + 1;
        match self.clients.entry(session.id) {
            Entry::Occupied(_) => {
                warn!(
                    "WebSocket session {} already registered, refusing duplicate (id={:?})",
                    session.id, session.label
                );
                // The newcomer never became a member; its mailbox closes here.
                self.stats.mailboxes_closed += 1;
            }
            Entry::Vacant(slot) => {
                self.stats.registered += 1;
                info!(
                    "Registered WebSocket session {} (id={:?}) total={}",
                    session.id,
                    session.label,
                    total
                );
                slot.insert(session);
            }
        }
    }

    fn fan_out(&mut self, message: Bytes) {
        self.stats.broadcasts += 1;

        let mut dead = Vec::new();
        for (id, session) in &self.clients {
            match session.mailbox.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => dead.push((*id, Removal::Shed)),
                Err(TrySendError::Closed(_)) => dead.push((*id, Removal::Gone)),
            }
        }

        for (id, reason) in dead {
            if reason == Removal::Shed {
                warn!("WebSocket session {} cannot keep up, disconnecting", id);
            }
            self.evict(id, reason);
        }
    }

    /// Remove a session and close its mailbox. Returns `false` if the
    /// session was not a member, which makes repeated removal a no-op.
    fn evict(&mut self, id: SessionId, reason: Removal) -> bool {
        let Some(session) = self.clients.remove(&id) else {
            debug!("WebSocket session {} already removed ({:?})", id, reason);
            return false;
        };

        match reason {
            Removal::Unregistered | Removal::Gone => self.stats.unregistered += 1,
            Removal::Shed => self.stats.shed += 1,
            Removal::Shutdown => {}
        }
        self.stats.mailboxes_closed += 1;

        info!(
            "Unregistered WebSocket session {} (id={:?}, {:?}) total={}",
            session.id,
            session.label,
            reason,
            self.clients.len()
        );
        // Dropping the hub's sender closes the mailbox.
        drop(session);
        true
    }

    fn close_all(&mut self) {
        let ids: Vec<SessionId> = self.clients.keys().copied().collect();
        for id in ids {
            self.evict(id, Removal::Shutdown);
        }
    }

    async fn publish(&mut self) {
        self.stats.clients = self.clients.len();
        *self.snapshot.write().await = self.stats;
    }
}

/// Cloneable handle used by the upgrade handler, the session pumps and any
/// other producer to talk to the hub.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<HubEvent>,
    snapshot: Arc<RwLock<HubStats>>,
    next_id: Arc<AtomicU64>,
}

impl HubHandle {
    pub(crate) fn next_session_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a session with a fresh id. The session is not registered yet.
    pub fn open_session(
        &self,
        label: impl Into<String>,
        capacity: usize,
    ) -> (ClientSession, Mailbox) {
        ClientSession::new(self.next_session_id(), label, capacity)
    }

    /// Queue a session for admission.
    ///
    /// If the hub has stopped the session is dropped here, which closes its
    /// mailbox and lets the outbound pump wind down.
    pub fn register(&self, session: ClientSession) {
        if let Err(SendError(HubEvent::Register(session))) =
            self.events.send(HubEvent::Register(session))
        {
            debug!("WebSocket hub stopped, dropping session {}", session.id);
        }
    }

    /// Queue a session for removal. Removing an absent session is a no-op.
    pub fn unregister(&self, id: SessionId) {
        if self.events.send(HubEvent::Unregister(id)).is_err() {
            debug!("WebSocket hub stopped, ignoring unregister of {}", id);
        }
    }

    /// Queue a message for every session registered when the hub gets to it.
    pub fn broadcast(&self, message: impl Into<Bytes>) {
        if self.events.send(HubEvent::Broadcast(message.into())).is_err() {
            debug!("WebSocket hub stopped, dropping broadcast");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }

    /// Number of registered sessions as of the last processed event.
    pub async fn client_count(&self) -> usize {
        self.snapshot.read().await.clients
    }

    pub async fn stats(&self) -> HubStats {
        *self.snapshot.read().await
    }

    /// Wait until every event queued before this call has been applied.
    pub async fn flush(&self) -> Result<(), HubError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.events
            .send(HubEvent::Flush(ack_tx))
            .map_err(|_| HubError::Stopped)?;
        ack_rx.await.map_err(|_| HubError::Stopped)
    }

    /// Close every session's mailbox and stop the hub loop. Events queued
    /// before the shutdown are applied first.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.events
            .send(HubEvent::Shutdown(ack_tx))
            .map_err(|_| HubError::Stopped)?;
        ack_rx.await.map_err(|_| HubError::Stopped)
    }
}
