//! Client handles and outbound queues.
//!
//! A [`ClientHandle`] is the hub-facing side of one live connection: its
//! identity, the sending end of its bounded outbound queue, and an advisory
//! cache of the rooms it has joined. The matching [`Outbox`] is drained by the
//! connection's writer task.

use bytes::Bytes;
use dashmap::DashSet;
use huddle_protocol::{codec, Envelope, RoomId, UserId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, warn};

/// Global counter for connection ids.
static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque per-connection identifier. Never reused within a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh connection id.
    #[must_use]
    pub fn generate() -> Self {
        let n = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}", n))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is on the other end of a connection, as established by the
/// authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user_id: UserId,
    pub username: String,
}

impl ClientIdentity {
    #[must_use]
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

/// Why a frame could not be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The outbound queue is at capacity.
    #[error("Outbound queue full")]
    Full,

    /// The outbound queue has been closed.
    #[error("Outbound queue closed")]
    Closed,
}

struct ClientInner {
    id: ClientId,
    identity: ClientIdentity,
    tx: mpsc::Sender<Bytes>,
    closed: AtomicBool,
    close_notify: Notify,
    rooms: DashSet<RoomId>,
}

/// Shared handle to one connected client.
#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<ClientInner>,
}

impl ClientHandle {
    /// Create a client with a fresh id and an outbound queue holding at most
    /// `capacity` frames.
    #[must_use]
    pub fn new(identity: ClientIdentity, capacity: usize) -> (Self, Outbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let inner = Arc::new(ClientInner {
            id: ClientId::generate(),
            identity,
            tx,
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            rooms: DashSet::new(),
        });
        let outbox = Outbox {
            rx,
            inner: Arc::clone(&inner),
            draining: false,
        };
        (Self { inner }, outbox)
    }

    /// Connection id.
    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.inner.id
    }

    /// Authenticated identity.
    #[must_use]
    pub fn identity(&self) -> &ClientIdentity {
        &self.inner.identity
    }

    /// Queue a pre-encoded frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] if the queue is at capacity and
    /// [`EnqueueError::Closed`] once the queue has been closed.
    pub fn try_send(&self, frame: Bytes) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.inner.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Encode and queue an envelope addressed to this client alone.
    ///
    /// A full queue drops the envelope; the connection is kept.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        let frame = match codec::encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!(connection = %self.id(), error = %e, "Failed to encode envelope");
                return false;
            }
        };

        match self.try_send(frame) {
            Ok(()) => true,
            Err(EnqueueError::Full) => {
                warn!(
                    connection = %self.id(),
                    kind = %envelope.kind,
                    "Outbound queue full, dropping envelope"
                );
                false
            }
            Err(EnqueueError::Closed) => {
                debug!(connection = %self.id(), "Dropping envelope for closed client");
                false
            }
        }
    }

    /// Close the outbound queue. The writer drains what is already queued and
    /// then stops.
    ///
    /// Returns `true` if this call closed the queue.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.close_notify.notify_one();
        true
    }

    /// Whether the outbound queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Rooms this client believes it has joined. Advisory only.
    #[must_use]
    pub fn joined_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.inner.rooms.iter().map(|r| *r).collect();
        rooms.sort_unstable();
        rooms
    }

    /// Whether the advisory cache lists `room`.
    #[must_use]
    pub fn in_room(&self, room: RoomId) -> bool {
        self.inner.rooms.contains(&room)
    }

    pub(crate) fn note_joined(&self, room: RoomId) {
        self.inner.rooms.insert(room);
    }

    pub(crate) fn note_left(&self, room: RoomId) {
        self.inner.rooms.remove(&room);
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.identity.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving end of a client's outbound queue.
pub struct Outbox {
    rx: mpsc::Receiver<Bytes>,
    inner: Arc<ClientInner>,
    draining: bool,
}

impl Outbox {
    /// Next queued frame.
    ///
    /// Returns `None` once the queue has been closed and everything queued
    /// before the close has been handed out.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            if !self.draining && self.inner.closed.load(Ordering::Acquire) {
                self.rx.close();
                self.draining = true;
            }
            if self.draining {
                return self.rx.recv().await;
            }

            tokio::select! {
                biased;
                () = self.inner.close_notify.notified() => continue,
                frame = self.rx.recv() => return frame,
            }
        }
    }

    /// Take a queued frame if one is ready.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Connection id of the owning client.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.inner.id
    }

    /// Mark the queue closed from the writer side, e.g. after the socket
    /// failed. Further enqueues fail with [`EnqueueError::Closed`].
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }
}
