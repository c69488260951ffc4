//! The connection hub.
//!
//! One [`Hub`] per process owns the client registry and the room membership
//! table. Everything that reads or changes them arrives as a [`HubEvent`] on a
//! single bounded inbox and is handled to completion before the next event,
//! so the tables need no locks. Work that may be slow (asking the room
//! authority whether a join is allowed) runs in a spawned task and posts its
//! answer back into the inbox.
//!
//! ```rust,ignore
//! let hub = Hub::spawn(HubConfig::default(), authority, store);
//!
//! let (client, outbox) = ClientHandle::new(identity, 256);
//! hub.register(client.clone()).await?;
//! hub.request_join(client.id().clone(), 7).await?;
//! ```

use crate::client::{ClientHandle, ClientId, ClientIdentity};
use crate::collaborators::{CollaboratorError, MessageStore, RoomAuthority};
use crate::event::HubEvent;
use crate::room::Room;
use huddle_protocol::{codec, codes, Envelope, EnvelopeKind, RoomId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

/// Content of the confirmation sent to a client whose join succeeded.
pub const JOINED_NOTICE: &str = "joined room";

/// Hub errors, as seen by callers of [`HubHandle`].
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub loop has exited.
    #[error("Hub is not running")]
    Stopped,

    /// The hub dropped a request without answering.
    #[error("Hub dropped the reply")]
    NoReply,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the event inbox.
    pub inbox_capacity: usize,
    /// Whether to drop room entries once their last member leaves.
    pub prune_empty_rooms: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 1024,
            prune_empty_rooms: true,
        }
    }
}

/// Point-in-time hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Number of registered clients.
    pub total_clients: usize,
    /// Number of rooms with a membership entry.
    pub total_rooms: usize,
    /// Member count per room.
    pub room_clients: BTreeMap<RoomId, usize>,
}

/// Cheap, cloneable handle for talking to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.tx.send(event).await.map_err(|_| HubError::Stopped)
    }

    /// Add a client to the registry.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub async fn register(&self, client: ClientHandle) -> Result<(), HubError> {
        self.send(HubEvent::Register(client)).await
    }

    /// Remove a client from the registry and from every room, then close its
    /// outbound queue. Unknown clients are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub async fn unregister(&self, client: ClientId) -> Result<(), HubError> {
        self.send(HubEvent::Unregister(client)).await
    }

    /// Ask for a client to enter a room. The outcome is reported to the client
    /// on its outbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub async fn request_join(&self, client: ClientId, room: RoomId) -> Result<(), HubError> {
        self.send(HubEvent::Join { client, room }).await
    }

    /// Take a client out of a room. Not an error if it is not a member.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub async fn request_leave(&self, client: ClientId, room: RoomId) -> Result<(), HubError> {
        self.send(HubEvent::Leave { client, room }).await
    }

    /// Hand an envelope received from a client to the hub.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub async fn dispatch(&self, client: ClientId, envelope: Envelope) -> Result<(), HubError> {
        self.send(HubEvent::Dispatch { client, envelope }).await
    }

    /// Deliver an envelope to every member of a room except `exclude`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub async fn broadcast(
        &self,
        room: RoomId,
        envelope: Envelope,
        exclude: Option<ClientId>,
    ) -> Result<(), HubError> {
        self.send(HubEvent::Broadcast {
            room,
            envelope,
            exclude,
        })
        .await
    }

    /// Inject a system notice into a room without a client origin.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub async fn broadcast_system(
        &self,
        room: RoomId,
        content: impl Into<String>,
    ) -> Result<(), HubError> {
        self.broadcast(room, Envelope::system(room, content), None)
            .await
    }

    /// Snapshot of clients and rooms.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is gone.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Stats { reply }).await?;
        rx.await.map_err(|_| HubError::NoReply)
    }
}

/// A client that dropped out of a room and must be announced.
struct Departure {
    room: RoomId,
    identity: ClientIdentity,
}

/// The hub actor.
pub struct Hub {
    clients: HashMap<ClientId, ClientHandle>,
    rooms: HashMap<RoomId, Room>,
    inbox: mpsc::Receiver<HubEvent>,
    /// Used by spawned authorization tasks to report back. Weak, so the loop
    /// ends once every [`HubHandle`] is gone.
    loopback: mpsc::WeakSender<HubEvent>,
    authority: Arc<dyn RoomAuthority>,
    store: Arc<dyn MessageStore>,
    config: HubConfig,
}

impl Hub {
    /// Create a hub and its handle. The hub does nothing until [`Hub::run`]
    /// is polled.
    #[must_use]
    pub fn new(
        config: HubConfig,
        authority: Arc<dyn RoomAuthority>,
        store: Arc<dyn MessageStore>,
    ) -> (Self, HubHandle) {
        let (tx, inbox) = mpsc::channel(config.inbox_capacity.max(1));
        let hub = Self {
            clients: HashMap::new(),
            rooms: HashMap::new(),
            inbox,
            loopback: tx.downgrade(),
            authority,
            store,
            config,
        };
        (hub, HubHandle { tx })
    }

    /// Create a hub and run it on the current runtime.
    #[must_use]
    pub fn spawn(
        config: HubConfig,
        authority: Arc<dyn RoomAuthority>,
        store: Arc<dyn MessageStore>,
    ) -> HubHandle {
        let (hub, handle) = Self::new(config, authority, store);
        tokio::spawn(hub.run());
        handle
    }

    /// Process events until every handle has been dropped.
    pub async fn run(mut self) {
        info!(inbox_capacity = self.config.inbox_capacity, "Hub started");

        while let Some(event) = self.inbox.recv().await {
            trace!(event = event.name(), "Hub event");
            self.handle_event(event).await;
        }

        for client in self.clients.values() {
            client.close();
        }
        info!(clients = self.clients.len(), "Hub stopped");
    }

    async fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(client) => self.register(client),
            HubEvent::Unregister(id) => self.unregister(&id),
            HubEvent::Join { client, room } => self.request_join(&client, room),
            HubEvent::JoinResolved {
                client,
                room,
                outcome,
            } => self.complete_join(&client, room, outcome),
            HubEvent::Leave { client, room } => self.leave(&client, room),
            HubEvent::Dispatch { client, envelope } => self.dispatch(&client, envelope).await,
            HubEvent::Broadcast {
                room,
                envelope,
                exclude,
            } => self.broadcast(room, &envelope, exclude.as_ref()),
            HubEvent::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn register(&mut self, client: ClientHandle) {
        debug!(
            connection = %client.id(),
            user = client.identity().user_id,
            "Client registered"
        );
        if let Some(previous) = self.clients.insert(client.id().clone(), client) {
            warn!(connection = %previous.id(), "Client registered twice");
        }
    }

    fn unregister(&mut self, id: &ClientId) {
        let Some(client) = self.clients.remove(id) else {
            trace!(connection = %id, "Unregister for unknown client");
            return;
        };

        let mut departures = VecDeque::new();
        for room in self.rooms.values_mut() {
            if room.leave(id).is_some() {
                client.note_left(room.id());
                departures.push_back(Departure {
                    room: room.id(),
                    identity: client.identity().clone(),
                });
            }
        }

        client.close();
        debug!(
            connection = %id,
            rooms = departures.len(),
            "Client unregistered"
        );

        self.announce_departures(departures);
    }

    fn request_join(&self, id: &ClientId, room: RoomId) {
        // An evicted client stays registered until its teardown; it cannot rejoin.
        let Some(client) = self.clients.get(id).filter(|c| !c.is_closed()) else {
            debug!(connection = %id, room, "Join from closed or unregistered client ignored");
            return;
        };

        if self.is_member(id, room) {
            client.send_envelope(&Envelope::system(room, JOINED_NOTICE));
            return;
        }

        let Some(loopback) = self.loopback.upgrade() else {
            return;
        };
        let authority = Arc::clone(&self.authority);
        let user_id = client.identity().user_id;
        let client_id = id.clone();

        tokio::spawn(async move {
            let outcome = authority.can_join(user_id, room).await;
            let event = HubEvent::JoinResolved {
                client: client_id,
                room,
                outcome,
            };
            if loopback.send(event).await.is_err() {
                debug!(room, "Hub stopped before join was resolved");
            }
        });
    }

    fn complete_join(
        &mut self,
        id: &ClientId,
        room: RoomId,
        outcome: Result<bool, CollaboratorError>,
    ) {
        let Some(client) = self.clients.get(id).filter(|c| !c.is_closed()).cloned() else {
            debug!(connection = %id, room, "Client gone before join was resolved");
            return;
        };

        match outcome {
            Ok(true) => {}
            Ok(false) => {
                info!(connection = %id, user = client.identity().user_id, room, "Join denied");
                client.send_envelope(
                    &Envelope::error(codes::FORBIDDEN, "access to room denied").with_room(room),
                );
                return;
            }
            Err(e) => {
                warn!(connection = %id, room, error = %e, "Room authority check failed");
                client.send_envelope(
                    &Envelope::error(codes::FORBIDDEN, "access to room denied").with_room(room),
                );
                return;
            }
        }

        let inserted = self
            .rooms
            .entry(room)
            .or_insert_with(|| Room::new(room))
            .join(client.clone());

        if inserted {
            client.note_joined(room);
        }
        client.send_envelope(&Envelope::system(room, JOINED_NOTICE));
        if !inserted {
            return;
        }

        info!(
            connection = %id,
            user = client.identity().user_id,
            room,
            "Client joined room"
        );

        let identity = client.identity();
        let announcement = notice(room, identity, format!("{} joined the room", identity.username));
        self.broadcast(room, &announcement, Some(id));
        if let Some(list) = self.user_list(room) {
            self.broadcast(room, &list, None);
        }
    }

    fn leave(&mut self, id: &ClientId, room: RoomId) {
        let Some(client) = self.clients.get(id).cloned() else {
            debug!(connection = %id, room, "Leave from unregistered client ignored");
            return;
        };

        client.note_left(room);
        let removed = self
            .rooms
            .get_mut(&room)
            .and_then(|r| r.leave(id))
            .is_some();
        if !removed {
            trace!(connection = %id, room, "Leave for a room the client is not in");
            return;
        }

        info!(connection = %id, room, "Client left room");
        self.announce_departures(VecDeque::from([Departure {
            room,
            identity: client.identity().clone(),
        }]));
    }

    async fn dispatch(&mut self, id: &ClientId, envelope: Envelope) {
        let Some(client) = self.clients.get(id).cloned() else {
            debug!(connection = %id, kind = %envelope.kind, "Envelope from unregistered client ignored");
            return;
        };

        let room = envelope.room();
        if envelope.kind.is_room_scoped() && room.is_none() {
            client.send_envelope(&missing_room());
            return;
        }

        let at = envelope.timestamp;
        let identity = client.identity();
        let envelope = envelope.from_sender(identity.user_id, identity.username.clone(), at);

        match envelope.kind {
            EnvelopeKind::Text => self.handle_text(&client, envelope).await,
            EnvelopeKind::Typing => match self.member_room(id, &envelope) {
                Ok(room) => self.broadcast(room, &envelope, Some(id)),
                Err(reply) => {
                    client.send_envelope(&reply);
                }
            },
            EnvelopeKind::Join => {
                if let Some(room) = room {
                    self.request_join(id, room);
                }
            }
            EnvelopeKind::Leave => {
                if let Some(room) = room {
                    self.leave(id, room);
                }
            }
            EnvelopeKind::Ping => {
                client.send_envelope(&Envelope::pong());
            }
            EnvelopeKind::Pong => {}
            EnvelopeKind::System | EnvelopeKind::UserList | EnvelopeKind::Error => {
                debug!(connection = %id, kind = %envelope.kind, "Unsupported envelope from client");
                client.send_envelope(&Envelope::error(
                    codes::BAD_REQUEST,
                    "unsupported message type",
                ));
            }
        }
    }

    async fn handle_text(&mut self, client: &ClientHandle, envelope: Envelope) {
        let room = match self.member_room(client.id(), &envelope) {
            Ok(room) => room,
            Err(reply) => {
                client.send_envelope(&reply);
                return;
            }
        };

        // Awaited in-line so one sender's messages are stored and fanned out
        // in the order they were read.
        let saved = self
            .store
            .save(room, client.identity().user_id, envelope.content_str())
            .await;

        match saved {
            Ok(message_id) => {
                trace!(connection = %client.id(), room, message = message_id, "Message stored");
                self.broadcast(room, &envelope.with_message_id(message_id), None);
            }
            Err(e) => {
                error!(connection = %client.id(), room, error = %e, "Failed to store message");
                client.send_envelope(
                    &Envelope::error(codes::INTERNAL, "failed to save message").with_room(room),
                );
            }
        }
    }

    /// The envelope's room, if the client is currently a member of it.
    /// Otherwise the error envelope to send back.
    fn member_room(&self, id: &ClientId, envelope: &Envelope) -> Result<RoomId, Envelope> {
        let room = envelope.room().ok_or_else(missing_room)?;
        if self.is_member(id, room) {
            Ok(room)
        } else {
            Err(Envelope::error(codes::FORBIDDEN, "not a member of this room").with_room(room))
        }
    }

    fn is_member(&self, id: &ClientId, room: RoomId) -> bool {
        self.rooms.get(&room).is_some_and(|r| r.contains(id))
    }

    fn user_list(&self, room: RoomId) -> Option<Envelope> {
        self.rooms
            .get(&room)
            .filter(|r| !r.is_empty())
            .map(|r| Envelope::user_list(room, r.user_list()))
    }

    /// Broadcast, then announce anyone the broadcast evicted.
    fn broadcast(&mut self, room: RoomId, envelope: &Envelope, exclude: Option<&ClientId>) {
        let evicted = self.fan_out(room, envelope, exclude);
        self.announce_departures(evicted);
    }

    /// Tell the remaining members of each room who left and who is still
    /// there. Announcing can evict more clients; those are handled in turn.
    fn announce_departures(&mut self, mut pending: VecDeque<Departure>) {
        while let Some(departure) = pending.pop_front() {
            let room = departure.room;
            let text = format!("{} left the room", departure.identity.username);
            let announcement = notice(room, &departure.identity, text);

            pending.extend(self.fan_out(room, &announcement, None));
            if let Some(list) = self.user_list(room) {
                pending.extend(self.fan_out(room, &list, None));
            }
            self.prune(room);
        }
    }

    /// Serialize once and queue to every member but `exclude`. Members whose
    /// queue refuses the frame are removed from the room and closed.
    fn fan_out(
        &mut self,
        room_id: RoomId,
        envelope: &Envelope,
        exclude: Option<&ClientId>,
    ) -> VecDeque<Departure> {
        let mut evicted = VecDeque::new();

        let Some(room) = self.rooms.get_mut(&room_id) else {
            trace!(room = room_id, kind = %envelope.kind, "Broadcast to room without members");
            return evicted;
        };

        let frame = match codec::encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!(room = room_id, error = %e, "Failed to encode broadcast");
                return evicted;
            }
        };

        let mut delivered = 0usize;
        let mut unreachable = Vec::new();
        for member in room.members() {
            if exclude == Some(member.id()) {
                continue;
            }
            match member.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        connection = %member.id(),
                        room = room_id,
                        reason = %e,
                        "Evicting unreachable client"
                    );
                    unreachable.push(member.id().clone());
                }
            }
        }

        for id in unreachable {
            if let Some(member) = room.leave(&id) {
                member.note_left(room_id);
                member.close();
                evicted.push_back(Departure {
                    room: room_id,
                    identity: member.identity().clone(),
                });
            }
        }

        trace!(
            room = room_id,
            kind = %envelope.kind,
            recipients = delivered,
            evicted = evicted.len(),
            "Broadcast"
        );
        evicted
    }

    fn prune(&mut self, room: RoomId) {
        if !self.config.prune_empty_rooms {
            return;
        }
        if self.rooms.get(&room).is_some_and(Room::is_empty) {
            self.rooms.remove(&room);
            debug!(room, "Removed empty room");
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            total_clients: self.clients.len(),
            total_rooms: self.rooms.len(),
            room_clients: self
                .rooms
                .iter()
                .map(|(id, room)| (*id, room.len()))
                .collect(),
        }
    }
}

fn missing_room() -> Envelope {
    Envelope::error(codes::BAD_REQUEST, "room id is required")
}

/// A system envelope about `identity`.
fn notice(room: RoomId, identity: &ClientIdentity, text: String) -> Envelope {
    let mut envelope = Envelope::system(room, text);
    envelope.user_id = Some(identity.user_id);
    envelope.username = Some(identity.username.clone());
    envelope
}
