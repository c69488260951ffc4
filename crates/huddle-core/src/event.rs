//! Events consumed by the hub.

use crate::client::{ClientHandle, ClientId};
use crate::collaborators::CollaboratorError;
use crate::hub::HubStats;
use huddle_protocol::{Envelope, RoomId};
use tokio::sync::oneshot;

/// One unit of work for the hub's processing loop.
#[derive(Debug)]
pub enum HubEvent {
    /// A new connection.
    Register(ClientHandle),

    /// A connection is going away.
    Unregister(ClientId),

    /// A client asks to enter a room.
    Join { client: ClientId, room: RoomId },

    /// The room authority answered a join request.
    JoinResolved {
        client: ClientId,
        room: RoomId,
        outcome: Result<bool, CollaboratorError>,
    },

    /// A client leaves a room.
    Leave { client: ClientId, room: RoomId },

    /// An envelope read from a client's connection.
    Dispatch { client: ClientId, envelope: Envelope },

    /// Deliver an envelope to every member of a room but `exclude`.
    Broadcast {
        room: RoomId,
        envelope: Envelope,
        exclude: Option<ClientId>,
    },

    /// Snapshot request.
    Stats { reply: oneshot::Sender<HubStats> },
}

impl HubEvent {
    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::Register(_) => "register",
            HubEvent::Unregister(_) => "unregister",
            HubEvent::Join { .. } => "join",
            HubEvent::JoinResolved { .. } => "join_resolved",
            HubEvent::Leave { .. } => "leave",
            HubEvent::Dispatch { .. } => "dispatch",
            HubEvent::Broadcast { .. } => "broadcast",
            HubEvent::Stats { .. } => "stats",
        }
    }
}
