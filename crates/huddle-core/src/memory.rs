//! In-memory collaborator implementations.
//!
//! Suitable for a single-process deployment and for tests. State is lost on
//! restart.

use crate::collaborators::{CollaboratorError, MessageStore, RoomAuthority};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use huddle_protocol::{MessageId, RoomId, UserId};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Access policy for one room.
#[derive(Debug, Clone, Default)]
pub struct RoomPolicy {
    /// Private rooms admit only listed members.
    pub private: bool,
    pub members: HashSet<UserId>,
}

/// Room authority backed by an in-memory room table.
#[derive(Debug)]
pub struct RoomDirectory {
    rooms: DashMap<RoomId, RoomPolicy>,
    open_rooms: bool,
}

impl RoomDirectory {
    /// Create an empty directory.
    ///
    /// With `open_rooms`, rooms that were never registered are joinable by
    /// anyone; otherwise they do not exist.
    #[must_use]
    pub fn new(open_rooms: bool) -> Self {
        Self {
            rooms: DashMap::new(),
            open_rooms,
        }
    }

    /// Register a public room.
    pub fn add_public(&self, room_id: RoomId) {
        self.rooms.insert(room_id, RoomPolicy::default());
    }

    /// Register a private room with its members.
    pub fn add_private(&self, room_id: RoomId, members: impl IntoIterator<Item = UserId>) {
        self.rooms.insert(
            room_id,
            RoomPolicy {
                private: true,
                members: members.into_iter().collect(),
            },
        );
    }

    /// Add a member to an existing room. Returns `false` if the room is unknown.
    pub fn add_member(&self, room_id: RoomId, user_id: UserId) -> bool {
        match self.rooms.get_mut(&room_id) {
            Some(mut policy) => {
                policy.members.insert(user_id);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl RoomAuthority for RoomDirectory {
    async fn can_join(&self, user_id: UserId, room_id: RoomId) -> Result<bool, CollaboratorError> {
        match self.rooms.get(&room_id) {
            Some(policy) => Ok(!policy.private || policy.members.contains(&user_id)),
            None if self.open_rooms => Ok(true),
            None => Err(CollaboratorError::NotFound(format!("room {}", room_id))),
        }
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Message store keeping per-room history in memory.
#[derive(Debug)]
pub struct InMemoryMessageStore {
    next_id: AtomicU64,
    history: DashMap<RoomId, Vec<StoredMessage>>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            history: DashMap::new(),
        }
    }

    /// Messages stored for a room, oldest first.
    #[must_use]
    pub fn history(&self, room_id: RoomId) -> Vec<StoredMessage> {
        self.history
            .get(&room_id)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    /// Total number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.iter().map(|h| h.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save(
        &self,
        room_id: RoomId,
        user_id: UserId,
        content: &str,
    ) -> Result<MessageId, CollaboratorError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.history.entry(room_id).or_default().push(StoredMessage {
            id,
            room_id,
            user_id,
            content: content.to_string(),
            created_at: Utc::now(),
        });
        debug!(room = room_id, user = user_id, message = id, "Stored message");
        Ok(id)
    }
}
