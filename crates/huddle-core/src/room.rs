//! Room member sets.
//!
//! Rooms are owned by the hub and only touched from its processing loop, so
//! they need no synchronization of their own.

use crate::client::{ClientHandle, ClientId};
use huddle_protocol::{RoomId, UserInfo};
use std::collections::HashMap;

/// The set of clients currently in one room.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: HashMap<ClientId, ClientHandle>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            members: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Add a member. Returns `false` if it was already present.
    pub fn join(&mut self, client: ClientHandle) -> bool {
        if self.members.contains_key(client.id()) {
            return false;
        }
        self.members.insert(client.id().clone(), client);
        true
    }

    /// Remove a member, returning its handle if it was present.
    pub fn leave(&mut self, id: &ClientId) -> Option<ClientHandle> {
        self.members.remove(id)
    }

    #[must_use]
    pub fn contains(&self, id: &ClientId) -> bool {
        self.members.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Iterate over the current members.
    pub fn members(&self) -> impl Iterator<Item = &ClientHandle> {
        self.members.values()
    }

    /// The room roster, one entry per user ordered by user id. A user with
    /// several connections in the room is listed once.
    #[must_use]
    pub fn user_list(&self) -> Vec<UserInfo> {
        let mut users: Vec<UserInfo> = self
            .members
            .values()
            .map(|client| UserInfo {
                user_id: client.identity().user_id,
                username: client.identity().username.clone(),
                is_online: true,
            })
            .collect();
        users.sort_by_key(|u| u.user_id);
        users.dedup_by_key(|u| u.user_id);
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientIdentity;

    fn client(user_id: u64, name: &str) -> ClientHandle {
        ClientHandle::new(ClientIdentity::new(user_id, name), 4).0
    }

    #[test]
    fn test_room_join_leave() {
        let mut room = Room::new(7);
        let alice = client(1, "alice");

        assert!(room.join(alice.clone()));
        assert!(!room.join(alice.clone()));
        assert_eq!(room.len(), 1);
        assert!(room.contains(alice.id()));

        assert!(room.leave(alice.id()).is_some());
        assert!(room.leave(alice.id()).is_none());
        assert!(room.is_empty());
    }

    #[test]
    fn test_user_list_dedups_users() {
        let mut room = Room::new(7);
        room.join(client(2, "bob"));
        room.join(client(1, "alice"));
        room.join(client(2, "bob"));

        let users = room.user_list();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].username, "alice");
        assert_eq!(users[1].username, "bob");
        assert!(users.iter().all(|u| u.is_online));
        assert_eq!(room.len(), 3);
    }
}
