//! Contracts for the services the hub depends on but does not own.

use crate::client::ClientIdentity;
use async_trait::async_trait;
use huddle_protocol::{MessageId, RoomId, UserId};
use thiserror::Error;

/// Collaborator errors.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// Credential missing, malformed, expired or otherwise rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backing service failed.
    #[error("Backend failure: {0}")]
    Backend(String),
}

/// Verifies connection credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a bearer token to the identity it was issued for.
    async fn verify(&self, token: &str) -> Result<ClientIdentity, CollaboratorError>;
}

/// Decides who may enter which room.
#[async_trait]
pub trait RoomAuthority: Send + Sync {
    async fn can_join(&self, user_id: UserId, room_id: RoomId) -> Result<bool, CollaboratorError>;
}

/// Persists chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store a message and return its id.
    async fn save(
        &self,
        room_id: RoomId,
        user_id: UserId,
        content: &str,
    ) -> Result<MessageId, CollaboratorError>;
}
