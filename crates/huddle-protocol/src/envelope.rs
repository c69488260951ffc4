//! Envelope types for the Huddle wire protocol.
//!
//! An envelope is the unit exchanged over a client connection and inside the
//! hub. Every envelope is a flat JSON object tagged by its `type` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Room identifier.
pub type RoomId = u64;

/// User identifier, as issued by the authenticator.
pub type UserId = u64;

/// Identifier assigned to a text message by the message store.
pub type MessageId = u64;

/// Application error codes carried by error envelopes.
pub mod codes {
    /// Malformed or unsupported inbound envelope.
    pub const BAD_REQUEST: u16 = 400;
    /// Join denied, or action on a room the client is not a member of.
    pub const FORBIDDEN: u16 = 403;
    /// The message store failed.
    pub const INTERNAL: u16 = 500;
}

/// Envelope kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Text,
    Join,
    Leave,
    Typing,
    System,
    #[serde(rename = "userlist")]
    UserList,
    Error,
    Ping,
    Pong,
}

impl EnvelopeKind {
    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Text => "text",
            EnvelopeKind::Join => "join",
            EnvelopeKind::Leave => "leave",
            EnvelopeKind::Typing => "typing",
            EnvelopeKind::System => "system",
            EnvelopeKind::UserList => "userlist",
            EnvelopeKind::Error => "error",
            EnvelopeKind::Ping => "ping",
            EnvelopeKind::Pong => "pong",
        }
    }

    /// Whether client-sent envelopes of this kind must name a room.
    #[must_use]
    pub fn is_room_scoped(&self) -> bool {
        matches!(
            self,
            EnvelopeKind::Text | EnvelopeKind::Join | EnvelopeKind::Leave | EnvelopeKind::Typing
        )
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a room's user list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: UserId,
    pub username: String,
    pub is_online: bool,
}

/// A protocol envelope.
///
/// Sender identity, timestamp and message id are owned by the server: whatever
/// a client puts in those fields is overwritten on ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    /// Target room. `0` on the wire is treated as absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,

    /// Sender user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,

    /// Sender display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Free text; meaning depends on the kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Ingestion time.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Persisted id, set on text envelopes once stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,

    /// Human-readable error text (error envelopes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Application error code (error envelopes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,

    /// Room roster (user-list envelopes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<UserInfo>>,
}

impl Envelope {
    /// Create an empty envelope of the given kind, stamped now.
    #[must_use]
    pub fn new(kind: EnvelopeKind) -> Self {
        Self {
            kind,
            room_id: None,
            user_id: None,
            username: None,
            content: None,
            timestamp: Utc::now(),
            message_id: None,
            error: None,
            code: None,
            users: None,
        }
    }

    /// Create a text envelope.
    #[must_use]
    pub fn text(room_id: RoomId, content: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Text)
            .with_room(room_id)
            .with_content(content)
    }

    /// Create a join request.
    #[must_use]
    pub fn join(room_id: RoomId) -> Self {
        Self::new(EnvelopeKind::Join).with_room(room_id)
    }

    /// Create a leave request.
    #[must_use]
    pub fn leave(room_id: RoomId) -> Self {
        Self::new(EnvelopeKind::Leave).with_room(room_id)
    }

    /// Create a typing indicator.
    #[must_use]
    pub fn typing(room_id: RoomId) -> Self {
        Self::new(EnvelopeKind::Typing).with_room(room_id)
    }

    /// Create a system notice for a room.
    #[must_use]
    pub fn system(room_id: RoomId, content: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::System)
            .with_room(room_id)
            .with_content(content)
    }

    /// Create an error envelope.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        let mut envelope = Self::new(EnvelopeKind::Error);
        envelope.code = Some(code);
        envelope.error = Some(message.into());
        envelope
    }

    /// Create a user-list envelope for a room.
    #[must_use]
    pub fn user_list(room_id: RoomId, users: Vec<UserInfo>) -> Self {
        let mut envelope = Self::new(EnvelopeKind::UserList).with_room(room_id);
        envelope.users = Some(users);
        envelope
    }

    /// Create an application-level ping.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(EnvelopeKind::Ping)
    }

    /// Create an application-level pong.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(EnvelopeKind::Pong)
    }

    /// Set the target room.
    #[must_use]
    pub fn with_room(mut self, room_id: RoomId) -> Self {
        self.room_id = Some(room_id);
        self
    }

    /// Set the content.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set the persisted message id.
    #[must_use]
    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Replace every server-owned field with the sender's identity and the
    /// ingestion time.
    #[must_use]
    pub fn from_sender(
        mut self,
        user_id: UserId,
        username: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        self.user_id = Some(user_id);
        self.username = Some(username.into());
        self.timestamp = at;
        self.message_id = None;
        self.error = None;
        self.code = None;
        self.users = None;
        self
    }

    /// The target room, if one was given and is non-zero.
    #[must_use]
    pub fn room(&self) -> Option<RoomId> {
        self.room_id.filter(|id| *id != 0)
    }

    /// Content or the empty string.
    #[must_use]
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_kind_wire_names() {
        let kinds = [
            EnvelopeKind::Text,
            EnvelopeKind::Join,
            EnvelopeKind::Leave,
            EnvelopeKind::Typing,
            EnvelopeKind::System,
            EnvelopeKind::UserList,
            EnvelopeKind::Error,
            EnvelopeKind::Ping,
            EnvelopeKind::Pong,
        ];
        for kind in kinds {
            let value = serde_json::to_value(kind).unwrap();
            assert_eq!(value, Value::String(kind.as_str().to_string()));
        }
        assert_eq!(EnvelopeKind::UserList.to_string(), "userlist");
    }

    #[test]
    fn test_text_envelope_omits_absent_fields() {
        let envelope = Envelope::text(7, "hi");
        let value = serde_json::to_value(&envelope).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object["type"], json!("text"));
        assert_eq!(object["room_id"], json!(7));
        assert_eq!(object["content"], json!("hi"));
        assert!(object.contains_key("timestamp"));
        assert!(!object.contains_key("message_id"));
        assert!(!object.contains_key("error"));
        assert!(!object.contains_key("users"));
    }

    #[test]
    fn test_error_envelope_shape() {
        let value = serde_json::to_value(Envelope::error(codes::FORBIDDEN, "denied")).unwrap();
        assert_eq!(value["type"], json!("error"));
        assert_eq!(value["code"], json!(403));
        assert_eq!(value["error"], json!("denied"));
    }

    #[test]
    fn test_minimal_client_envelope_parses() {
        // Browser clients send only the fields they care about.
        let envelope: Envelope =
            serde_json::from_str(r#"{"type":"join","room_id":3}"#).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::Join);
        assert_eq!(envelope.room(), Some(3));
        assert!(envelope.user_id.is_none());
    }

    #[test]
    fn test_zero_room_is_absent() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"type":"text","room_id":0,"content":"x"}"#).unwrap();
        assert_eq!(envelope.room_id, Some(0));
        assert_eq!(envelope.room(), None);
    }

    #[test]
    fn test_from_sender_overwrites_wire_identity() {
        let forged: Envelope = serde_json::from_str(
            r#"{"type":"text","room_id":1,"user_id":99,"username":"mallory","message_id":5,"content":"x"}"#,
        )
        .unwrap();
        let at = Utc::now();

        let stamped = forged.from_sender(2, "bob", at);

        assert_eq!(stamped.user_id, Some(2));
        assert_eq!(stamped.username.as_deref(), Some("bob"));
        assert_eq!(stamped.timestamp, at);
        assert_eq!(stamped.message_id, None);
        assert_eq!(stamped.content_str(), "x");
    }

    #[test]
    fn test_room_scoped_kinds() {
        assert!(EnvelopeKind::Text.is_room_scoped());
        assert!(EnvelopeKind::Typing.is_room_scoped());
        assert!(!EnvelopeKind::Ping.is_room_scoped());
        assert!(!EnvelopeKind::Error.is_room_scoped());
        assert!(!EnvelopeKind::UserList.is_room_scoped());
    }
}
