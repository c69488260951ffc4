//! # huddle-protocol
//!
//! Wire protocol definitions for the Huddle chat hub.
//!
//! Every realtime event is an [`Envelope`]: a JSON object tagged by `type`.
//!
//! ## Envelope kinds
//!
//! - `text` - Chat message, persisted and fanned out to the room
//! - `join` / `leave` - Room membership requests
//! - `typing` - Typing indicator, fanned out to everyone but the sender
//! - `system` / `userlist` / `error` - Server-originated notices
//! - `ping` / `pong` - Application heartbeat
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, Envelope};
//!
//! let envelope = Envelope::text(7, "hello");
//!
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.content.as_deref(), Some("hello"));
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::{codes, Envelope, EnvelopeKind, MessageId, RoomId, UserId, UserInfo};
