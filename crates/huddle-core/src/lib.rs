//! # huddle-core
//!
//! The connection hub of the Huddle chat backend.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Hub** - Single owner of the client registry and room membership
//! - **Room** - Member set of one room, the unit of broadcast
//! - **Client** - Per-connection handle with a bounded outbound queue
//! - **Pump** - Reader/writer tasks bridging a transport and the hub
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  HubEvent   ┌─────────────┐  can_join   ┌───────────────┐
//! │ Read pump   │────────────▶│    Hub      │────────────▶│ RoomAuthority │
//! └─────────────┘             └─────────────┘◀────────────└───────────────┘
//!                                    │        JoinResolved
//!                                    │ try_send
//!                                    ▼
//! ┌─────────────┐   Outbox    ┌─────────────┐
//! │ Write pump  │◀────────────│ ClientHandle│
//! └─────────────┘             └─────────────┘
//! ```

pub mod client;
pub mod collaborators;
pub mod event;
pub mod hub;
pub mod memory;
pub mod pump;
pub mod room;

pub use client::{ClientHandle, ClientId, ClientIdentity, EnqueueError, Outbox};
pub use collaborators::{Authenticator, CollaboratorError, MessageStore, RoomAuthority};
pub use event::HubEvent;
pub use hub::{Hub, HubConfig, HubError, HubHandle, HubStats};
pub use memory::{InMemoryMessageStore, RoomDirectory, RoomPolicy, StoredMessage};
pub use pump::{run_client, PumpConfig};
pub use room::Room;
