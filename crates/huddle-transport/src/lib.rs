//! # huddle-transport
//!
//! Transport abstraction layer for the Huddle chat hub.
//!
//! A connection is handed to the core as two halves:
//!
//! - [`FrameReader`] - yields inbound data frames and heartbeats
//! - [`FrameWriter`] - sends pre-encoded frames and keepalive probes
//!
//! Implementations:
//!
//! - **WebSocket** - axum upgraded sockets (feature `websocket`, default)
//! - **Memory** - channel-backed pair for tests and local tooling
//!
//! ```rust,ignore
//! use huddle_transport::{FrameReader, Inbound};
//!
//! async fn drain(mut reader: impl FrameReader) {
//!     while let Ok(Some(Inbound::Data(frame))) = reader.recv().await {
//!         // Decode frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{FrameReader, FrameWriter, Inbound, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WsReader, WsWriter};
