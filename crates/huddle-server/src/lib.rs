//! HTTP and WebSocket front end for the huddle chat hub.
//!
//! The binary in `main.rs` wires these modules together; they are exposed as
//! a library so integration tests can run the server in-process.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
