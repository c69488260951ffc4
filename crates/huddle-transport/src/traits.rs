//! Transport abstraction traits for Huddle.
//!
//! A connection is split into a reading half and a writing half so the reader
//! and writer pumps can run as independent tasks.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Something received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One complete application frame.
    Data(Bytes),
    /// A transport-level control frame (ping/pong). Carries no payload for
    /// the application but proves the peer is alive.
    Heartbeat,
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation did not complete in time.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] huddle_protocol::ProtocolError),
}

/// The reading half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next frame from the peer.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;
}

/// The writing half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one pre-encoded frame.
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Send a keepalive probe.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::ProtocolError;

    #[test]
    fn test_protocol_error_converts() {
        let err: TransportError = ProtocolError::FrameTooLarge(10).into();
        assert!(matches!(err, TransportError::Protocol(_)));
        assert!(err.to_string().starts_with("Protocol error"));
    }
}
