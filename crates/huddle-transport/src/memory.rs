//! In-memory transport.
//!
//! A connection made of two channels, with a [`MemoryPeer`] standing in for
//! the remote end. Used to drive the client pumps without a socket.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{FrameReader, FrameWriter, Inbound, TransportError};

/// What the server side wrote to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Data(Bytes),
    Ping,
    Close,
}

/// Create a connected (reader, writer, peer) triple.
#[must_use]
pub fn pair(capacity: usize) -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    (
        MemoryReader { rx: in_rx },
        MemoryWriter { tx: out_tx },
        MemoryPeer {
            tx: Some(in_tx),
            rx: out_rx,
        },
    )
}

/// Reading half of an in-memory connection.
pub struct MemoryReader {
    rx: mpsc::Receiver<Inbound>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// Writing half of an in-memory connection.
pub struct MemoryWriter {
    tx: mpsc::Sender<Outbound>,
}

impl MemoryWriter {
    async fn push(&self, item: Outbound) -> Result<(), TransportError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.push(Outbound::Data(data)).await
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.push(Outbound::Ping).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.push(Outbound::Close).await
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// The remote end of an in-memory connection.
pub struct MemoryPeer {
    tx: Option<mpsc::Sender<Inbound>>,
    rx: mpsc::Receiver<Outbound>,
}

impl MemoryPeer {
    /// Deliver a text frame to the reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is gone or the peer has hung up.
    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.deliver(Inbound::Data(Bytes::copy_from_slice(text.as_bytes())))
            .await
    }

    /// Deliver a control frame to the reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is gone or the peer has hung up.
    pub async fn send_heartbeat(&self) -> Result<(), TransportError> {
        self.deliver(Inbound::Heartbeat).await
    }

    async fn deliver(&self, item: Inbound) -> Result<(), TransportError> {
        match &self.tx {
            Some(tx) => tx
                .send(item)
                .await
                .map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    /// Hang up: the reader sees a clean end of stream.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Next thing the writer produced, or `None` once the writer is dropped.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Next data frame, skipping pings. `None` on close or writer drop.
    pub async fn recv_data(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await? {
                Outbound::Data(data) => return Some(data),
                Outbound::Ping => continue,
                Outbound::Close => return None,
            }
        }
    }
}
