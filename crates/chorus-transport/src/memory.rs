//! In-memory connection pair.
//!
//! [`pair`] returns the two halves the pumps consume plus a [`MemoryPeer`]
//! playing the remote side. Frames cross as [`WireFrame`]s, the same shapes a
//! WebSocket would carry, and message text goes through the real codec.

use async_trait::async_trait;
use bytes::Bytes;
use chorus_protocol::{codec, Frame, Message, MAX_MESSAGE_SIZE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{ConnectionReader, ConnectionWriter, TransportError};

/// A raw frame as it would appear on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    /// Text frame.
    Text(String),
    /// Ping control frame.
    Ping(Bytes),
    /// Pong control frame.
    Pong(Bytes),
    /// Close control frame.
    Close,
}

/// Create a connected in-memory pair with the default message size limit.
#[must_use]
pub fn pair() -> (MemoryReader, MemoryWriter, MemoryPeer) {
    pair_with_limit(MAX_MESSAGE_SIZE)
}

/// Create a connected in-memory pair with a custom message size limit.
#[must_use]
pub fn pair_with_limit(max_message_size: usize) -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let stalled = Arc::new(AtomicBool::new(false));

    let reader = MemoryReader {
        rx: inbound_rx,
        max_message_size,
    };
    let writer = MemoryWriter {
        tx: outbound_tx,
        stalled: Arc::clone(&stalled),
        is_open: true,
    };
    let peer = MemoryPeer {
        tx: Some(inbound_tx),
        rx: outbound_rx,
        stalled,
    };

    (reader, writer, peer)
}

/// Inbound half of an in-memory connection.
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<WireFrame>,
    max_message_size: usize,
}

#[async_trait]
impl ConnectionReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.rx.recv().await {
            Some(WireFrame::Text(text)) => {
                let message = codec::decode_with_limit(text.as_bytes(), self.max_message_size)?;
                Ok(Some(Frame::message(message)))
            }
            Some(WireFrame::Ping(data)) => Ok(Some(Frame::Ping(data))),
            Some(WireFrame::Pong(data)) => Ok(Some(Frame::Pong(data))),
            Some(WireFrame::Close) | None => Ok(None),
        }
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Outbound half of an in-memory connection.
pub struct MemoryWriter {
    tx: mpsc::UnboundedSender<WireFrame>,
    stalled: Arc<AtomicBool>,
    is_open: bool,
}

#[async_trait]
impl ConnectionWriter for MemoryWriter {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        if self.stalled.load(Ordering::SeqCst) {
            // Simulates a peer that stopped reading and a full socket buffer.
            std::future::pending::<()>().await;
        }

        let wire = match frame {
            Frame::Message(message) => WireFrame::Text(codec::encode(&message)?),
            Frame::Ping(data) => WireFrame::Ping(data),
            Frame::Pong(data) => WireFrame::Pong(data),
        };

        self.tx
            .send(wire)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;
        // The peer may already be gone; closing is still a success.
        let _ = self.tx.send(WireFrame::Close);
        Ok(())
    }
}

/// The remote end of an in-memory connection.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<WireFrame>>,
    rx: mpsc::UnboundedReceiver<WireFrame>,
    stalled: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Send a raw text frame.
    ///
    /// Returns `false` if the reader half is gone or the peer disconnected.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(WireFrame::Text(text.into()))
    }

    /// Encode and send a message.
    pub fn send_message(&self, message: &Message) -> bool {
        match codec::encode(message) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// Answer a ping.
    pub fn send_pong(&self, payload: impl Into<Bytes>) -> bool {
        self.send(WireFrame::Pong(payload.into()))
    }

    /// Send a close frame.
    pub fn send_close(&self) -> bool {
        self.send(WireFrame::Close)
    }

    /// Drop the inbound direction, as if the peer's socket went away.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }

    /// Make every subsequent write on the server side hang.
    pub fn stall_writes(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Receive the next frame written by the server.
    ///
    /// Returns `None` once the writer half has been dropped.
    pub async fn recv(&mut self) -> Option<WireFrame> {
        self.rx.recv().await
    }

    /// Receive the next application message, skipping control frames.
    ///
    /// Returns `None` on close or when the writer half is gone.
    pub async fn recv_message(&mut self) -> Option<Message> {
        loop {
            match self.rx.recv().await? {
                WireFrame::Text(text) => return codec::decode(text.as_bytes()).ok(),
                WireFrame::Close => return None,
                WireFrame::Ping(_) | WireFrame::Pong(_) => {}
            }
        }
    }

    /// Take a frame if one is already waiting.
    pub fn try_recv(&mut self) -> Option<WireFrame> {
        self.rx.try_recv().ok()
    }

    fn send(&self, frame: WireFrame) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }
}
