//! Transport abstraction traits for Chorus.
//!
//! These traits define the two halves of a connection the pumps consume,
//! allowing the hub to be transport-agnostic.

use async_trait::async_trait;
use chorus_protocol::Frame;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] chorus_protocol::ProtocolError),
}

impl TransportError {
    /// Whether the error only reports that the peer went away.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::ConnectionClosed)
    }
}

/// The inbound half of a connection.
///
/// Implementations decode application frames into [`Frame::Message`] and
/// surface pings and pongs so the reader can track liveness. Deadlines are
/// applied by the caller.
#[async_trait]
pub trait ConnectionReader: Send {
    /// Receive the next frame from the connection.
    ///
    /// Returns `None` if the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// The outbound half of a connection.
///
/// Connections are not safe for concurrent writes; exactly one task owns the
/// writer at any time.
#[async_trait]
pub trait ConnectionWriter: Send {
    /// Send a frame to the connection.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    ///
    /// Closing an already closed connection is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;
}
