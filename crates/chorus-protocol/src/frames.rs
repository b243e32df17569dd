//! Frame types exchanged over a connection.
//!
//! A [`Frame`] is what the pumps see after the transport has done its work:
//! application messages are already decoded and control frames are kept
//! distinct so the reader can refresh its liveness deadline on pongs.

use crate::message::Message;
use bytes::Bytes;
use std::sync::Arc;

/// Payload carried by every keepalive ping the server sends.
pub const PING_PAYLOAD: &[u8] = b"Ping";

/// A protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// An application message. Shared so one broadcast can be queued for
    /// many clients without copying the text.
    Message(Arc<Message>),
    /// Keepalive ping control frame.
    Ping(Bytes),
    /// Keepalive pong control frame.
    Pong(Bytes),
}

impl Frame {
    /// Create a message frame.
    #[must_use]
    pub fn message(message: impl Into<Arc<Message>>) -> Self {
        Frame::Message(message.into())
    }

    /// Create the server's keepalive ping.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping(Bytes::from_static(PING_PAYLOAD))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_carries_fixed_payload() {
        assert_eq!(Frame::ping(), Frame::Ping(Bytes::from_static(b"Ping")));
    }

    #[test]
    fn test_message_frame_shares_message() {
        let message = Arc::new(Message::new("hi"));
        let frame = Frame::message(Arc::clone(&message));
        match frame {
            Frame::Message(inner) => assert!(Arc::ptr_eq(&inner, &message)),
            other => panic!("Expected message frame, got {:?}", other),
        }
    }
}
