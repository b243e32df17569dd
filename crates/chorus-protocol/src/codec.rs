//! Codec for encoding and decoding Chorus messages.
//!
//! Messages travel as JSON text frames. Decoding enforces the application
//! size limit before any parsing happens.

use thiserror::Error;

use crate::message::Message;

/// Maximum size of an inbound application message in bytes.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds the size limit.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge {
        /// Size of the offending payload.
        size: usize,
        /// Limit in force.
        max: usize,
    },

    /// Payload is not a valid message.
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Encode a message as a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(message: &Message) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

/// Decode a message, enforcing [`MAX_MESSAGE_SIZE`].
///
/// # Errors
///
/// Returns an error if the payload is too large or not a valid message.
pub fn decode(data: &[u8]) -> Result<Message, ProtocolError> {
    decode_with_limit(data, MAX_MESSAGE_SIZE)
}

/// Decode a message with a custom size limit.
///
/// # Errors
///
/// Returns an error if the payload is too large or not a valid message.
pub fn decode_with_limit(data: &[u8], max: usize) -> Result<Message, ProtocolError> {
    if data.len() > max {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            max,
        });
    }

    serde_json::from_slice(data).map_err(ProtocolError::Malformed)
}
