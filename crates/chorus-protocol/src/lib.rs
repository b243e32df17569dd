//! # chorus-protocol
//!
//! Wire protocol definitions for the Chorus broadcast hub.
//!
//! Chorus speaks a deliberately small protocol: every application frame is a
//! JSON text frame carrying one [`Message`], and liveness is handled with the
//! transport's ping/pong control frames.
//!
//! ## Example
//!
//! ```rust
//! use chorus_protocol::{codec, Message};
//!
//! let message = Message::new("hello").with_sender("alice");
//!
//! let encoded = codec::encode(&message).unwrap();
//! let decoded = codec::decode(encoded.as_bytes()).unwrap();
//! assert_eq!(decoded, message);
//! ```

pub mod codec;
pub mod frames;
pub mod message;

pub use codec::{decode, encode, ProtocolError, MAX_MESSAGE_SIZE};
pub use frames::{Frame, PING_PAYLOAD};
pub use message::Message;
