//! # chorus-transport
//!
//! Connection abstraction for the Chorus broadcast hub.
//!
//! A connection is consumed as two halves so that each pump owns exactly one
//! direction:
//!
//! - [`ConnectionReader`] - inbound frames, owned by the reader pump
//! - [`ConnectionWriter`] - outbound frames, owned by the writer pump, which
//!   makes it the only task that ever writes to the connection
//!
//! Two implementations ship with the crate:
//!
//! - **WebSocket** - an adapter over an upgraded axum `WebSocket`
//! - **Memory** - a channel-backed pair used to drive the pumps in tests
//!
//! ```rust,ignore
//! use chorus_transport::{ConnectionReader, Frame};
//!
//! async fn drain(mut reader: Box<dyn ConnectionReader>) {
//!     while let Ok(Some(frame)) = reader.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use chorus_protocol::Frame;
pub use traits::{ConnectionReader, ConnectionWriter, TransportError};
