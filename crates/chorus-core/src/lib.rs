//! # chorus-core
//!
//! The broadcast hub and per-connection machinery for Chorus.
//!
//! - **Hub** - single-owner registry of clients and the fan-out engine
//! - **Client** - identity, connection halves and a bounded outbound queue
//! - **Reader** - inbound pump: messages to the hub, pongs refresh liveness
//! - **Writer** - outbound pump: the connection's only writer, with keepalive pings
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  broadcast   ┌─────────────┐  try_send   ┌─────────────┐
//! │   Reader    │─────────────▶│     Hub     │────────────▶│    Queue    │
//! └─────────────┘  unregister  └─────────────┘             └─────────────┘
//!        ▲                                                        │
//!        │ frames                                                 ▼
//! ┌─────────────┐            messages + pings              ┌─────────────┐
//! │    Peer     │◀─────────────────────────────────────────│   Writer    │
//! └─────────────┘                                          └─────────────┘
//! ```
//!
//! The hub is an actor: one task owns the registry and every change to it
//! arrives as an event, so no lock guards it. A full client queue drops the
//! message for that client only, so one slow peer never stalls the others.
//! When the reader stops it signals the writer, which closes the connection
//! without waiting on queued or stalled writes.

pub mod client;
pub mod hub;
pub mod metrics;
pub mod reader;
pub mod writer;

pub use chorus_protocol::Message;
pub use client::{Client, ClientConfig, ClientHandle, ClientId, ClientTasks};
pub use hub::{ClientSummary, Hub, HubClosed, HubConfig, HubHandle, HubStats};
pub use reader::ReaderExit;
pub use writer::WriterExit;
