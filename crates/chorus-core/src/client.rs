//! Per-connection client state.
//!
//! A [`Client`] bundles an identity, the two halves of its connection and a
//! bounded outbound queue. [`Client::start`] registers it with the hub and
//! spawns its two pumps.

use crate::hub::{HubClosed, HubHandle};
use crate::reader::{self, ReaderExit};
use crate::writer::{self, WriterExit};
use chorus_protocol::Message;
use chorus_transport::{ConnectionReader, ConnectionWriter};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Default capacity of a client's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 2;

/// Default interval between keepalive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);

/// Default slack added to the ping interval to form the read deadline.
pub const DEFAULT_PONG_GRACE: Duration = Duration::from_secs(10);

/// Default bound on a single outbound write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connected client.
///
/// Identities are chosen by users and may collide; ids never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh, process-unique client ID.
    #[must_use]
    pub fn generate() -> Self {
        let n = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        Self(format!("client_{:x}", n))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client timing and queue settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Interval between keepalive pings. The writer raises zero to 1ms.
    pub ping_interval: Duration,
    /// Slack on top of `ping_interval` before a silent peer is dropped.
    pub pong_grace: Duration,
    /// Bound on any single write, message or ping.
    pub write_timeout: Duration,
    /// Capacity of the outbound queue.
    pub queue_capacity: usize,
}

impl ClientConfig {
    /// How long the reader waits for a pong before giving up on the peer.
    ///
    /// Always longer than the ping interval as long as the grace is non-zero.
    #[must_use]
    pub fn pong_wait(&self) -> Duration {
        self.ping_interval + self.pong_grace
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_grace: DEFAULT_PONG_GRACE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// What the hub keeps for each registered client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub(crate) id: ClientId,
    pub(crate) identity: String,
    pub(crate) queue: mpsc::Sender<Arc<Message>>,
}

impl ClientHandle {
    /// Create a handle around an outbound queue sender.
    #[must_use]
    pub fn new(
        id: ClientId,
        identity: impl Into<String>,
        queue: mpsc::Sender<Arc<Message>>,
    ) -> Self {
        Self {
            id,
            identity: identity.into(),
            queue,
        }
    }
}

/// A freshly accepted client that has not started yet.
pub struct Client {
    id: ClientId,
    identity: String,
    reader: Box<dyn ConnectionReader>,
    writer: Box<dyn ConnectionWriter>,
    queue_tx: mpsc::Sender<Arc<Message>>,
    queue_rx: mpsc::Receiver<Arc<Message>>,
    hub: HubHandle,
    config: ClientConfig,
}

impl Client {
    /// Create a client over an established connection.
    #[must_use]
    pub fn new(
        identity: impl Into<String>,
        reader: Box<dyn ConnectionReader>,
        writer: Box<dyn ConnectionWriter>,
        hub: HubHandle,
        config: ClientConfig,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));

        Self {
            id: ClientId::generate(),
            identity: identity.into(),
            reader,
            writer,
            queue_tx,
            queue_rx,
            hub,
            config,
        }
    }

    /// Client identifier.
    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Identity the client connected with.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Register with the hub, then spawn the reader and writer pumps.
    ///
    /// Registration completes before either pump exists, so the reader's
    /// eventual unregister can never overtake it. When the reader stops it
    /// signals the writer, which closes the connection straight away.
    ///
    /// # Errors
    ///
    /// Returns [`HubClosed`] if the hub has stopped; no pump is started.
    pub async fn start(self) -> Result<ClientTasks, HubClosed> {
        let Client {
            id,
            identity,
            reader,
            writer,
            queue_tx,
            queue_rx,
            hub,
            config,
        } = self;

        // The hub becomes the only holder of the queue sender.
        hub.register(ClientHandle::new(id.clone(), identity.clone(), queue_tx))
            .await?;

        let (close_tx, close_rx) = oneshot::channel();
        let writer = tokio::spawn(writer::run(
            writer,
            id.clone(),
            queue_rx,
            close_rx,
            config.ping_interval,
            config.write_timeout,
        ));
        let reader = tokio::spawn(reader::run(
            reader,
            id.clone(),
            identity,
            hub,
            config.pong_wait(),
            close_tx,
        ));

        debug!(client = %id, "Client pumps started");

        Ok(ClientTasks { reader, writer })
    }
}

/// The running pumps of a started client.
pub struct ClientTasks {
    reader: JoinHandle<ReaderExit>,
    writer: JoinHandle<WriterExit>,
}

impl ClientTasks {
    /// Wait for both pumps to finish.
    ///
    /// A pump that panicked reports `None`.
    pub async fn join(self) -> (Option<ReaderExit>, Option<WriterExit>) {
        let (reader, writer) = tokio::join!(self.reader, self.writer);
        (reader.ok(), writer.ok())
    }
}
