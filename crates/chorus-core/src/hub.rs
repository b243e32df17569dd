//! The broadcast hub.
//!
//! The hub owns the registry of connected clients and is the only code that
//! ever reads or mutates it. Everything else talks to the hub through a
//! [`HubHandle`], whose calls become events on the hub's intakes. The event
//! loop handles one event at a time, so registry changes and fan-out
//! decisions are totally ordered without any lock.

use crate::client::{ClientHandle, ClientId};
use crate::metrics;
use chorus_protocol::Message;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Default capacity of the register, broadcast and query intakes.
pub const DEFAULT_INTAKE_CAPACITY: usize = 256;

/// Returned when the hub's event loop is no longer running.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Hub is no longer running")]
pub struct HubClosed;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the bounded intakes.
    pub intake_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
        }
    }
}

/// Hub statistics, as seen by the event loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Number of registered clients.
    pub clients: usize,
    /// Messages fanned out since start.
    pub broadcasts: u64,
    /// Copies successfully queued for a client.
    pub deliveries: u64,
    /// Copies dropped because the client's queue was full or closed.
    pub dropped: u64,
    /// Clients actually removed from the registry.
    pub removed: u64,
}

/// A registered client as reported by [`HubHandle::clients`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSummary {
    /// Client identifier.
    pub id: ClientId,
    /// Identity the client connected with.
    pub identity: String,
}

/// Read-only questions answered by the event loop.
enum Query {
    Stats(oneshot::Sender<HubStats>),
    Clients(oneshot::Sender<Vec<ClientSummary>>),
}

/// Cloneable front door to a running [`Hub`].
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<ClientHandle>,
    unregister_tx: mpsc::UnboundedSender<ClientId>,
    broadcast_tx: mpsc::Sender<Message>,
    query_tx: mpsc::Sender<Query>,
}

impl HubHandle {
    /// Register a client.
    ///
    /// Once this returns, any later [`unregister`](Self::unregister) for the
    /// same client is processed after the registration.
    ///
    /// # Errors
    ///
    /// Returns [`HubClosed`] if the hub has stopped.
    pub async fn register(&self, client: ClientHandle) -> Result<(), HubClosed> {
        self.register_tx.send(client).await.map_err(|_| HubClosed)
    }

    /// Unregister a client.
    ///
    /// Never blocks, so it is safe to call from `Drop`. Unregistering a client
    /// that is not registered is a no-op.
    pub fn unregister(&self, id: &ClientId) {
        if self.unregister_tx.send(id.clone()).is_err() {
            debug!(client = %id, "Hub stopped, unregister ignored");
        }
    }

    /// Submit a message for fan-out to every registered client.
    ///
    /// # Errors
    ///
    /// Returns [`HubClosed`] if the hub has stopped.
    pub async fn broadcast(&self, message: Message) -> Result<(), HubClosed> {
        self.broadcast_tx.send(message).await.map_err(|_| HubClosed)
    }

    /// Get a statistics snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`HubClosed`] if the hub has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubClosed> {
        let (tx, rx) = oneshot::channel();
        self.query_tx
            .send(Query::Stats(tx))
            .await
            .map_err(|_| HubClosed)?;
        rx.await.map_err(|_| HubClosed)
    }

    /// List the registered clients.
    ///
    /// # Errors
    ///
    /// Returns [`HubClosed`] if the hub has stopped.
    pub async fn clients(&self) -> Result<Vec<ClientSummary>, HubClosed> {
        let (tx, rx) = oneshot::channel();
        self.query_tx
            .send(Query::Clients(tx))
            .await
            .map_err(|_| HubClosed)?;
        rx.await.map_err(|_| HubClosed)
    }
}

/// The hub event loop and the registry it owns.
pub struct Hub {
    clients: HashMap<ClientId, ClientHandle>,
    register_rx: mpsc::Receiver<ClientHandle>,
    unregister_rx: mpsc::UnboundedReceiver<ClientId>,
    broadcast_rx: mpsc::Receiver<Message>,
    query_rx: mpsc::Receiver<Query>,
    stats: HubStats,
}

impl Hub {
    /// Create a hub with custom configuration.
    ///
    /// The hub does nothing until [`run`](Self::run) is awaited.
    #[must_use]
    pub fn with_config(config: HubConfig) -> (Self, HubHandle) {
        let capacity = config.intake_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (query_tx, query_rx) = mpsc::channel(capacity);

        let hub = Self {
            clients: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            query_rx,
            stats: HubStats::default(),
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            query_tx,
        };

        (hub, handle)
    }

    /// Create a hub and run it on a new task.
    #[must_use]
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::with_config(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Run the event loop until every [`HubHandle`] is dropped.
    ///
    /// Intakes are polled in priority order: register, unregister, broadcast,
    /// query. A registration therefore always lands before an unregister that
    /// was submitted after it, even though they travel on different intakes.
    pub async fn run(mut self) {
        info!("Hub started");

        loop {
            tokio::select! {
                biased;

                Some(client) = self.register_rx.recv() => self.register(client),
                Some(id) = self.unregister_rx.recv() => self.unregister(&id),
                Some(message) = self.broadcast_rx.recv() => self.broadcast(message),
                Some(query) = self.query_rx.recv() => self.answer(query),
                else => break,
            }
        }

        // Dropping the registry closes every remaining outbound queue.
        let remaining = self.clients.len();
        self.clients.clear();
        metrics::set_registered_clients(0);
        info!(remaining, "Hub stopped");
    }

    fn register(&mut self, client: ClientHandle) {
        if self.clients.contains_key(&client.id) {
            debug!(client = %client.id, "Client already registered");
            return;
        }

        debug!(
            client = %client.id,
            identity = %client.identity,
            total = self.clients.len() + 1,
            "Client registered"
        );
        self.clients.insert(client.id.clone(), client);
        metrics::set_registered_clients(self.clients.len());
    }

    fn unregister(&mut self, id: &ClientId) {
        // Dropping the handle drops the queue sender, which ends the writer.
        if let Some(client) = self.clients.remove(id) {
            self.stats.removed += 1;
            debug!(
                client = %id,
                identity = %client.identity,
                total = self.clients.len(),
                "Client unregistered"
            );
            metrics::set_registered_clients(self.clients.len());
        } else {
            trace!(client = %id, "Unregister for unknown client");
        }
    }

    fn broadcast(&mut self, message: Message) {
        let message = Arc::new(message);
        let mut delivered = 0u64;
        let mut dropped = 0u64;

        for (id, client) in &self.clients {
            match client.queue.try_send(Arc::clone(&message)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    warn!(
                        client = %id,
                        identity = %client.identity,
                        "Outbound queue full, message dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    // Writer already exited; the reader will unregister.
                    dropped += 1;
                    debug!(client = %id, "Outbound queue closed, message dropped");
                }
            }
        }

        self.stats.broadcasts += 1;
        self.stats.deliveries += delivered;
        self.stats.dropped += dropped;
        metrics::record_message("broadcast");
        metrics::record_dropped(dropped);

        trace!(
            sender = %message.sender(),
            recipients = delivered,
            dropped,
            "Broadcast message"
        );
    }

    fn answer(&self, query: Query) {
        // The asker may have given up; that is not our problem.
        match query {
            Query::Stats(reply) => {
                let _ = reply.send(HubStats {
                    clients: self.clients.len(),
                    ..self.stats.clone()
                });
            }
            Query::Clients(reply) => {
                let _ = reply.send(
                    self.clients
                        .values()
                        .map(|c| ClientSummary {
                            id: c.id.clone(),
                            identity: c.identity.clone(),
                        })
                        .collect(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::sync::mpsc::error::TryRecvError;

    fn test_client(
        identity: &str,
        capacity: usize,
    ) -> (ClientHandle, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientHandle::new(ClientId::generate(), identity, tx), rx)
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (alice, _rx) = test_client("alice", 2);
        let id = alice.id.clone();

        hub.register(alice).await.unwrap();
        assert_eq!(hub.stats().await.unwrap().clients, 1);

        hub.unregister(&id);
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.clients, 0);
        assert_eq!(stats.removed, 1);
    }

    #[tokio::test]
    async fn test_register_twice_keeps_one_entry() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (alice, _rx) = test_client("alice", 2);

        hub.register(alice.clone()).await.unwrap();
        hub.register(alice).await.unwrap();

        assert_eq!(hub.clients().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_double_unregister_is_noop() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (alice, mut rx) = test_client("alice", 2);
        let (bob, _bob_rx) = test_client("bob", 2);
        let id = alice.id.clone();

        hub.register(alice).await.unwrap();
        hub.register(bob).await.unwrap();

        hub.unregister(&id);
        hub.unregister(&id);
        hub.unregister(&ClientId::generate());

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.clients, 1);
        assert_eq!(stats.removed, 1);

        // Removal closed alice's queue.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_client() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let mut receivers = Vec::new();
        for name in ["a", "b", "c"] {
            let (client, rx) = test_client(name, 2);
            hub.register(client).await.unwrap();
            receivers.push(rx);
        }

        hub.broadcast(Message::new("hi").with_sender("a"))
            .await
            .unwrap();
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.deliveries, 3);

        for rx in &mut receivers {
            let msg = rx.try_recv().unwrap();
            assert_eq!(msg.sender(), "a");
            assert_eq!(msg.content(), "hi");
        }
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_others() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (slow, mut slow_rx) = test_client("slow", 2);
        let (b, mut b_rx) = test_client("b", 2);
        let (c, mut c_rx) = test_client("c", 2);

        // Fill the slow client's queue before registering it.
        slow.queue.try_send(Arc::new(Message::new("old-1"))).unwrap();
        slow.queue.try_send(Arc::new(Message::new("old-2"))).unwrap();

        hub.register(slow).await.unwrap();
        hub.register(b).await.unwrap();
        hub.register(c).await.unwrap();

        hub.broadcast(Message::new("fresh")).await.unwrap();
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.deliveries, 2);
        assert_eq!(stats.dropped, 1);

        assert_eq!(b_rx.try_recv().unwrap().content(), "fresh");
        assert_eq!(c_rx.try_recv().unwrap().content(), "fresh");

        assert_eq!(slow_rx.try_recv().unwrap().content(), "old-1");
        assert_eq!(slow_rx.try_recv().unwrap().content(), "old-2");
        assert_eq!(slow_rx.try_recv().unwrap_err(), TryRecvError::Empty);

        // The slow client stays registered.
        assert_eq!(stats.clients, 3);
    }

    #[tokio::test]
    async fn test_broadcast_after_unregister_skips_client() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (alice, mut alice_rx) = test_client("alice", 2);
        let (bob, mut bob_rx) = test_client("bob", 2);
        let alice_id = alice.id.clone();

        hub.register(alice).await.unwrap();
        hub.register(bob).await.unwrap();
        hub.unregister(&alice_id);
        hub.broadcast(Message::new("later")).await.unwrap();
        hub.stats().await.unwrap();

        assert!(alice_rx.recv().await.is_none());
        assert_eq!(bob_rx.try_recv().unwrap().content(), "later");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_unregister() {
        let (hub, _task) = Hub::spawn(HubConfig { intake_capacity: 8 });
        let mut tasks = Vec::new();

        for i in 0..200 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let (client, rx) = test_client(&format!("client-{i}"), 2);
                let id = client.id.clone();
                hub.register(client).await.unwrap();
                if i % 3 == 0 {
                    hub.unregister(&id);
                    if i % 2 == 0 {
                        hub.unregister(&id);
                    }
                }
                // Unknown ids must not disturb anything.
                hub.unregister(&ClientId::generate());
                (id, i % 3 != 0, rx)
            }));
        }

        let mut expected = HashSet::new();
        let mut receivers = Vec::new();
        for task in tasks {
            let (id, kept, rx) = task.await.unwrap();
            if kept {
                expected.insert(id);
            }
            receivers.push(rx);
        }

        let registered: HashSet<ClientId> = hub
            .clients()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(registered, expected);
        assert_eq!(hub.stats().await.unwrap().removed, 67);
    }

    #[tokio::test]
    async fn test_hub_stops_when_handles_dropped() {
        let (hub, task) = Hub::spawn(HubConfig::default());
        let (alice, mut rx) = test_client("alice", 2);
        hub.register(alice).await.unwrap();

        drop(hub);
        task.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
