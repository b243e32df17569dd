//! The inbound pump.
//!
//! Reads frames off the connection and feeds messages to the hub. The read
//! deadline only moves forward when a pong arrives, so a peer that stops
//! answering pings is dropped even if it keeps sending messages.
//!
//! On exit the reader unregisters and then tells the writer to close the
//! connection, abandoning anything still queued or in flight.

use crate::client::ClientId;
use crate::hub::HubHandle;
use crate::metrics;
use chorus_protocol::{Frame, Message};
use chorus_transport::{ConnectionReader, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

/// Why a reader pump stopped.
#[derive(Debug)]
pub enum ReaderExit {
    /// The peer closed the connection.
    PeerClosed,
    /// No pong arrived within the read deadline.
    Timeout,
    /// The connection failed or the peer broke the protocol.
    Error(TransportError),
    /// The hub stopped accepting messages.
    HubClosed,
}

/// Unregisters the client when dropped, whichever way the pump ends.
struct UnregisterGuard {
    hub: HubHandle,
    id: ClientId,
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        self.hub.unregister(&self.id);
    }
}

pub(crate) async fn run(
    mut reader: Box<dyn ConnectionReader>,
    id: ClientId,
    identity: String,
    hub: HubHandle,
    pong_wait: Duration,
    close: oneshot::Sender<()>,
) -> ReaderExit {
    let guard = UnregisterGuard {
        hub: hub.clone(),
        id: id.clone(),
    };

    let exit = read_loop(reader.as_mut(), &id, &identity, &hub, pong_wait).await;

    let remote = reader.remote_addr();
    match &exit {
        ReaderExit::Error(e) if !e.is_disconnect() => {
            warn!(
                client = %id,
                identity = %identity,
                remote = ?remote,
                error = %e,
                "Reader stopped on error"
            );
        }
        other => {
            debug!(
                client = %id,
                identity = %identity,
                remote = ?remote,
                reason = ?other,
                "Reader stopped"
            );
        }
    }

    // Unregister first, then have the writer close the connection.
    drop(guard);
    // The writer may already be gone.
    let _ = close.send(());
    drop(reader);

    exit
}

async fn read_loop(
    reader: &mut dyn ConnectionReader,
    id: &ClientId,
    identity: &str,
    hub: &HubHandle,
    pong_wait: Duration,
) -> ReaderExit {
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let frame = match timeout_at(deadline, reader.recv()).await {
            Err(_) => return ReaderExit::Timeout,
            Ok(Err(e)) => return ReaderExit::Error(e),
            Ok(Ok(None)) => return ReaderExit::PeerClosed,
            Ok(Ok(Some(frame))) => frame,
        };

        match frame {
            Frame::Message(message) => {
                metrics::record_message("inbound");
                let message = stamp_sender(message, identity);
                trace!(client = %id, "Message received");

                if hub.broadcast(message).await.is_err() {
                    return ReaderExit::HubClosed;
                }
            }
            Frame::Pong(_) => {
                trace!(client = %id, "Pong received");
                deadline = Instant::now() + pong_wait;
            }
            Frame::Ping(_) => {}
        }
    }
}

/// The sender is always the connection's identity, whatever the peer claimed.
fn stamp_sender(message: Arc<Message>, identity: &str) -> Message {
    let message = Arc::try_unwrap(message).unwrap_or_else(|shared| (*shared).clone());
    message.with_sender(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig};
    use chorus_transport::memory;

    #[test]
    fn test_stamp_sender() {
        let claimed = Arc::new(Message::new("hi").with_sender("someone-else"));
        let stamped = stamp_sender(claimed, "alice");
        assert_eq!(stamped.sender(), "alice");
        assert_eq!(stamped.content(), "hi");
    }

    #[tokio::test]
    async fn test_peer_close_unregisters() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (reader, _writer, peer) = memory::pair();
        let (close_tx, close_rx) = oneshot::channel();

        peer.send_close();
        let exit = run(
            Box::new(reader),
            ClientId::generate(),
            "alice".into(),
            hub.clone(),
            Duration::from_secs(5),
            close_tx,
        )
        .await;

        assert!(matches!(exit, ReaderExit::PeerClosed));
        assert!(close_rx.await.is_ok());
        // Nothing was registered, so the unregister is a no-op.
        assert_eq!(hub.stats().await.unwrap().removed, 0);
    }

    #[tokio::test]
    async fn test_hub_gone_ends_reader() {
        let (hub, task) = Hub::spawn(HubConfig::default());
        let (reader, _writer, peer) = memory::pair();
        task.abort();
        let _ = task.await;

        peer.send_text(r#"{"content":"hello?"}"#);
        let exit = run(
            Box::new(reader),
            ClientId::generate(),
            "alice".into(),
            hub,
            Duration::from_secs(5),
            oneshot::channel::<()>().0,
        )
        .await;

        assert!(matches!(exit, ReaderExit::HubClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_do_not_extend_deadline() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (reader, _writer, peer) = memory::pair();
        let started = Instant::now();

        let pump = tokio::spawn(run(
            Box::new(reader),
            ClientId::generate(),
            "alice".into(),
            hub,
            Duration::from_secs(10),
            oneshot::channel::<()>().0,
        ));

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(3)).await;
            assert!(peer.send_text(r#"{"content":"still here"}"#));
        }

        assert!(matches!(pump.await.unwrap(), ReaderExit::Timeout));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    }
}
