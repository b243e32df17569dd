//! The outbound pump.
//!
//! The only task allowed to write to a connection. It drains the client's
//! queue and sends a keepalive ping every interval, bounding each write with
//! the same timeout. A close request from the reader preempts everything,
//! including a write that is still in flight.

use crate::client::ClientId;
use crate::metrics;
use chorus_protocol::{Frame, Message};
use chorus_transport::{ConnectionWriter, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Shortest ping interval the writer accepts; `tokio` intervals panic on zero.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Why a writer pump stopped.
#[derive(Debug)]
pub enum WriterExit {
    /// The reader stopped and asked for the connection to be closed.
    ReaderClosed,
    /// The hub unregistered the client and closed its queue.
    QueueClosed,
    /// A write did not complete within the write timeout.
    Timeout,
    /// The connection failed.
    Error(TransportError),
}

pub(crate) async fn run(
    mut writer: Box<dyn ConnectionWriter>,
    id: ClientId,
    mut queue: mpsc::Receiver<Arc<Message>>,
    mut close: oneshot::Receiver<()>,
    ping_interval: Duration,
    write_timeout: Duration,
) -> WriterExit {
    let ping_interval = ping_interval.max(MIN_PING_INTERVAL);
    // First ping one full interval after start.
    let mut ticker = interval_at(Instant::now() + ping_interval, ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        let frame = tokio::select! {
            biased;

            // Sent or dropped, either way the reader is done.
            _ = &mut close => break WriterExit::ReaderClosed,
            message = queue.recv() => match message {
                Some(message) => Frame::Message(message),
                None => break WriterExit::QueueClosed,
            },
            _ = ticker.tick() => {
                trace!(client = %id, "Sending ping");
                Frame::ping()
            }
        };

        let is_message = matches!(frame, Frame::Message(_));
        let written = tokio::select! {
            biased;

            _ = &mut close => Err(WriterExit::ReaderClosed),
            result = write(writer.as_mut(), frame, write_timeout) => result,
        };
        if let Err(exit) = written {
            break exit;
        }
        if is_message {
            metrics::record_message("outbound");
        }
    };

    match &exit {
        WriterExit::ReaderClosed => debug!(client = %id, "Writer stopped, reader closed"),
        WriterExit::QueueClosed => debug!(client = %id, "Writer stopped, queue closed"),
        WriterExit::Timeout => warn!(client = %id, "Writer stopped, write timed out"),
        WriterExit::Error(e) => warn!(client = %id, error = %e, "Writer stopped on error"),
    }

    match timeout(write_timeout, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(client = %id, error = %e, "Close failed"),
        Err(_) => debug!(client = %id, "Close timed out"),
    }

    exit
}

async fn write(
    writer: &mut dyn ConnectionWriter,
    frame: Frame,
    write_timeout: Duration,
) -> Result<(), WriterExit> {
    match timeout(write_timeout, writer.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(WriterExit::Error(e)),
        Err(_) => Err(WriterExit::Timeout),
    }
}
