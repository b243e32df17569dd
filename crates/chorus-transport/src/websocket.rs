//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] into a reader/writer pair. Messages
//! travel as JSON text frames; binary frames carrying the same JSON are
//! accepted on input.

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use chorus_protocol::{codec, Frame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, trace};

use crate::traits::{ConnectionReader, ConnectionWriter, TransportError};

/// Split an upgraded WebSocket into its reader and writer halves.
///
/// `max_message_size` is enforced again while decoding, independently of any
/// limit configured on the upgrade itself.
#[must_use]
pub fn split(
    socket: WebSocket,
    max_message_size: usize,
    remote_addr: Option<SocketAddr>,
) -> (WebSocketReader, WebSocketWriter) {
    let (sink, stream) = socket.split();

    let reader = WebSocketReader {
        stream,
        max_message_size,
        remote_addr,
    };
    let writer = WebSocketWriter {
        sink,
        is_open: true,
    };

    (reader, writer)
}

/// The inbound half of a WebSocket connection.
pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
    remote_addr: Option<SocketAddr>,
}

impl WebSocketReader {
    fn decode(&self, data: &[u8]) -> Result<Frame, TransportError> {
        let message = codec::decode_with_limit(data, self.max_message_size)?;
        Ok(Frame::message(message))
    }
}

#[async_trait]
impl ConnectionReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.stream.next().await {
            Some(Ok(WsMessage::Text(text))) => self.decode(text.as_bytes()).map(Some),
            Some(Ok(WsMessage::Binary(data))) => self.decode(&data).map(Some),
            Some(Ok(WsMessage::Ping(data))) => {
                // axum queues the pong reply itself
                trace!("Received ping");
                Ok(Some(Frame::Ping(Bytes::from(data))))
            }
            Some(Ok(WsMessage::Pong(data))) => Ok(Some(Frame::Pong(Bytes::from(data)))),
            Some(Ok(WsMessage::Close(frame))) => {
                debug!(
                    code = ?frame.as_ref().map(|f| f.code),
                    reason = ?frame.as_ref().map(|f| f.reason.as_ref()),
                    "Received close frame"
                );
                Ok(None)
            }
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// The outbound half of a WebSocket connection.
pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, WsMessage>,
    is_open: bool,
}

#[async_trait]
impl ConnectionWriter for WebSocketWriter {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match frame {
            Frame::Message(message) => WsMessage::Text(codec::encode(&message)?),
            Frame::Ping(payload) => WsMessage::Ping(payload.to_vec()),
            Frame::Pong(payload) => WsMessage::Pong(payload.to_vec()),
        };

        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(()); // Already closed
        }
        self.is_open = false;

        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}
