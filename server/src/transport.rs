//! Transport seam between a [`Session`](crate::session::Session) and the socket.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use thiserror::Error;

use crate::protocol::{InboundFrame, OutboundFrame};

#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Write half of a client connection. Implementations are not expected to
/// tolerate concurrent writers; the session serializes access.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

pub struct WsSink {
    inner: SplitSink<WebSocket, Message>,
}

impl WsSink {
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        let message = match frame {
            OutboundFrame::Audio(chunk) => Message::Binary(chunk.into_bytes().into()),
            OutboundFrame::Error(notification) => Message::Text(notification.to_json().into()),
        };
        self.inner
            .send(message)
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close()
            .await
            .map_err(|e| TransportError(e.to_string()))
    }
}

/// Ping and pong are answered by the socket itself and never reach the session.
pub fn inbound_frame(message: Message) -> Option<InboundFrame> {
    match message {
        Message::Text(text) => Some(InboundFrame::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => Some(InboundFrame::Binary(bytes.to_vec())),
        Message::Close(_) => Some(InboundFrame::Close),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}
