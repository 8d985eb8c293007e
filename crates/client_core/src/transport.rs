//! Channel adapter seam plus the statically linked WebSocket implementation.
//!
//! The session core only depends on the `ChannelConnector`/`EventChannel`
//! traits; signals are delivered serially, in arrival order, through one
//! broadcast subscription created by the session before connecting.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use shared::protocol::EventFrame;
use tokio::{
    net::TcpStream,
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::warn;
use url::Url;

use crate::error::TransportError;

pub const SIGNAL_BUFFER: usize = 1024;

/// Lifecycle and payload signals emitted by a channel, in arrival order.
#[derive(Debug, Clone)]
pub enum ChannelSignal {
    Opened,
    Event(EventFrame),
    Closed,
    Failed(String),
}

#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Best-effort send: at-most-once, no delivery guarantee, no ack.
    async fn emit(&self, frame: EventFrame) -> Result<(), TransportError>;
    /// Releases the connection and stops signal delivery.
    async fn close(&self);
}

impl std::fmt::Debug for dyn EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventChannel")
    }
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Establishes a channel to `endpoint`. Signals (including the initial
    /// `Opened`) are delivered through `signals`; the caller must subscribe
    /// before invoking this. Reconnection, if any, is the adapter's concern.
    async fn connect(
        &self,
        endpoint: &Url,
        signals: broadcast::Sender<ChannelSignal>,
    ) -> Result<Arc<dyn EventChannel>, TransportError>;
}

/// Placeholder connector for sessions constructed without a transport.
pub struct MissingChannelConnector;

#[async_trait]
impl ChannelConnector for MissingChannelConnector {
    async fn connect(
        &self,
        _endpoint: &Url,
        _signals: broadcast::Sender<ChannelSignal>,
    ) -> Result<Arc<dyn EventChannel>, TransportError> {
        Err(TransportError::Unavailable(
            "no channel transport configured".to_string(),
        ))
    }
}

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct WebSocketConnector;

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(
        &self,
        endpoint: &Url,
        signals: broadcast::Sender<ChannelSignal>,
    ) -> Result<Arc<dyn EventChannel>, TransportError> {
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(TransportError::Unavailable(format!(
                "endpoint scheme \"{}\" is not a websocket scheme",
                endpoint.scheme()
            )));
        }

        let (stream, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|err| TransportError::Unavailable(err.to_string()))?;
        let (writer, reader) = stream.split();
        let reader_task = tokio::spawn(read_loop(reader, signals));

        Ok(Arc::new(WebSocketChannel {
            writer: Mutex::new(writer),
            reader_task,
        }))
    }
}

pub struct WebSocketChannel {
    writer: Mutex<WsWriter>,
    reader_task: JoinHandle<()>,
}

#[async_trait]
impl EventChannel for WebSocketChannel {
    async fn emit(&self, frame: EventFrame) -> Result<(), TransportError> {
        let text = frame
            .to_text()
            .map_err(|err| TransportError::SendFailed(err.to_string()))?;
        self.writer
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|err| TransportError::SendFailed(err.to_string()))
    }

    async fn close(&self) {
        self.reader_task.abort();
        let _ = self.writer.lock().await.close().await;
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop(mut reader: WsReader, signals: broadcast::Sender<ChannelSignal>) {
    // The handshake completed in connect_async; the channel is live once
    // this task starts.
    let _ = signals.send(ChannelSignal::Opened);

    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Text(text)) => match EventFrame::from_text(&text) {
                Ok(frame) => {
                    let _ = signals.send(ChannelSignal::Event(frame));
                }
                Err(err) => {
                    warn!("transport: dropping undecodable text frame: {err}");
                }
            },
            Ok(Message::Close(_)) => {
                let _ = signals.send(ChannelSignal::Closed);
                return;
            }
            Ok(_) => {}
            Err(err) => {
                let _ = signals.send(ChannelSignal::Failed(err.to_string()));
                return;
            }
        }
    }

    let _ = signals.send(ChannelSignal::Closed);
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
