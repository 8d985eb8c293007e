//! Realtime calculation session client.
//!
//! Bridges a UI surface to the remote compute service over a persistent
//! bidirectional named-event channel: connection lifecycle state machine,
//! request dispatch guarded by that state, and an append-only message log
//! fed by inbound results and lifecycle events.

use std::sync::Arc;

use shared::{
    domain::{Operation, RecordId},
    protocol::{CalculationRequest, CalculationResult, InboundEvent},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use url::Url;

pub mod error;
pub mod log;
pub mod notify;
pub mod transport;

pub use error::{SessionError, TransportError};
pub use log::{LogEntry, MessageLog};
pub use notify::{NotificationSink, Severity, TracingNotificationSink};
pub use transport::{
    ChannelConnector, ChannelSignal, EventChannel, MissingChannelConnector, WebSocketConnector,
    SIGNAL_BUFFER,
};

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Errored,
}

impl ConnectionState {
    /// Live states hold the channel; `initialize` is a no-op while live and
    /// a fresh connect attempt otherwise.
    fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// Session parameters. Supplied by the host environment; no files, no
/// environment variables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: Url,
    pub record_id: RecordId,
}

impl SessionConfig {
    pub fn new(endpoint: &str, record_id: RecordId) -> Result<Self, SessionError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            record_id,
        })
    }
}

/// Events broadcast to UI subscribers. The log itself is the source of
/// truth; a lagged receiver misses events but can re-read the snapshot.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    LogAppended(String),
    Notified {
        title: String,
        message: String,
        severity: Severity,
    },
}

struct SessionState {
    state: ConnectionState,
    channel: Option<Arc<dyn EventChannel>>,
    pump: Option<JoinHandle<()>>,
    log: MessageLog,
}

/// One UI-instance's connection lifetime. Owns the channel handle
/// exclusively; `teardown` releases it and stops event delivery.
pub struct RealtimeSession {
    config: SessionConfig,
    connector: Arc<dyn ChannelConnector>,
    sink: Arc<dyn NotificationSink>,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl RealtimeSession {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn ChannelConnector>,
        sink: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            config,
            connector,
            sink,
            inner: Mutex::new(SessionState {
                state: ConnectionState::Idle,
                channel: None,
                pump: None,
                log: MessageLog::default(),
            }),
            events,
        })
    }

    /// Opens the channel and starts consuming its signals. Idempotent while
    /// a session is live: repeated lifecycle callbacks never double-connect.
    /// From `Disconnected`/`Errored` this is the fresh explicit
    /// initialization that re-enters `Connecting`.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), SessionError> {
        let stale = {
            let mut inner = self.inner.lock().await;
            if inner.state.is_live() {
                debug!("initialize skipped; session already live");
                return Ok(());
            }
            inner.state = ConnectionState::Connecting;
            (inner.channel.take(), inner.pump.take())
        };
        release(stale).await;
        let _ = self
            .events
            .send(SessionEvent::StateChanged(ConnectionState::Connecting));
        info!(endpoint = %self.config.endpoint, "connecting to real-time service");

        let (signals, signal_rx) = broadcast::channel(SIGNAL_BUFFER);
        match self.connector.connect(&self.config.endpoint, signals).await {
            Ok(channel) => {
                let mut inner = self.inner.lock().await;
                if inner.state != ConnectionState::Connecting {
                    // Torn down while the connect was in flight; the handle
                    // must not outlive the session that asked for it.
                    drop(inner);
                    channel.close().await;
                    return Ok(());
                }
                let pump = Arc::clone(self).spawn_pump(signal_rx);
                inner.channel = Some(channel);
                inner.pump = Some(pump);
                Ok(())
            }
            Err(err) => {
                {
                    let mut inner = self.inner.lock().await;
                    inner.state = ConnectionState::Errored;
                }
                let _ = self
                    .events
                    .send(SessionEvent::StateChanged(ConnectionState::Errored));
                let message = format!("Failed to initialize real-time channel: {err}");
                self.append_log(message.clone()).await;
                self.notify("Error", message, Severity::Error);
                Err(err.into())
            }
        }
    }

    /// Releases the channel and stops signal delivery. Idempotent; events
    /// arriving after teardown are dropped.
    pub async fn teardown(&self) {
        let (channel, pump, was_live) = {
            let mut inner = self.inner.lock().await;
            let was_live = inner.state.is_live();
            if was_live {
                inner.state = ConnectionState::Disconnected;
            }
            (inner.channel.take(), inner.pump.take(), was_live)
        };
        release((channel, pump)).await;
        if was_live {
            let _ = self
                .events
                .send(SessionEvent::StateChanged(ConnectionState::Disconnected));
            info!("session torn down");
        }
    }

    /// Dispatches one calculation request. Precondition: `Connected` with a
    /// live channel, otherwise `NotConnected` (no event is emitted).
    /// Fire-and-forget: no timeout, no retry, no request id — single
    /// in-flight use is a convention, not enforced. NaN operands are
    /// forwarded untouched.
    pub async fn submit(
        &self,
        first_operand: f64,
        second_operand: f64,
        operation: Operation,
    ) -> Result<(), SessionError> {
        let channel = {
            let inner = self.inner.lock().await;
            if inner.state == ConnectionState::Connected {
                inner.channel.as_ref().map(Arc::clone)
            } else {
                None
            }
        };
        let Some(channel) = channel else {
            self.notify(
                "Error",
                "Not connected to real-time service.",
                Severity::Error,
            );
            return Err(SessionError::NotConnected);
        };

        let frame = CalculationRequest::new(
            first_operand,
            second_operand,
            operation,
            self.config.record_id.clone(),
        )
        .into_frame()?;

        if let Err(err) = channel.emit(frame).await {
            self.notify(
                "Error",
                format!("Failed to send calculation request: {err}"),
                Severity::Error,
            );
            return Err(err.into());
        }

        self.append_log(format!(
            "Sending: {first_operand} {operation} {second_operand}..."
        ))
        .await;
        Ok(())
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub async fn log_snapshot(&self) -> Vec<LogEntry> {
        self.inner.lock().await.log.snapshot()
    }

    pub fn record_id(&self) -> &RecordId {
        &self.config.record_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn spawn_pump(
        self: Arc<Self>,
        mut signals: broadcast::Receiver<ChannelSignal>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(signal) => self.handle_signal(signal).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "channel signal intake lagged; dropped signals");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_signal(&self, signal: ChannelSignal) {
        let event = match signal {
            ChannelSignal::Opened => InboundEvent::Connected,
            ChannelSignal::Closed => InboundEvent::Disconnected,
            ChannelSignal::Failed(message) => InboundEvent::ConnectError { message },
            ChannelSignal::Event(frame) => match InboundEvent::from_frame(&frame) {
                Ok(event) => event,
                Err(err) => {
                    // Fail closed: diagnostic entry, no result line, nothing
                    // raised into the event loop.
                    warn!(event = %frame.event, "dropping invalid inbound frame: {err}");
                    self.append_log(format!("Ignored malformed \"{}\" event.", frame.event))
                        .await;
                    return;
                }
            },
        };
        self.apply_inbound(event).await;
    }

    async fn apply_inbound(&self, event: InboundEvent) {
        match event {
            InboundEvent::Connected => {
                info!("connected to real-time service");
                self.transition(ConnectionState::Connected, "Connected to real-time service.")
                    .await;
                self.notify(
                    "Success",
                    "Connected to real-time service!",
                    Severity::Success,
                );
            }
            InboundEvent::Disconnected => {
                let state = self.inner.lock().await.state;
                if state == ConnectionState::Connecting {
                    // The channel never became a session; surface it as a
                    // connect error rather than a clean disconnect.
                    self.connect_errored("channel closed before connect completed".to_string())
                        .await;
                    return;
                }
                if state != ConnectionState::Connected {
                    debug!(?state, "ignoring disconnect signal outside Connected");
                    return;
                }
                info!("disconnected from real-time service");
                self.transition(
                    ConnectionState::Disconnected,
                    "Disconnected from real-time service.",
                )
                .await;
                self.notify(
                    "Warning",
                    "Disconnected from real-time service.",
                    Severity::Warning,
                );
            }
            InboundEvent::ConnectError { message } => {
                self.connect_errored(message).await;
            }
            InboundEvent::Result(result) => {
                self.append_log(format_result_entry(&result)).await;
            }
        }
    }

    async fn connect_errored(&self, message: String) {
        warn!("connection error: {message}");
        let entry = format!("Connection error: {message}");
        self.transition(ConnectionState::Errored, &entry).await;
        self.notify("Error", entry, Severity::Error);
    }

    /// State change plus its log line under one lock acquisition, so log
    /// order always matches signal arrival order.
    async fn transition(&self, next: ConnectionState, entry: &str) {
        {
            let mut inner = self.inner.lock().await;
            inner.state = next;
            inner.log.push(LogEntry::new(entry));
        }
        let _ = self.events.send(SessionEvent::StateChanged(next));
        let _ = self.events.send(SessionEvent::LogAppended(entry.to_string()));
    }

    async fn append_log(&self, entry: String) {
        self.inner.lock().await.log.push(LogEntry::new(entry.clone()));
        let _ = self.events.send(SessionEvent::LogAppended(entry));
    }

    fn notify(&self, title: &str, message: impl Into<String>, severity: Severity) {
        let message = message.into();
        self.sink.notify(title, &message, severity);
        let _ = self.events.send(SessionEvent::Notified {
            title: title.to_string(),
            message,
            severity,
        });
    }
}

/// Stops a stale channel/pump pair. Awaiting the aborted pump makes the cut
/// deterministic: once this returns, no further signal reaches the log.
async fn release(stale: (Option<Arc<dyn EventChannel>>, Option<JoinHandle<()>>)) {
    let (channel, pump) = stale;
    if let Some(pump) = pump {
        pump.abort();
        let _ = pump.await;
    }
    if let Some(channel) = channel {
        channel.close().await;
    }
}

/// One log line per inbound result: time-of-day from the RFC 3339 timestamp,
/// operands, operator, result. No correlation with a prior request.
fn format_result_entry(result: &CalculationResult) -> String {
    format!(
        "[{}] {} {} {} = {}",
        result.timestamp.format("%H:%M:%S"),
        result.first_operand,
        result.operation,
        result.second_operand,
        result.result
    )
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
