use shared::error::ProtocolError;
use thiserror::Error;

/// Failures raised by the channel adapter. `Unavailable` covers both
/// transport initialization and connect failures; once a channel exists only
/// send-side failures remain.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("failed to send event: {0}")]
    SendFailed(String),
    #[error("channel closed")]
    ChannelClosed,
}

/// Session-level error taxonomy. Every variant is terminal to the single
/// operation that raised it; state is never left partially updated.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected to real-time service")]
    NotConnected,
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
