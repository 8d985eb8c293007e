use thiserror::Error;

/// Boundary-validation failures for inbound and outbound event frames.
///
/// Every variant is terminal to the one frame that triggered it; callers log
/// and drop, they never propagate into the event loop.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown event \"{name}\"")]
    UnknownEvent { name: String },
    #[error("malformed {event} payload: {source}")]
    MalformedPayload {
        event: &'static str,
        source: serde_json::Error,
    },
    #[error("failed to encode {event} payload: {source}")]
    Encode {
        event: &'static str,
        source: serde_json::Error,
    },
}
