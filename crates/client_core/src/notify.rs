//! User-facing alert contract consumed by the session core.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Warning,
    Error,
    Info,
}

/// External alerting collaborator (toast/banner/etc.). Fire-and-forget: the
/// core never inspects an outcome, and implementations must not panic back
/// into it.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, message: &str, severity: Severity);
}

/// Default sink routing alerts through `tracing` at severity-mapped levels.
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, title: &str, message: &str, severity: Severity) {
        match severity {
            Severity::Error => tracing::error!(title, "{message}"),
            Severity::Warning => tracing::warn!(title, "{message}"),
            Severity::Success | Severity::Info => tracing::info!(title, "{message}"),
        }
    }
}
